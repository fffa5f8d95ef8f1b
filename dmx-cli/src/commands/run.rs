//! Run command orchestration.
//!
//! Loads configuration and catalog, runs the preflight checks, executes the
//! matrix and writes the report files.

use std::path::PathBuf;

use dmx_clock::Clock;
use dmx_fs::Filesystem;
use dmx_harness::{
    preflight, Cancellation, Decompiler, HarnessConfig, Logger, MatrixRunner, ProcessDecompiler,
    RunReport, Verbosity,
};

use crate::cli::RunArgs;

use super::{CommandError, CommandResult};

/// Result of run command execution.
#[derive(Debug)]
pub struct RunResult {
    pub report: RunReport,
    pub report_path: PathBuf,
    pub markdown_path: Option<PathBuf>,
    /// The run was cancelled before every case finished.
    pub interrupted: bool,
}

impl RunResult {
    /// Map the run to the process outcome: interrupted beats failures.
    pub fn status(&self) -> CommandResult<()> {
        if self.interrupted {
            return Err(CommandError::Interrupted);
        }
        if !self.report.is_success() {
            return Err(CommandError::CasesFailed {
                failed: self.report.totals.failed,
                errored: self.report.totals.errored,
            });
        }
        Ok(())
    }
}

/// Execute the run command with the configured external decompiler.
pub fn execute_run<F: Filesystem>(
    args: &RunArgs,
    fs: &F,
    clock: &dyn Clock,
    logger: &dyn Logger,
    cancel: &dyn Cancellation,
) -> CommandResult<RunResult> {
    args.validate()?;
    let config = args.harness.resolve_config(fs)?;
    let decompiler = ProcessDecompiler::from_command(config.require_decompiler()?);
    execute_run_with(args, &config, &decompiler, fs, clock, logger, cancel)
}

/// Execute the run command against an already-built decompiler.
pub fn execute_run_with<F: Filesystem>(
    args: &RunArgs,
    config: &HarnessConfig,
    decompiler: &dyn Decompiler,
    fs: &F,
    clock: &dyn Clock,
    logger: &dyn Logger,
    cancel: &dyn Cancellation,
) -> CommandResult<RunResult> {
    let catalog = args.select.load_catalog(fs)?;
    let registry = args.select.select(&catalog)?;
    preflight(fs, config)?;

    let catalog_label = args.select.catalog_label();
    let corpus = config.corpus_dir.display();
    let selected = registry.len();
    let total = catalog.len();
    logger.event(
        Verbosity::Verbose,
        "matrix_selected",
        &[
            ("catalog", &catalog_label),
            ("corpus", &corpus),
            ("selected", &selected),
            ("total", &total),
        ],
    );

    let report = MatrixRunner::new(fs, decompiler, config)
        .with_logger(logger)
        .with_clock(clock)
        .with_cancellation(cancel)
        .run(&registry);
    let interrupted = cancel.is_cancelled();

    // The report is written even for interrupted runs.
    report
        .write_json(fs, &args.report)
        .map_err(|source| CommandError::Output {
            path: args.report.clone(),
            source,
        })?;
    if let Some(path) = &args.markdown {
        report
            .write_markdown(fs, path)
            .map_err(|source| CommandError::Output {
                path: path.clone(),
                source,
            })?;
    }

    Ok(RunResult {
        report,
        report_path: args.report.clone(),
        markdown_path: args.markdown.clone(),
        interrupted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{parse_from, Command};
    use dmx_clock::FixedClock;
    use dmx_fs::MockFilesystem;
    use dmx_harness::{
        CancelToken, DecompilationResult, DecompileRequest, DriverError, MockLogger, NeverCancel,
        OutcomeKind,
    };
    use dmx_schema::Artifacts;
    use std::path::Path;

    /// Reports `main` for every case except the ones named in `missing`.
    struct StaticDecompiler {
        missing: Vec<&'static str>,
    }

    impl Decompiler for StaticDecompiler {
        fn decompile(
            &self,
            request: &DecompileRequest<'_>,
            _cancel: &dyn Cancellation,
        ) -> Result<DecompilationResult, DriverError> {
            let artifacts = if self.missing.iter().any(|name| *name == request.case_name) {
                Artifacts::default().with_function("helper")
            } else {
                Artifacts::default().with_function("main")
            };
            Ok(DecompilationResult::Success(artifacts))
        }
    }

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["dmx", "run", "--corpus", "/corpus", "--scratch", "/scratch"];
        argv.extend_from_slice(extra);
        match parse_from(argv).unwrap().command {
            Command::Run(args) => args,
            other => panic!("expected Run, got {:?}", other),
        }
    }

    fn corpus_fs() -> MockFilesystem {
        let fs = MockFilesystem::new();
        fs.add_dir("/corpus");
        fs.add_file(
            "/catalog.json",
            br#"{"cases": [
                {"name": "x86_main", "architecture": "x86", "format": "elf", "sample": "x86.elf",
                 "expected": {"functions": ["main"]}},
                {"name": "arm_main", "architecture": "arm", "format": "elf", "sample": "arm.elf",
                 "expected": {"functions": ["main"]}}
            ]}"#
            .to_vec(),
        );
        fs.add_file("/corpus/x86.elf", b"\x7fELF".to_vec());
        fs.add_file("/corpus/arm.elf", b"\x7fELF".to_vec());
        fs
    }

    fn execute(
        args: &RunArgs,
        fs: &MockFilesystem,
        decompiler: &StaticDecompiler,
        cancel: &dyn Cancellation,
    ) -> CommandResult<RunResult> {
        let config = args.harness.resolve_config(fs).unwrap();
        execute_run_with(
            args,
            &config,
            decompiler,
            fs,
            &FixedClock::new(1704067200),
            &MockLogger::new(),
            cancel,
        )
    }

    #[test]
    fn test_run_passes_and_writes_reports() {
        let fs = corpus_fs();
        let args = run_args(&[
            "--catalog", "/catalog.json",
            "--report", "/out/report.json",
            "--markdown", "/out/report.md",
        ]);
        let decompiler = StaticDecompiler { missing: vec![] };

        let result = execute(&args, &fs, &decompiler, &NeverCancel).unwrap();
        assert!(result.status().is_ok());
        assert_eq!(result.report.totals.passed, 2);

        let json = fs.get_file(Path::new("/out/report.json")).unwrap();
        let parsed = RunReport::from_json(std::str::from_utf8(&json).unwrap()).unwrap();
        assert_eq!(parsed, result.report);
        let markdown = fs.get_file(Path::new("/out/report.md")).unwrap();
        let markdown = String::from_utf8(markdown).unwrap();
        assert!(markdown.contains("**Result**: PASS"));
    }

    #[test]
    fn test_run_failure_status() {
        let fs = corpus_fs();
        let args = run_args(&["--catalog", "/catalog.json", "--report", "/out/r.json"]);
        let decompiler = StaticDecompiler { missing: vec!["arm_main"] };

        let result = execute(&args, &fs, &decompiler, &NeverCancel).unwrap();
        assert_eq!(result.report.case("arm_main").unwrap().outcome, OutcomeKind::Failed);
        assert!(matches!(
            result.status(),
            Err(CommandError::CasesFailed { failed: 1, errored: 0 })
        ));
        // A failing run still leaves its report behind.
        assert!(fs.get_file(Path::new("/out/r.json")).is_some());
    }

    #[test]
    fn test_run_arch_filter() {
        let fs = corpus_fs();
        let args = run_args(&[
            "--catalog",
            "/catalog.json",
            "--arch",
            "arm",
            "--report",
            "/r.json",
        ]);
        let decompiler = StaticDecompiler { missing: vec![] };

        let result = execute(&args, &fs, &decompiler, &NeverCancel).unwrap();
        assert_eq!(result.report.totals.total, 1);
        assert!(result.report.case("arm_main").is_some());
    }

    #[test]
    fn test_run_absent_samples_skip_without_failing() {
        let fs = MockFilesystem::new();
        fs.add_dir("/corpus");
        let args = run_args(&["--report", "/r.json"]);
        let decompiler = StaticDecompiler { missing: vec![] };

        let result = execute(&args, &fs, &decompiler, &NeverCancel).unwrap();
        assert_eq!(result.report.totals.skipped, result.report.totals.total);
        assert!(result.status().is_ok());
    }

    #[test]
    fn test_run_missing_corpus_is_fatal() {
        let fs = MockFilesystem::new();
        let args = run_args(&["--report", "/r.json"]);
        let decompiler = StaticDecompiler { missing: vec![] };

        let err = execute(&args, &fs, &decompiler, &NeverCancel).unwrap_err();
        assert!(matches!(err, CommandError::Preflight(_)));
        assert!(fs.get_file(Path::new("/r.json")).is_none());
    }

    #[test]
    fn test_run_bad_catalog() {
        let fs = corpus_fs();
        let args = run_args(&["--catalog", "/nope.json"]);
        let decompiler = StaticDecompiler { missing: vec![] };
        let err = execute(&args, &fs, &decompiler, &NeverCancel).unwrap_err();
        assert!(matches!(err, CommandError::Catalog(_)));
    }

    #[test]
    fn test_run_unwritable_report() {
        let fs = corpus_fs();
        fs.deny("/locked/r.json");
        let args = run_args(&["--catalog", "/catalog.json", "--report", "/locked/r.json"]);
        let decompiler = StaticDecompiler { missing: vec![] };
        let err = execute(&args, &fs, &decompiler, &NeverCancel).unwrap_err();
        assert!(matches!(err, CommandError::Output { .. }));
    }

    #[test]
    fn test_run_interrupted() {
        let fs = corpus_fs();
        let args = run_args(&["--catalog", "/catalog.json", "--report", "/r.json"]);
        let decompiler = StaticDecompiler { missing: vec![] };
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = execute(&args, &fs, &decompiler, &cancel).unwrap();
        assert!(result.interrupted);
        assert_eq!(result.report.totals.errored, 2);
        assert!(matches!(result.status(), Err(CommandError::Interrupted)));
        assert!(fs.get_file(Path::new("/r.json")).is_some());
    }

    #[test]
    fn test_execute_run_requires_decompiler() {
        let fs = corpus_fs();
        let args = run_args(&[]);
        let err = execute_run(
            &args,
            &fs,
            &FixedClock::new(0),
            &MockLogger::new(),
            &NeverCancel,
        )
        .unwrap_err();
        assert!(matches!(err, CommandError::Config(_)));
    }

    #[test]
    fn test_execute_run_invalid_args() {
        let fs = corpus_fs();
        let args = run_args(&["--workers", "0"]);
        let err = execute_run(
            &args,
            &fs,
            &FixedClock::new(0),
            &MockLogger::new(),
            &NeverCancel,
        )
        .unwrap_err();
        assert!(matches!(err, CommandError::InvalidArgument(_)));
    }
}
