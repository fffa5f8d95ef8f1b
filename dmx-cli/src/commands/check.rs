//! Check command.
//!
//! Runs every fatal startup check plus sample resolution for the selected
//! cases, without invoking the decompiler on anything.

use std::path::PathBuf;

use dmx_fs::Filesystem;
use dmx_harness::{preflight, HarnessConfig, ProcessDecompiler, Resolution, SampleResolver};

use crate::cli::CheckArgs;

use super::{CommandError, CommandResult};

/// Result of check command execution.
#[derive(Debug)]
pub struct CheckResult {
    pub config: HarnessConfig,
    pub catalog: String,
    pub cases: usize,
    /// Resolved location of the decompiler executable.
    pub decompiler: PathBuf,
    pub present: usize,
    /// `(case, reason)` for samples that will be skipped.
    pub absent: Vec<(String, String)>,
    /// `(case, error)` for samples that will error.
    pub faults: Vec<(String, String)>,
}

impl CheckResult {
    pub fn status(&self) -> CommandResult<()> {
        if self.faults.is_empty() {
            Ok(())
        } else {
            Err(CommandError::UnresolvableSamples(self.faults.len()))
        }
    }
}

/// Execute the check command.
pub fn execute_check<F: Filesystem>(args: &CheckArgs, fs: &F) -> CommandResult<CheckResult> {
    args.validate()?;
    let config = args.harness.resolve_config(fs)?;
    let command = config.require_decompiler()?;
    let decompiler = ProcessDecompiler::from_command(command)
        .locate()
        .ok_or_else(|| CommandError::DecompilerNotFound(command.program.clone()))?;

    let registry = args.select.select(&args.select.load_catalog(fs)?)?;
    preflight(fs, &config)?;

    let resolver = SampleResolver::new(fs, &config.corpus_dir);
    let mut present = 0;
    let mut absent = Vec::new();
    let mut faults = Vec::new();
    for case in registry.list_cases() {
        match resolver.resolve(&case.sample, case.format) {
            Ok(Resolution::Present(_)) => present += 1,
            Ok(Resolution::Absent(sample)) => absent.push((case.name.clone(), sample.to_string())),
            Err(e) => faults.push((case.name.clone(), e.to_string())),
        }
    }

    Ok(CheckResult {
        catalog: args.select.catalog_label(),
        cases: registry.len(),
        config,
        decompiler,
        present,
        absent,
        faults,
    })
}
