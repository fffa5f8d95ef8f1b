//! CLI argument parsing for dmx.
//!
//! Provides the `run`, `list` and `check` subcommands. Flags given on the
//! command line override values from the `--config` file.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use dmx_fs::Filesystem;
use dmx_harness::{
    load_catalog, CatalogError, ConfigError, DecompilerCommand, HarnessConfig, Registry,
    ScratchPolicy, Verbosity,
};
use dmx_schema::Architecture;
use regex::Regex;
use thiserror::Error;

/// Default path of the JSON run report.
pub const DEFAULT_REPORT_PATH: &str = "dmx-report.json";

/// Errors from CLI argument validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    #[error("workers must be at least 1, got {0}")]
    InvalidWorkers(usize),

    #[error("timeout-ms must be at least 1, got {0}")]
    InvalidTimeout(u64),

    #[error("invalid --filter pattern {pattern:?}: {reason}")]
    InvalidFilter { pattern: String, reason: String },
}

/// dmx - verify decompiler output across architectures and object formats.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "dmx")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the test matrix and write a report.
    Run(RunArgs),
    /// List the cases in the catalog.
    List(ListArgs),
    /// Check configuration, catalog, corpus and decompiler without running.
    Check(CheckArgs),
}

/// Scratch retention policy as accepted on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScratchPolicyArg {
    Always,
    Never,
    OnFailure,
}

impl From<ScratchPolicyArg> for ScratchPolicy {
    fn from(arg: ScratchPolicyArg) -> Self {
        match arg {
            ScratchPolicyArg::Always => ScratchPolicy::Always,
            ScratchPolicyArg::Never => ScratchPolicy::Never,
            ScratchPolicyArg::OnFailure => ScratchPolicy::OnFailure,
        }
    }
}

/// Flags shared by commands that build a [`HarnessConfig`].
#[derive(Args, Debug, Clone, PartialEq, Eq, Default)]
pub struct HarnessArgs {
    /// JSON config file. Flags below override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Fixture corpus directory.
    #[arg(long)]
    pub corpus: Option<PathBuf>,

    /// Root directory for per-case scratch output.
    #[arg(long)]
    pub scratch: Option<PathBuf>,

    /// Decompiler executable (path or name on PATH).
    #[arg(long)]
    pub decompiler: Option<PathBuf>,

    /// Extra argument passed to the decompiler before the harness arguments.
    /// Repeatable.
    #[arg(long = "decompiler-arg", allow_hyphen_values = true)]
    pub decompiler_args: Vec<String>,

    /// Number of cases run concurrently.
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,

    /// Timeout for cases without their own timeout, in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// When to keep per-case scratch directories.
    #[arg(long, value_enum)]
    pub scratch_policy: Option<ScratchPolicyArg>,
}

impl HarnessArgs {
    pub fn validate(&self) -> Result<(), CliError> {
        if self.workers == Some(0) {
            return Err(CliError::InvalidWorkers(0));
        }
        if self.timeout_ms == Some(0) {
            return Err(CliError::InvalidTimeout(0));
        }
        Ok(())
    }

    /// Load the config file, if any, then apply command-line overrides.
    pub fn resolve_config<F: Filesystem>(&self, fs: &F) -> Result<HarnessConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::load(fs, path)?,
            None => HarnessConfig::new(),
        };

        if let Some(dir) = &self.corpus {
            config = config.with_corpus_dir(dir);
        }
        if let Some(dir) = &self.scratch {
            config = config.with_scratch_dir(dir);
        }
        if let Some(program) = &self.decompiler {
            let command = DecompilerCommand::new(program).with_args(self.decompiler_args.clone());
            config = config.with_decompiler(command);
        } else if !self.decompiler_args.is_empty() {
            if let Some(mut command) = config.decompiler.take() {
                command.args.extend(self.decompiler_args.iter().cloned());
                config = config.with_decompiler(command);
            }
        }
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(ms) = self.timeout_ms {
            config = config.with_timeout(Duration::from_millis(ms));
        }
        if let Some(policy) = self.scratch_policy {
            config = config.with_scratch_policy(policy.into());
        }

        config.validate()?;
        Ok(config)
    }
}

/// Case catalog and selection flags.
#[derive(Args, Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectArgs {
    /// Catalog file or directory of `*.json` catalogs. Defaults to the
    /// built-in catalog.
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Only run cases for this architecture. Repeatable.
    #[arg(long = "arch")]
    pub architectures: Vec<Architecture>,

    /// Only run cases whose name matches this regular expression.
    #[arg(long)]
    pub filter: Option<String>,
}

impl SelectArgs {
    pub fn validate(&self) -> Result<(), CliError> {
        self.pattern().map(|_| ())
    }

    pub fn pattern(&self) -> Result<Option<Regex>, CliError> {
        self.filter
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| CliError::InvalidFilter {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Load the catalog named by `--catalog`, or the built-in one.
    pub fn load_catalog<F: Filesystem>(&self, fs: &F) -> Result<Registry, CatalogError> {
        match &self.catalog {
            Some(path) => load_catalog(fs, path),
            None => Ok(Registry::builtin()),
        }
    }

    /// Apply the architecture and name filters.
    pub fn select(&self, registry: &Registry) -> Result<Registry, CliError> {
        let registry = registry.for_architectures(&self.architectures);
        Ok(match self.pattern()? {
            Some(pattern) => registry.filtered(&pattern),
            None => registry,
        })
    }

    pub fn catalog_label(&self) -> String {
        match &self.catalog {
            Some(path) => path.display().to_string(),
            None => "built-in".to_string(),
        }
    }
}

/// Arguments for the run command.
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct RunArgs {
    #[command(flatten)]
    pub harness: HarnessArgs,

    #[command(flatten)]
    pub select: SelectArgs,

    /// Path of the JSON report.
    #[arg(long, default_value = DEFAULT_REPORT_PATH)]
    pub report: PathBuf,

    /// Also write a Markdown rendering of the report.
    #[arg(long)]
    pub markdown: Option<PathBuf>,

    /// Increase log detail (-v per-mismatch, -vv state transitions).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl RunArgs {
    pub fn validate(&self) -> Result<(), CliError> {
        self.harness.validate()?;
        self.select.validate()
    }

    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_count(self.verbose)
    }
}

/// Arguments for the list command.
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ListArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Print the selected cases as a JSON catalog.
    #[arg(long)]
    pub json: bool,
}

impl ListArgs {
    pub fn validate(&self) -> Result<(), CliError> {
        self.select.validate()
    }
}

/// Arguments for the check command.
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct CheckArgs {
    #[command(flatten)]
    pub harness: HarnessArgs,

    #[command(flatten)]
    pub select: SelectArgs,
}

impl CheckArgs {
    pub fn validate(&self) -> Result<(), CliError> {
        self.harness.validate()?;
        self.select.validate()
    }
}

/// Parse CLI arguments from an iterator (for testing).
pub fn parse_from<I, T>(iter: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(iter)
}
