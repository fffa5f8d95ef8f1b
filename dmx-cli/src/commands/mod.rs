//! Command orchestration for CLI subcommands.
//!
//! - `run` - execute the matrix and write the report
//! - `list` - print the selected cases
//! - `check` - validate setup without running any case

pub mod check;
pub mod list;
pub mod run;

pub use check::{execute_check, CheckResult};
pub use list::{execute_list, render_list};
pub use run::{execute_run, execute_run_with, RunResult};

use std::path::PathBuf;

use dmx_fs::FsError;
use dmx_harness::{CatalogError, ConfigError, PreflightError};
use thiserror::Error;

use crate::cli::CliError;

/// Errors from command execution.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] CliError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("preflight failed: {0}")]
    Preflight(#[from] PreflightError),

    #[error("decompiler not found: {0}")]
    DecompilerNotFound(PathBuf),

    #[error("failed to write report {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: FsError,
    },

    #[error("{0} sample(s) could not be resolved")]
    UnresolvableSamples(usize),

    #[error("{failed} case(s) failed, {errored} errored")]
    CasesFailed { failed: usize, errored: usize },

    #[error("interrupted")]
    Interrupted,
}

/// Result of command execution.
pub type CommandResult<T> = Result<T, CommandError>;
