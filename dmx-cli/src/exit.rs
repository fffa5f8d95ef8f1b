//! Exit codes for the dmx CLI.

use crate::commands::CommandError;

/// Exit code constants.
pub mod codes {
    /// Every selected case passed or was skipped.
    pub const SUCCESS: i32 = 0;
    /// At least one case failed or errored.
    pub const CASES_FAILED: i32 = 1;
    /// Invalid arguments or configuration.
    pub const INVALID_CONFIG: i32 = 2;
    /// Catalog could not be loaded.
    pub const CATALOG_ERROR: i32 = 3;
    /// Corpus, scratch root or samples unusable.
    pub const PREFLIGHT_ERROR: i32 = 4;
    /// Report could not be written.
    pub const IO_ERROR: i32 = 5;
    /// Interrupted by signal (128 + SIGINT).
    pub const SIGINT: i32 = 130;
}

/// Map a CommandError to an exit code.
pub fn exit_code(error: &CommandError) -> i32 {
    match error {
        CommandError::InvalidArgument(_) => codes::INVALID_CONFIG,
        CommandError::Config(_) => codes::INVALID_CONFIG,
        CommandError::DecompilerNotFound(_) => codes::INVALID_CONFIG,
        CommandError::Catalog(_) => codes::CATALOG_ERROR,
        CommandError::Preflight(_) => codes::PREFLIGHT_ERROR,
        CommandError::UnresolvableSamples(_) => codes::PREFLIGHT_ERROR,
        CommandError::Output { .. } => codes::IO_ERROR,
        CommandError::CasesFailed { .. } => codes::CASES_FAILED,
        CommandError::Interrupted => codes::SIGINT,
    }
}
