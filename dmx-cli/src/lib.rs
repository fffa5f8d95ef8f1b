//! dmx CLI.
//!
//! Argument parsing, command orchestration, exit codes and Ctrl+C handling
//! for the `dmx` binary.

pub mod cli;
pub mod commands;
pub mod exit;
pub mod signal;

pub use cli::{
    parse_from, CheckArgs, Cli, CliError, Command, HarnessArgs, ListArgs, RunArgs,
    ScratchPolicyArg, SelectArgs, DEFAULT_REPORT_PATH,
};
pub use commands::{
    execute_check, execute_list, execute_run, execute_run_with, render_list, CheckResult,
    CommandError, CommandResult, RunResult,
};
pub use signal::ShutdownFlag;
