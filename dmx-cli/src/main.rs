//! dmx binary.
//!
//! Entry point for the `dmx` command-line tool.

use std::process::ExitCode;

use clap::Parser;
use dmx_cli::exit::{codes, exit_code};
use dmx_cli::{
    execute_check, execute_list, execute_run, render_list, CheckArgs, Cli, Command,
    CommandError, ListArgs, RunArgs, ShutdownFlag,
};
use dmx_clock::SystemClock;
use dmx_fs::RealFilesystem;
use dmx_harness::StderrLogger;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run(args) => run_run(args),
        Command::List(args) => run_list(args),
        Command::Check(args) => run_check(args),
    };

    match result {
        Ok(()) => ExitCode::from(codes::SUCCESS as u8),
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(exit_code(&e) as u8)
        }
    }
}

/// Run the matrix.
fn run_run(args: RunArgs) -> Result<(), CommandError> {
    // Ctrl+C cancels in-flight decompiler processes.
    let shutdown = ShutdownFlag::new();
    let logger = StderrLogger::new(args.verbosity());

    let result = execute_run(&args, &RealFilesystem, &SystemClock, &logger, &shutdown)?;
    let totals = &result.report.totals;

    println!(
        "{} cases: {} passed, {} failed, {} skipped, {} errored",
        totals.total, totals.passed, totals.failed, totals.skipped, totals.errored
    );
    for summary in &result.report.by_architecture {
        println!(
            "  {:<8} {} passed, {} failed, {} skipped, {} errored",
            summary.name,
            summary.counts.passed,
            summary.counts.failed,
            summary.counts.skipped,
            summary.counts.errored
        );
    }
    println!();
    println!("Report: {}", result.report_path.display());
    if let Some(path) = &result.markdown_path {
        println!("Markdown: {}", path.display());
    }

    result.status()
}

/// List catalog cases.
fn run_list(args: ListArgs) -> Result<(), CommandError> {
    let registry = execute_list(&args, &RealFilesystem)?;
    print!("{}", render_list(&registry, args.json));
    if args.json {
        println!();
    }
    Ok(())
}

/// Validate setup without running cases.
fn run_check(args: CheckArgs) -> Result<(), CommandError> {
    let result = execute_check(&args, &RealFilesystem)?;

    println!("Catalog: {} ({} cases)", result.catalog, result.cases);
    println!("Corpus: {}", result.config.corpus_dir.display());
    println!("Scratch: {}", result.config.scratch_dir.display());
    println!("Decompiler: {}", result.decompiler.display());
    println!("Workers: {}", result.config.workers);
    println!();
    println!("Samples present: {}", result.present);
    if !result.absent.is_empty() {
        println!("Samples absent (cases will be skipped): {}", result.absent.len());
        for (case, reason) in &result.absent {
            println!("  {}: {}", case, reason);
        }
    }
    for (case, error) in &result.faults {
        eprintln!("  {}: {}", case, error);
    }

    result.status()
}
