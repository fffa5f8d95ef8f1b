//! Matrix runner.
//!
//! Cases are independent, so a fixed pool of scoped worker threads pulls case
//! indices from a shared cursor. Each finished case is sent to a single
//! aggregator over a channel; the aggregator stores it in the slot for its
//! registry index, so the report order never depends on completion order.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use dmx_clock::{Clock, SystemClock};
use dmx_fs::Filesystem;
use dmx_schema::TestCase;

use crate::cancel::{Cancellation, NeverCancel};
use crate::config::{HarnessConfig, ScratchPolicy};
use crate::driver::{Decompiler, Driver, DriverError};
use crate::facts;
use crate::logger::{Logger, NullLogger, Verbosity};
use crate::outcome::{CaseState, Outcome};
use crate::registry::Registry;
use crate::report::{CaseReport, RunReport};
use crate::resolver::{Resolution, SampleResolver};

pub const INTERRUPTED: &str = "interrupted";

/// Runs every case of a registry and aggregates a [`RunReport`].
pub struct MatrixRunner<'a, F: Filesystem> {
    fs: &'a F,
    decompiler: &'a dyn Decompiler,
    logger: &'a dyn Logger,
    cancel: &'a dyn Cancellation,
    clock: &'a dyn Clock,
    corpus_dir: PathBuf,
    scratch_dir: PathBuf,
    workers: usize,
    timeout_override: Option<Duration>,
    scratch_policy: ScratchPolicy,
}

impl<'a, F: Filesystem> MatrixRunner<'a, F> {
    pub fn new(fs: &'a F, decompiler: &'a dyn Decompiler, config: &HarnessConfig) -> Self {
        Self {
            fs,
            decompiler,
            logger: &NullLogger,
            cancel: &NeverCancel,
            clock: &SystemClock,
            corpus_dir: config.corpus_dir.clone(),
            scratch_dir: config.scratch_dir.clone(),
            workers: config.workers.max(1),
            timeout_override: config.timeout_override(),
            scratch_policy: config.scratch_policy,
        }
    }

    pub fn with_logger(mut self, logger: &'a dyn Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_cancellation(mut self, cancel: &'a dyn Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run the whole matrix. Every case gets exactly one outcome.
    pub fn run(&self, registry: &Registry) -> RunReport {
        let cases = registry.list_cases();
        let workers = self.workers.min(cases.len()).max(1);
        self.logger.event(
            Verbosity::Normal,
            "run_started",
            &[("cases", &cases.len()), ("workers", &workers)],
        );

        let cursor = AtomicUsize::new(0);
        let mut slots: Vec<Option<CaseReport>> = vec![None; cases.len()];
        let (tx, rx) = mpsc::channel::<(usize, CaseReport)>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let cursor = &cursor;
                scope.spawn(move || loop {
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(case) = cases.get(index) else {
                        break;
                    };
                    let report = self.run_case_isolated(case);
                    if tx.send((index, report)).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            for (index, report) in rx {
                slots[index] = Some(report);
            }
        });

        let reports = slots
            .into_iter()
            .zip(cases)
            .map(|(slot, case)| {
                slot.unwrap_or_else(|| {
                    CaseReport::new(case, &Outcome::Errored("no outcome recorded".into()), 0)
                })
            })
            .collect();

        let report = RunReport::from_cases(self.clock.now_rfc3339(), reports);
        self.logger.event(
            Verbosity::Normal,
            "run_finished",
            &[
                ("passed", &report.totals.passed),
                ("failed", &report.totals.failed),
                ("skipped", &report.totals.skipped),
                ("errored", &report.totals.errored),
            ],
        );
        report
    }

    /// Run one case, converting a panic into an errored outcome so sibling
    /// cases are unaffected.
    fn run_case_isolated(&self, case: &TestCase) -> CaseReport {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.evaluate_case(case)))
            .unwrap_or_else(|_| Outcome::Errored("internal error while evaluating case".into()));
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let kind = outcome.kind();
        let mismatch_count = outcome.mismatches().len();
        let reason = outcome.reason();
        let mut fields: Vec<(&str, &dyn fmt::Display)> = Vec::new();
        fields.push(("name", &case.name));
        fields.push(("outcome", &kind));
        fields.push(("elapsed_ms", &elapsed_ms));
        if mismatch_count > 0 {
            fields.push(("mismatches", &mismatch_count));
        }
        if let Some(reason) = &reason {
            fields.push(("reason", reason));
        }
        self.logger.event(Verbosity::Normal, "case_finished", &fields);
        for mismatch in outcome.mismatches() {
            self.logger.event(
                Verbosity::Verbose,
                "mismatch",
                &[("case", &case.name), ("detail", mismatch)],
            );
        }

        CaseReport::new(case, &outcome, elapsed_ms)
    }

    /// Evaluate one case without isolation. Public for single-case use.
    pub fn evaluate_case(&self, case: &TestCase) -> Outcome {
        let mut progress = CaseProgress::new(case, self.logger);

        if self.cancel.is_cancelled() {
            return progress.finish(Outcome::Errored(INTERRUPTED.into()));
        }

        progress.advance(CaseState::Resolving);
        let resolver = SampleResolver::new(self.fs, &self.corpus_dir);
        let sample = match resolver.resolve(&case.sample, case.format) {
            Ok(Resolution::Present(sample)) => sample,
            Ok(Resolution::Absent(absent)) => {
                return progress.finish(Outcome::Skipped(absent.to_string()))
            }
            Err(e) => return progress.finish(Outcome::Errored(e.to_string())),
        };

        progress.advance(CaseState::Running);
        let driver = Driver::new(self.fs, self.decompiler, &self.scratch_dir)
            .with_timeout_override(self.timeout_override);
        let outcome = match driver.run(case, &sample, self.cancel) {
            Ok(result) => Outcome::from_mismatches(facts::evaluate(
                &result,
                case.expected.as_ref(),
                case.architecture,
            )),
            Err(DriverError::Interrupted) => Outcome::Errored(INTERRUPTED.into()),
            Err(e) => Outcome::Errored(e.to_string()),
        };

        let retain = self.scratch_policy.retain(outcome == Outcome::Passed);
        if let Err(e) = driver.release_scratch(case, retain) {
            self.logger.event(
                Verbosity::Normal,
                "scratch_cleanup_failed",
                &[("name", &case.name), ("error", &e)],
            );
        }

        progress.finish(outcome)
    }
}

/// Tracks a case through its lifecycle and logs each transition.
struct CaseProgress<'a> {
    case: &'a TestCase,
    logger: &'a dyn Logger,
    state: CaseState,
}

impl<'a> CaseProgress<'a> {
    fn new(case: &'a TestCase, logger: &'a dyn Logger) -> Self {
        Self {
            case,
            logger,
            state: CaseState::Pending,
        }
    }

    fn advance(&mut self, next: CaseState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        self.logger.event(
            Verbosity::Debug,
            "case_state",
            &[("name", &self.case.name), ("from", &self.state), ("to", &next)],
        );
        self.state = next;
    }

    fn finish(&mut self, outcome: Outcome) -> Outcome {
        self.advance(outcome.state());
        outcome
    }
}
