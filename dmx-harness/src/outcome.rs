//! Per-case outcomes and lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::facts::Mismatch;

/// Final verdict for one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed(Vec<Mismatch>),
    /// Sample absent; never counted as a failure.
    Skipped(String),
    /// Infrastructure fault, not a verdict on the decompiler.
    Errored(String),
}

impl Outcome {
    /// `Passed` iff there are no mismatches.
    pub fn from_mismatches(mismatches: Vec<Mismatch>) -> Self {
        if mismatches.is_empty() {
            Outcome::Passed
        } else {
            Outcome::Failed(mismatches)
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Passed => OutcomeKind::Passed,
            Outcome::Failed(_) => OutcomeKind::Failed,
            Outcome::Skipped(_) => OutcomeKind::Skipped,
            Outcome::Errored(_) => OutcomeKind::Errored,
        }
    }

    pub fn mismatches(&self) -> &[Mismatch] {
        match self {
            Outcome::Failed(mismatches) => mismatches,
            _ => &[],
        }
    }

    /// Skip reason or fault description.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Skipped(reason) | Outcome::Errored(reason) => Some(reason),
            _ => None,
        }
    }

    /// The terminal state this outcome leaves a case in.
    pub fn state(&self) -> CaseState {
        match self {
            Outcome::Passed => CaseState::Passed,
            Outcome::Failed(_) => CaseState::Failed,
            Outcome::Skipped(_) => CaseState::Skipped,
            Outcome::Errored(_) => CaseState::Errored,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Passed,
    Failed,
    Skipped,
    Errored,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Passed => "passed",
            OutcomeKind::Failed => "failed",
            OutcomeKind::Skipped => "skipped",
            OutcomeKind::Errored => "errored",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a case within a run.
///
/// ```text
/// Pending -> Resolving -> Skipped
///                      -> Running -> Passed | Failed | Errored
///                      -> Errored
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseState {
    Pending,
    Resolving,
    Running,
    Skipped,
    Passed,
    Failed,
    Errored,
}

impl CaseState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CaseState::Skipped | CaseState::Passed | CaseState::Failed | CaseState::Errored
        )
    }

    pub fn can_transition_to(self, next: CaseState) -> bool {
        use CaseState::*;
        matches!(
            (self, next),
            (Pending, Resolving)
                | (Pending, Errored)
                | (Resolving, Skipped)
                | (Resolving, Running)
                | (Resolving, Errored)
                | (Running, Passed)
                | (Running, Failed)
                | (Running, Errored)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CaseState::Pending => "pending",
            CaseState::Resolving => "resolving",
            CaseState::Running => "running",
            CaseState::Skipped => "skipped",
            CaseState::Passed => "passed",
            CaseState::Failed => "failed",
            CaseState::Errored => "errored",
        }
    }
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
