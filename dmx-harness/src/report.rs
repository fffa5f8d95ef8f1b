//! Run report (report.json / report.md).
//!
//! Versioned, deterministic output: cases appear in registry order and
//! groupings follow the enum order of architectures and formats.

use std::path::Path;

use dmx_fs::{Filesystem, FsError};
use dmx_schema::{Architecture, ObjectFormat, TestCase};
use serde::{Deserialize, Serialize};

use crate::facts::Mismatch;
use crate::outcome::{Outcome, OutcomeKind};

/// Current report schema version.
pub const REPORT_VERSION: u32 = 1;

/// Outcome counts for a group of cases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, kind: OutcomeKind) {
        self.total += 1;
        match kind {
            OutcomeKind::Passed => self.passed += 1,
            OutcomeKind::Failed => self.failed += 1,
            OutcomeKind::Skipped => self.skipped += 1,
            OutcomeKind::Errored => self.errored += 1,
        }
    }
}

/// Counts for one architecture or format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSummary {
    /// Display name, e.g. "ARM" or "ELF".
    pub name: String,
    #[serde(flatten)]
    pub counts: OutcomeCounts,
}

/// Result of a single case.
///
/// `architecture` and `format` serialize as display names, the same keys
/// used by [`RunReport::by_architecture`] and [`RunReport::by_format`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseReport {
    pub name: String,
    #[serde(with = "display_name")]
    pub architecture: Architecture,
    #[serde(with = "display_name")]
    pub format: ObjectFormat,
    pub sample: String,
    pub outcome: OutcomeKind,
    /// Skip reason or infrastructure fault.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mismatches: Vec<Mismatch>,
    pub elapsed_ms: u64,
}

impl CaseReport {
    pub fn new(case: &TestCase, outcome: &Outcome, elapsed_ms: u64) -> Self {
        Self {
            name: case.name.clone(),
            architecture: case.architecture,
            format: case.format,
            sample: case.sample.describe(),
            outcome: outcome.kind(),
            reason: outcome.reason().map(str::to_string),
            mismatches: outcome.mismatches().to_vec(),
            elapsed_ms,
        }
    }
}

/// Machine-readable report for a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub report_version: u32,
    /// RFC 3339 timestamp of when the run finished.
    pub generated_at: String,
    pub totals: OutcomeCounts,
    pub by_architecture: Vec<DimensionSummary>,
    pub by_format: Vec<DimensionSummary>,
    pub cases: Vec<CaseReport>,
}

impl RunReport {
    /// Build a report from case results already in registry order.
    pub fn from_cases(generated_at: impl Into<String>, cases: Vec<CaseReport>) -> Self {
        let mut totals = OutcomeCounts::default();
        for case in &cases {
            totals.record(case.outcome);
        }

        let by_architecture = Architecture::ALL
            .iter()
            .filter_map(|arch| {
                summarize(arch.display_name(), cases.iter().filter(|c| c.architecture == *arch))
            })
            .collect();
        let by_format = ObjectFormat::ALL
            .iter()
            .filter_map(|format| {
                summarize(format.display_name(), cases.iter().filter(|c| c.format == *format))
            })
            .collect();

        Self {
            report_version: REPORT_VERSION,
            generated_at: generated_at.into(),
            totals,
            by_architecture,
            by_format,
            cases,
        }
    }

    /// True when no case failed or errored. Skips do not count.
    pub fn is_success(&self) -> bool {
        self.totals.failed == 0 && self.totals.errored == 0
    }

    pub fn architecture(&self, name: &str) -> Option<&DimensionSummary> {
        self.by_architecture.iter().find(|d| d.name == name)
    }

    pub fn format(&self, name: &str) -> Option<&DimensionSummary> {
        self.by_format.iter().find(|d| d.name == name)
    }

    pub fn case(&self, name: &str) -> Option<&CaseReport> {
        self.cases.iter().find(|c| c.name == name)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("RunReport serialization cannot fail")
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str("# Decompilation Matrix Report\n\n");
        md.push_str(&format!("- **Generated**: {}\n", self.generated_at));
        md.push_str(&format!("- **Cases**: {}\n", self.totals.total));
        md.push_str(&format!(
            "- **Result**: {}\n\n",
            if self.is_success() { "PASS" } else { "FAIL" }
        ));

        md.push_str("## Summary\n\n");
        md.push_str("| Group | Total | Passed | Failed | Skipped | Errored |\n");
        md.push_str("|-------|-------|--------|--------|---------|---------|\n");
        push_counts_row(&mut md, "**All**", &self.totals);
        for dim in self.by_architecture.iter().chain(&self.by_format) {
            push_counts_row(&mut md, &dim.name, &dim.counts);
        }
        md.push('\n');

        md.push_str("## Cases\n\n");
        md.push_str("| Case | Architecture | Format | Outcome | Elapsed (ms) |\n");
        md.push_str("|------|--------------|--------|---------|--------------|\n");
        for case in &self.cases {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                case.name, case.architecture, case.format, case.outcome, case.elapsed_ms
            ));
        }
        md.push('\n');

        let problems: Vec<_> = self
            .cases
            .iter()
            .filter(|c| c.outcome != OutcomeKind::Passed)
            .collect();
        if !problems.is_empty() {
            md.push_str("## Details\n\n");
            for case in problems {
                md.push_str(&format!("### {} ({})\n\n", case.name, case.outcome));
                md.push_str(&format!("- Sample: `{}`\n", case.sample));
                if let Some(reason) = &case.reason {
                    md.push_str(&format!("- Reason: {}\n", reason));
                }
                for mismatch in &case.mismatches {
                    md.push_str(&format!("- {}\n", mismatch));
                }
                md.push('\n');
            }
        }

        md
    }

    /// Write `report.json` atomically.
    pub fn write_json<F: Filesystem>(&self, fs: &F, path: &Path) -> Result<(), FsError> {
        fs.write_atomic(path, self.to_json().as_bytes())
    }

    pub fn write_markdown<F: Filesystem>(&self, fs: &F, path: &Path) -> Result<(), FsError> {
        fs.write_atomic(path, self.to_markdown().as_bytes())
    }
}

fn summarize<'a>(
    name: &str,
    cases: impl Iterator<Item = &'a CaseReport>,
) -> Option<DimensionSummary> {
    let mut counts = OutcomeCounts::default();
    for case in cases {
        counts.record(case.outcome);
    }
    (counts.total > 0).then(|| DimensionSummary {
        name: name.to_string(),
        counts,
    })
}

/// Serde adapter writing an enum through `Display` and reading it back
/// through `FromStr`.
mod display_name {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

fn push_counts_row(md: &mut String, label: &str, counts: &OutcomeCounts) {
    md.push_str(&format!(
        "| {} | {} | {} | {} | {} | {} |\n",
        label, counts.total, counts.passed, counts.failed, counts.skipped, counts.errored
    ));
}
