//! Fact extraction and comparison.
//!
//! Observed facts are structural: the set of recovered functions, the shape
//! of each function's control-flow graph, and the calling convention the
//! collaborator assigned. Expected facts are partial; only what a case lists
//! is compared, and every comparison runs even after an earlier one fails.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;

use dmx_schema::{
    Architecture, Artifacts, BlockId, CallingConvention, CfgArtifact, CfgExpectation,
    ExpectedFacts,
};
use serde::{Deserialize, Serialize};

use crate::driver::DecompilationResult;

/// A recovered function.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObservedFunction {
    pub name: Option<String>,
    pub address: Option<u64>,
}

/// Measured shape of one control-flow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfgShape {
    pub blocks: usize,
    pub edges: usize,
    /// Blocks reachable from the entry block, entry included.
    pub reachable: usize,
}

/// Facts extracted from a successful decompilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedFacts {
    pub functions: BTreeSet<ObservedFunction>,
    pub cfgs: BTreeMap<String, CfgShape>,
    /// Raw convention strings as reported, keyed by function.
    pub calling_conventions: BTreeMap<String, String>,
}

impl ObservedFacts {
    pub fn from_artifacts(artifacts: &Artifacts) -> Self {
        let functions = artifacts
            .functions
            .iter()
            .map(|f| ObservedFunction {
                name: f.name().map(str::to_string),
                address: f.address(),
            })
            .collect();
        let cfgs = artifacts
            .cfg
            .iter()
            .map(|(function, cfg)| (function.clone(), measure_cfg(cfg)))
            .collect();
        Self {
            functions,
            cfgs,
            calling_conventions: artifacts.calling_conventions.clone(),
        }
    }

    pub fn with_function(mut self, name: impl Into<String>) -> Self {
        self.functions.insert(ObservedFunction {
            name: Some(name.into()),
            address: None,
        });
        self
    }

    fn has_function(&self, name: Option<&str>, address: Option<u64>) -> bool {
        self.functions.iter().any(|f| {
            name.map_or(true, |n| f.name.as_deref() == Some(n))
                && address.map_or(true, |a| f.address == Some(a))
        })
    }
}

/// Observed facts of a decompilation, or `None` when it did not succeed.
pub fn extract(result: &DecompilationResult) -> Option<ObservedFacts> {
    match result {
        DecompilationResult::Success(artifacts) => Some(ObservedFacts::from_artifacts(artifacts)),
        _ => None,
    }
}

/// Block count and edge count ignore duplicates. Reachability follows only
/// edges between listed blocks, starting at the entry (default: first block).
pub fn measure_cfg(cfg: &CfgArtifact) -> CfgShape {
    let blocks: BTreeSet<&BlockId> = cfg.blocks.iter().collect();
    let edges: BTreeSet<(&BlockId, &BlockId)> = cfg.edges.iter().map(|(a, b)| (a, b)).collect();

    let mut successors: HashMap<&BlockId, Vec<&BlockId>> = HashMap::new();
    for &(from, to) in &edges {
        if blocks.contains(from) && blocks.contains(to) {
            successors.entry(from).or_default().push(to);
        }
    }

    let entry = cfg.entry.as_ref().or_else(|| cfg.blocks.first());
    let mut reachable = BTreeSet::new();
    if let Some(entry) = entry.filter(|e| blocks.contains(e)) {
        let mut queue = VecDeque::from([entry]);
        reachable.insert(entry);
        while let Some(block) = queue.pop_front() {
            for &next in successors.get(block).into_iter().flatten() {
                if reachable.insert(next) {
                    queue.push_back(next);
                }
            }
        }
    }

    CfgShape {
        blocks: blocks.len(),
        edges: edges.len(),
        reachable: reachable.len(),
    }
}

/// Kind of an unmet expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MismatchKind {
    MissingFunction,
    MissingCfg,
    CfgBlockCount,
    CfgEdgeCount,
    CfgReachability,
    MissingCallingConvention,
    CallingConvention,
    InvalidCallingConvention,
    DecompilationFailed,
    Timeout,
}

impl MismatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MismatchKind::MissingFunction => "missing-function",
            MismatchKind::MissingCfg => "missing-cfg",
            MismatchKind::CfgBlockCount => "cfg-block-count",
            MismatchKind::CfgEdgeCount => "cfg-edge-count",
            MismatchKind::CfgReachability => "cfg-reachability",
            MismatchKind::MissingCallingConvention => "missing-calling-convention",
            MismatchKind::CallingConvention => "calling-convention",
            MismatchKind::InvalidCallingConvention => "invalid-calling-convention",
            MismatchKind::DecompilationFailed => "decompilation-failed",
            MismatchKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unmet expectation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub kind: MismatchKind,
    /// Function the mismatch is about, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub expected: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<String>,
    /// The case is known to produce varying collaborator output.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nondeterministic: bool,
}

impl Mismatch {
    pub fn new(kind: MismatchKind, expected: impl Into<String>) -> Self {
        Self {
            kind,
            subject: None,
            expected: expected.into(),
            observed: None,
            nondeterministic: false,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_observed(mut self, observed: impl Into<String>) -> Self {
        self.observed = Some(observed.into());
        self
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(subject) = &self.subject {
            write!(f, " [{}]", subject)?;
        }
        write!(f, ": expected {}", self.expected)?;
        match &self.observed {
            Some(observed) => write!(f, ", observed {}", observed)?,
            None => write!(f, ", observed nothing")?,
        }
        if self.nondeterministic {
            f.write_str(" (nondeterministic)")?;
        }
        Ok(())
    }
}

/// Compare observed against expected facts for a case on `architecture`.
///
/// Observed calling conventions are validated even when no convention is
/// expected: a value outside the architecture's set is invalid output.
pub fn compare(
    observed: &ObservedFacts,
    expected: &ExpectedFacts,
    architecture: Architecture,
) -> Vec<Mismatch> {
    let mut mismatches = Vec::new();
    compare_functions(observed, expected, &mut mismatches);
    compare_cfgs(observed, expected, &mut mismatches);
    compare_conventions(observed, expected, architecture, &mut mismatches);

    if expected.nondeterministic {
        for mismatch in &mut mismatches {
            mismatch.nondeterministic = true;
        }
    }
    mismatches
}

/// Judge a decompilation result. Empty means the case passed.
pub fn evaluate(
    result: &DecompilationResult,
    expected: Option<&ExpectedFacts>,
    architecture: Architecture,
) -> Vec<Mismatch> {
    let nondeterministic = expected.map_or(false, |e| e.nondeterministic);
    let failure = match result {
        DecompilationResult::Success(_) => None,
        DecompilationResult::Failure { error, diagnostic } => {
            let observed = if diagnostic.trim().is_empty() {
                error.clone()
            } else {
                format!("{}: {}", error, diagnostic.trim())
            };
            let want = "successful decompilation";
            Some(Mismatch::new(MismatchKind::DecompilationFailed, want).with_observed(observed))
        }
        DecompilationResult::Timeout { limit } => {
            let want = format!("completion within {} ms", limit.as_millis());
            Some(Mismatch::new(MismatchKind::Timeout, want).with_observed("timed out"))
        }
    };
    if let Some(mut mismatch) = failure {
        mismatch.nondeterministic = nondeterministic;
        return vec![mismatch];
    }

    let Some(observed) = extract(result) else {
        return Vec::new();
    };
    let no_expectations = ExpectedFacts::default();
    compare(&observed, expected.unwrap_or(&no_expectations), architecture)
}

fn compare_functions(observed: &ObservedFacts, expected: &ExpectedFacts, out: &mut Vec<Mismatch>) {
    for function in &expected.functions {
        if !observed.has_function(function.name(), function.address()) {
            out.push(Mismatch::new(MismatchKind::MissingFunction, function.label()));
        }
    }
}

fn compare_cfgs(observed: &ObservedFacts, expected: &ExpectedFacts, out: &mut Vec<Mismatch>) {
    for (function, want) in &expected.cfg {
        let Some(shape) = observed.cfgs.get(function) else {
            let mismatch = Mismatch::new(MismatchKind::MissingCfg, "control-flow graph");
            out.push(mismatch.with_subject(function));
            continue;
        };
        compare_cfg_shape(function, want, shape, out);
    }
}

fn compare_cfg_shape(
    function: &str,
    want: &CfgExpectation,
    shape: &CfgShape,
    out: &mut Vec<Mismatch>,
) {
    let mut count = |kind: MismatchKind, expected: usize, observed: usize, unit: &str| {
        if expected != observed {
            out.push(
                Mismatch::new(kind, format!("{} {}", expected, unit))
                    .with_subject(function)
                    .with_observed(format!("{} {}", observed, unit)),
            );
        }
    };
    if let Some(blocks) = want.blocks {
        count(MismatchKind::CfgBlockCount, blocks, shape.blocks, "blocks");
    }
    if let Some(edges) = want.edges {
        count(MismatchKind::CfgEdgeCount, edges, shape.edges, "edges");
    }
    if let Some(reachable) = want.reachable_blocks {
        count(MismatchKind::CfgReachability, reachable, shape.reachable, "reachable blocks");
    }
    if want.all_reachable == Some(true) && shape.reachable != shape.blocks {
        let expected = format!("all {} blocks reachable", shape.blocks);
        out.push(
            Mismatch::new(MismatchKind::CfgReachability, expected)
                .with_subject(function)
                .with_observed(format!("{} reachable blocks", shape.reachable)),
        );
    }
}

fn compare_conventions(
    observed: &ObservedFacts,
    expected: &ExpectedFacts,
    architecture: Architecture,
    out: &mut Vec<Mismatch>,
) {
    let allowed = architecture.profile().calling_conventions;
    let valid = |raw: &str| {
        CallingConvention::parse_observed(raw).filter(|cc| allowed.contains(cc))
    };

    for (function, raw) in &observed.calling_conventions {
        if valid(raw).is_none() {
            out.push(
                Mismatch::new(
                    MismatchKind::InvalidCallingConvention,
                    format!("{} convention ({})", architecture, join_conventions(allowed)),
                )
                .with_subject(function)
                .with_observed(raw.clone()),
            );
        }
    }

    for (function, want) in &expected.calling_conventions {
        match observed.calling_conventions.get(function) {
            None => out.push(
                Mismatch::new(MismatchKind::MissingCallingConvention, want.as_str())
                    .with_subject(function),
            ),
            // Invalid values were reported above.
            Some(raw) => match valid(raw) {
                Some(got) if got != *want => out.push(
                    Mismatch::new(MismatchKind::CallingConvention, want.as_str())
                        .with_subject(function)
                        .with_observed(got.as_str()),
                ),
                _ => {}
            },
        }
    }
}

fn join_conventions(conventions: &[CallingConvention]) -> String {
    conventions
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn observed(artifacts: Artifacts) -> ObservedFacts {
        ObservedFacts::from_artifacts(&artifacts)
    }

    // --- extraction ---

    #[test]
    fn test_extract_only_on_success() {
        assert!(extract(&DecompilationResult::failure("boom", "")).is_none());
        assert!(extract(&DecompilationResult::Timeout {
            limit: Duration::from_secs(1)
        })
        .is_none());
        let success = DecompilationResult::Success(Artifacts::default().with_function("main"));
        let facts = extract(&success).unwrap();
        assert!(facts.has_function(Some("main"), None));
    }

    #[test]
    fn test_measure_cfg_diamond() {
        let cfg = CfgArtifact::numbered(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        assert_eq!(
            measure_cfg(&cfg),
            CfgShape {
                blocks: 4,
                edges: 4,
                reachable: 4
            }
        );
    }

    #[test]
    fn test_measure_cfg_unreachable_and_duplicates() {
        let cfg = CfgArtifact::numbered(4, &[(0, 1), (0, 1), (2, 3), (1, 9)]);
        let shape = measure_cfg(&cfg);
        assert_eq!(shape.blocks, 4);
        assert_eq!(shape.edges, 3);
        assert_eq!(shape.reachable, 2);
    }

    #[test]
    fn test_measure_cfg_explicit_entry() {
        let mut cfg = CfgArtifact::numbered(3, &[(1, 2), (2, 0)]);
        cfg.entry = Some(BlockId::Index(1));
        assert_eq!(measure_cfg(&cfg).reachable, 3);

        cfg.entry = Some(BlockId::from("missing"));
        assert_eq!(measure_cfg(&cfg).reachable, 0);
    }

    #[test]
    fn test_measure_cfg_empty() {
        let shape = measure_cfg(&CfgArtifact::default());
        assert_eq!(shape, CfgShape { blocks: 0, edges: 0, reachable: 0 });
    }

    #[test]
    fn test_measure_cfg_self_loop() {
        let cfg = CfgArtifact::numbered(1, &[(0, 0)]);
        assert_eq!(measure_cfg(&cfg), CfgShape { blocks: 1, edges: 1, reachable: 1 });
    }

    // --- functions ---

    #[test]
    fn test_superset_of_functions_passes() {
        let facts = observed(Artifacts::default().with_function("main").with_function("helper"));
        let expected = ExpectedFacts::new().with_function("main");
        assert!(compare(&facts, &expected, Architecture::X86).is_empty());
    }

    #[test]
    fn test_missing_function() {
        let facts = observed(Artifacts::default().with_function("helper"));
        let expected = ExpectedFacts::new().with_function("main");
        let mismatches = compare(&facts, &expected, Architecture::X86);
        assert_eq!(mismatches, vec![Mismatch::new(MismatchKind::MissingFunction, "main")]);
    }

    #[test]
    fn test_function_by_address() {
        let facts = observed(Artifacts::default().with_function_at("sub_401000", 0x401000));
        let expected = ExpectedFacts::new().with_function_at(0x401000);
        assert!(compare(&facts, &expected, Architecture::X86).is_empty());

        let expected = ExpectedFacts::new().with_function_at(0x402000);
        let mismatches = compare(&facts, &expected, Architecture::X86);
        assert_eq!(mismatches[0].expected, "0x402000");
    }

    #[test]
    fn test_function_name_and_address_must_match_same_record() {
        let facts = observed(
            Artifacts::default()
                .with_function_at("main", 0x1000)
                .with_function_at("helper", 0x2000),
        );
        let mut expected = ExpectedFacts::new();
        expected.functions.push(dmx_schema::FunctionExpectation::Detailed {
            name: Some("main".into()),
            address: Some(0x2000),
        });
        let mismatches = compare(&facts, &expected, Architecture::X86);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].expected, "main@0x2000");
    }

    #[test]
    fn test_adding_functions_is_monotonic() {
        let expected = ExpectedFacts::new().with_function("main").with_function("init");
        let mut facts = ObservedFacts::default().with_function("main").with_function("init");
        assert!(compare(&facts, &expected, Architecture::Mips).is_empty());
        for extra in ["a", "b", "sub_1234", "main_0"] {
            facts = facts.with_function(extra);
            assert!(compare(&facts, &expected, Architecture::Mips).is_empty());
        }
    }

    // --- cfg ---

    #[test]
    fn test_cfg_shape_matches() {
        let cfg = CfgArtifact::numbered(3, &[(0, 1), (1, 2)]);
        let facts = observed(Artifacts::default().with_cfg("main", cfg));
        let expected =
            ExpectedFacts::new().with_cfg("main", CfgExpectation::shape(3, 2).with_all_reachable());
        assert!(compare(&facts, &expected, Architecture::Arm).is_empty());
    }

    #[test]
    fn test_cfg_mismatches_do_not_short_circuit() {
        let cfg = CfgArtifact::numbered(4, &[(0, 1)]);
        let facts = observed(Artifacts::default().with_cfg("main", cfg));
        let expected = ExpectedFacts::new()
            .with_cfg("main", CfgExpectation::shape(3, 2).with_all_reachable())
            .with_cfg("helper", CfgExpectation::shape(1, 0));
        let kinds: Vec<_> = compare(&facts, &expected, Architecture::Arm)
            .into_iter()
            .map(|m| m.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                MismatchKind::MissingCfg,
                MismatchKind::CfgBlockCount,
                MismatchKind::CfgEdgeCount,
                MismatchKind::CfgReachability,
            ]
        );
    }

    #[test]
    fn test_cfg_reachable_count() {
        let cfg = CfgArtifact::numbered(3, &[(0, 1)]);
        let facts = observed(Artifacts::default().with_cfg("f", cfg));
        let expected =
            ExpectedFacts::new().with_cfg("f", CfgExpectation::default().with_reachable_blocks(3));
        let mismatches = compare(&facts, &expected, Architecture::Arm64);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].kind, MismatchKind::CfgReachability);
        assert_eq!(mismatches[0].observed.as_deref(), Some("2 reachable blocks"));
    }

    // --- calling conventions ---

    #[test]
    fn test_convention_exact_match_with_alias() {
        let facts =
            observed(Artifacts::default().with_calling_convention("main", "System V AMD64"));
        let expected =
            ExpectedFacts::new().with_calling_convention("main", CallingConvention::SysV);
        assert!(compare(&facts, &expected, Architecture::X86_64).is_empty());
    }

    #[test]
    fn test_convention_mismatch() {
        let facts = observed(Artifacts::default().with_calling_convention("main", "stdcall"));
        let expected =
            ExpectedFacts::new().with_calling_convention("main", CallingConvention::Cdecl);
        let mismatches = compare(&facts, &expected, Architecture::X86);
        assert_eq!(
            mismatches,
            vec![Mismatch::new(MismatchKind::CallingConvention, "cdecl")
                .with_subject("main")
                .with_observed("stdcall")]
        );
    }

    #[test]
    fn test_missing_convention() {
        let facts = observed(Artifacts::default().with_function("main"));
        let expected =
            ExpectedFacts::new().with_calling_convention("main", CallingConvention::Aapcs);
        let mismatches = compare(&facts, &expected, Architecture::Arm);
        assert_eq!(mismatches[0].kind, MismatchKind::MissingCallingConvention);
    }

    #[test]
    fn test_convention_outside_architecture_is_invalid() {
        // cdecl is a real convention, but not an ARM one.
        let facts = observed(Artifacts::default().with_calling_convention("main", "cdecl"));
        let mismatches = compare(&facts, &ExpectedFacts::new(), Architecture::Arm);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].kind, MismatchKind::InvalidCallingConvention);
        assert_eq!(mismatches[0].observed.as_deref(), Some("cdecl"));
        assert!(mismatches[0].expected.contains("aapcs"));
    }

    #[test]
    fn test_unknown_convention_on_expected_function_reported_once() {
        let facts = observed(Artifacts::default().with_calling_convention("main", "pascal"));
        let expected =
            ExpectedFacts::new().with_calling_convention("main", CallingConvention::Stdcall);
        let mismatches = compare(&facts, &expected, Architecture::X86);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].kind, MismatchKind::InvalidCallingConvention);
    }

    // --- nondeterminism and evaluation ---

    #[test]
    fn test_nondeterministic_tag() {
        let facts = observed(Artifacts::default());
        let expected = ExpectedFacts::new()
            .with_function("main")
            .with_function("init")
            .nondeterministic();
        let mismatches = compare(&facts, &expected, Architecture::PowerPc);
        assert_eq!(mismatches.len(), 2);
        assert!(mismatches.iter().all(|m| m.nondeterministic));
    }

    #[test]
    fn test_evaluate_without_expectations() {
        let success = DecompilationResult::Success(Artifacts::default().with_function("main"));
        assert!(evaluate(&success, None, Architecture::X86).is_empty());

        // Output is still validated.
        let bad = DecompilationResult::Success(
            Artifacts::default().with_calling_convention("main", "aapcs"),
        );
        assert_eq!(evaluate(&bad, None, Architecture::X86).len(), 1);
    }

    #[test]
    fn test_evaluate_failure() {
        let result =
            DecompilationResult::failure("collaborator exited with code 139", "segfault\n");
        let expected = ExpectedFacts::new().with_function("main");
        let mismatches = evaluate(&result, Some(&expected), Architecture::X86);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].kind, MismatchKind::DecompilationFailed);
        assert_eq!(
            mismatches[0].observed.as_deref(),
            Some("collaborator exited with code 139: segfault")
        );
    }

    #[test]
    fn test_evaluate_timeout() {
        let result = DecompilationResult::Timeout {
            limit: Duration::from_millis(1500),
        };
        let expected = ExpectedFacts::new().nondeterministic();
        let mismatches = evaluate(&result, Some(&expected), Architecture::Mips);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].kind, MismatchKind::Timeout);
        assert_eq!(mismatches[0].expected, "completion within 1500 ms");
        assert!(mismatches[0].nondeterministic);
    }

    #[test]
    fn test_mismatch_display() {
        let m = Mismatch::new(MismatchKind::CallingConvention, "cdecl")
            .with_subject("main")
            .with_observed("stdcall");
        assert_eq!(m.to_string(), "calling-convention [main]: expected cdecl, observed stdcall");
        assert_eq!(
            Mismatch::new(MismatchKind::MissingFunction, "main").to_string(),
            "missing-function: expected main, observed nothing"
        );
    }

    #[test]
    fn test_mismatch_serialization() {
        let mismatch = Mismatch::new(MismatchKind::MissingFunction, "main");
        let json = serde_json::to_string(&mismatch).unwrap();
        assert_eq!(json, r#"{"kind":"missing-function","expected":"main"}"#);
    }
}
