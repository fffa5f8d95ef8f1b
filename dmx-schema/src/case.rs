//! Test case and expected-fact types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::arch::{Architecture, CallingConvention, ObjectFormat};

/// Reference to a binary fixture inside the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleRef {
    /// Path relative to the corpus root.
    Path(PathBuf),
    /// Content-addressed sample stored under `by-sha256/<hex>`.
    Digest { sha256: String },
}

impl SampleRef {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        SampleRef::Path(path.into())
    }

    pub fn sha256(hex: impl Into<String>) -> Self {
        SampleRef::Digest {
            sha256: hex.into().to_ascii_lowercase(),
        }
    }

    /// Human-readable form used in logs and reports.
    pub fn describe(&self) -> String {
        match self {
            SampleRef::Path(p) => p.display().to_string(),
            SampleRef::Digest { sha256 } => format!("sha256:{}", sha256),
        }
    }
}

/// One expected function, by name, address or both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, from = "RawFunctionExpectation")]
pub enum FunctionExpectation {
    Name(String),
    Detailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<u64>,
    },
}

/// Catalog form of [`FunctionExpectation`]. The object form rejects keys
/// other than `name` and `address`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawFunctionExpectation {
    Name(String),
    Detailed(FunctionFields),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FunctionFields {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<u64>,
}

impl From<RawFunctionExpectation> for FunctionExpectation {
    fn from(raw: RawFunctionExpectation) -> Self {
        match raw {
            RawFunctionExpectation::Name(name) => FunctionExpectation::Name(name),
            RawFunctionExpectation::Detailed(FunctionFields { name, address }) => {
                FunctionExpectation::Detailed { name, address }
            }
        }
    }
}

impl FunctionExpectation {
    pub fn named(name: impl Into<String>) -> Self {
        FunctionExpectation::Name(name.into())
    }

    pub fn at(address: u64) -> Self {
        FunctionExpectation::Detailed {
            name: None,
            address: Some(address),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            FunctionExpectation::Name(n) => Some(n),
            FunctionExpectation::Detailed { name, .. } => name.as_deref(),
        }
    }

    pub fn address(&self) -> Option<u64> {
        match self {
            FunctionExpectation::Name(_) => None,
            FunctionExpectation::Detailed { address, .. } => *address,
        }
    }

    /// Label used as the mismatch subject.
    pub fn label(&self) -> String {
        match (self.name(), self.address()) {
            (Some(n), Some(a)) => format!("{}@{:#x}", n, a),
            (Some(n), None) => n.to_string(),
            (None, Some(a)) => format!("{:#x}", a),
            (None, None) => "<unnamed>".to_string(),
        }
    }
}

/// Expected control-flow graph shape of a single function.
///
/// Every field is optional; only the fields present are compared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CfgExpectation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edges: Option<usize>,
    /// Number of blocks reachable from the entry block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reachable_blocks: Option<usize>,
    /// Every block must be reachable from the entry block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_reachable: Option<bool>,
}

impl CfgExpectation {
    pub fn shape(blocks: usize, edges: usize) -> Self {
        Self {
            blocks: Some(blocks),
            edges: Some(edges),
            ..Self::default()
        }
    }

    pub fn with_all_reachable(mut self) -> Self {
        self.all_reachable = Some(true);
        self
    }

    pub fn with_reachable_blocks(mut self, count: usize) -> Self {
        self.reachable_blocks = Some(count);
        self
    }
}

/// Partial set of structural facts a case expects.
///
/// Facts that are not listed are not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExpectedFacts {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<FunctionExpectation>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub cfg: BTreeMap<String, CfgExpectation>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub calling_conventions: BTreeMap<String, CallingConvention>,
    /// The collaborator is known to produce varying output for this case.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub nondeterministic: bool,
}

impl ExpectedFacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function(mut self, name: impl Into<String>) -> Self {
        self.functions.push(FunctionExpectation::named(name));
        self
    }

    pub fn with_function_at(mut self, address: u64) -> Self {
        self.functions.push(FunctionExpectation::at(address));
        self
    }

    pub fn with_cfg(mut self, function: impl Into<String>, cfg: CfgExpectation) -> Self {
        self.cfg.insert(function.into(), cfg);
        self
    }

    pub fn with_calling_convention(
        mut self,
        function: impl Into<String>,
        convention: CallingConvention,
    ) -> Self {
        self.calling_conventions.insert(function.into(), convention);
        self
    }

    pub fn nondeterministic(mut self) -> Self {
        self.nondeterministic = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.cfg.is_empty() && self.calling_conventions.is_empty()
    }
}

/// A single entry of the test matrix.
///
/// Unlike collaborator output, catalog entries reject unknown keys: a
/// misspelled expectation would otherwise check nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestCase {
    pub name: String,
    pub architecture: Architecture,
    pub format: ObjectFormat,
    pub sample: SampleRef,
    /// `None` means the case only checks that decompilation succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<ExpectedFacts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Extra options forwarded verbatim to the decompiler.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl TestCase {
    pub fn new(
        name: impl Into<String>,
        architecture: Architecture,
        format: ObjectFormat,
        sample: SampleRef,
    ) -> Self {
        Self {
            name: name.into(),
            architecture,
            format,
            sample,
            expected: None,
            timeout_ms: None,
            options: BTreeMap::new(),
        }
    }

    pub fn with_expected(mut self, expected: ExpectedFacts) -> Self {
        self.expected = Some(expected);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}
