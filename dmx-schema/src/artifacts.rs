//! Output contract of the decompiler collaborator.
//!
//! The collaborator prints one JSON document:
//!
//! ```json
//! {
//!   "success": true,
//!   "artifacts": {
//!     "functions": ["main", {"name": "helper", "address": 4198500}],
//!     "cfg": {"main": {"entry": 0, "blocks": [0, 1, 2], "edges": [[0, 1], [0, 2]]}},
//!     "callingConventions": {"main": "cdecl"}
//!   },
//!   "diagnostics": "..."
//! }
//! ```
//!
//! Unknown fields are ignored so newer collaborators stay compatible.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Top-level collaborator response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompileOutput {
    pub success: bool,
    #[serde(default)]
    pub artifacts: Artifacts,
    #[serde(default)]
    pub diagnostics: String,
}

impl DecompileOutput {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("DecompileOutput serialization cannot fail")
    }
}

/// Structural artifacts recovered by the collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Artifacts {
    pub functions: Vec<FunctionArtifact>,
    pub cfg: BTreeMap<String, CfgArtifact>,
    #[serde(rename = "callingConventions", alias = "calling_conventions")]
    pub calling_conventions: BTreeMap<String, String>,
}

impl Artifacts {
    pub fn with_function(mut self, name: impl Into<String>) -> Self {
        self.functions.push(FunctionArtifact::Name(name.into()));
        self
    }

    pub fn with_function_at(mut self, name: impl Into<String>, address: u64) -> Self {
        self.functions.push(FunctionArtifact::Detailed {
            name: Some(name.into()),
            address: Some(address),
        });
        self
    }

    pub fn with_cfg(mut self, function: impl Into<String>, cfg: CfgArtifact) -> Self {
        self.cfg.insert(function.into(), cfg);
        self
    }

    pub fn with_calling_convention(
        mut self,
        function: impl Into<String>,
        convention: impl Into<String>,
    ) -> Self {
        self.calling_conventions
            .insert(function.into(), convention.into());
        self
    }
}

/// A recovered function, either a bare name or a detailed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FunctionArtifact {
    Name(String),
    Detailed {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        address: Option<u64>,
    },
}

impl FunctionArtifact {
    pub fn name(&self) -> Option<&str> {
        match self {
            FunctionArtifact::Name(n) => Some(n),
            FunctionArtifact::Detailed { name, .. } => name.as_deref(),
        }
    }

    pub fn address(&self) -> Option<u64> {
        match self {
            FunctionArtifact::Name(_) => None,
            FunctionArtifact::Detailed { address, .. } => *address,
        }
    }
}

/// Basic block identifier: collaborators use either numbers or labels.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockId {
    Index(u64),
    Label(String),
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockId::Index(i) => write!(f, "{}", i),
            BlockId::Label(l) => f.write_str(l),
        }
    }
}

impl From<u64> for BlockId {
    fn from(value: u64) -> Self {
        BlockId::Index(value)
    }
}

impl From<&str> for BlockId {
    fn from(value: &str) -> Self {
        BlockId::Label(value.to_string())
    }
}

/// Control-flow graph of one function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CfgArtifact {
    /// Entry block; defaults to the first listed block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<BlockId>,
    pub blocks: Vec<BlockId>,
    pub edges: Vec<(BlockId, BlockId)>,
}

impl CfgArtifact {
    /// Build a CFG over numbered blocks `0..block_count`.
    pub fn numbered(block_count: u64, edges: &[(u64, u64)]) -> Self {
        Self {
            entry: None,
            blocks: (0..block_count).map(BlockId::Index).collect(),
            edges: edges
                .iter()
                .map(|&(from, to)| (BlockId::Index(from), BlockId::Index(to)))
                .collect(),
        }
    }
}
