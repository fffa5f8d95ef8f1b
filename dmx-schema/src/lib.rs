//! dmx schema
//!
//! Data model shared by the harness and the CLI: architectures and their
//! profiles, test cases with expected facts, and the decompiler output
//! contract.

mod arch;
mod artifacts;
mod case;

pub use arch::{ArchProfile, Architecture, CallingConvention, ObjectFormat, ParseEnumError};
pub use artifacts::{Artifacts, BlockId, CfgArtifact, DecompileOutput, FunctionArtifact};
pub use case::{CfgExpectation, ExpectedFacts, FunctionExpectation, SampleRef, TestCase};
