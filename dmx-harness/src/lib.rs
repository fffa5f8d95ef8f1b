//! dmx harness
//!
//! Runs a declared matrix of decompilation test cases against an external
//! decompiler and compares recovered structure with expected facts.
//!
//! # Pipeline
//!
//! 1. [`registry`]: load and validate the case catalog
//! 2. [`resolver`]: locate each sample in the fixture corpus
//! 3. [`driver`]: run the decompiler under a timeout in a scratch directory
//! 4. [`facts`]: extract observed facts and compare with expectations
//! 5. [`runner`]: execute cases in parallel and aggregate a [`RunReport`]

pub mod cancel;
pub mod config;
pub mod driver;
pub mod facts;
pub mod logger;
pub mod outcome;
pub mod preflight;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod runner;

pub use cancel::{CancelToken, Cancellation, NeverCancel};
pub use config::{ConfigError, DecompilerCommand, HarnessConfig, ScratchPolicy};
pub use driver::{
    DecompilationResult, DecompileRequest, Decompiler, Driver, DriverError, ProcessDecompiler,
};
pub use facts::{compare, evaluate, extract, Mismatch, MismatchKind, ObservedFacts};
pub use logger::{Logger, MockLogger, NullLogger, StderrLogger, Verbosity};
pub use outcome::{CaseState, Outcome, OutcomeKind};
pub use preflight::{preflight, PreflightError};
pub use registry::{load_catalog, CatalogError, Registry, RegistryBuilder, RegistryError};
pub use report::{CaseReport, DimensionSummary, OutcomeCounts, RunReport, REPORT_VERSION};
pub use resolver::{Resolution, ResolveError, ResolvedSample, SampleResolver};
pub use runner::MatrixRunner;
