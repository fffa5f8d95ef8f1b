//! Test case registry and catalog loading.
//!
//! A [`Registry`] is an immutable, ordered list of validated cases. Cases are
//! data: new architectures or formats only need new catalog entries.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use dmx_fs::{Filesystem, FsError};
use dmx_schema::{
    Architecture, CallingConvention, CfgExpectation, ExpectedFacts, ObjectFormat, SampleRef,
    TestCase,
};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Errors raised when freezing a registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("case name must not be empty")]
    EmptyName,

    #[error("invalid case name {0:?}: use letters, digits, '_', '-' or '.'")]
    InvalidName(String),

    #[error("duplicate case name: {0}")]
    DuplicateName(String),

    #[error("case {case}: function expectation needs a name or an address")]
    EmptyFunction { case: String },

    #[error(
        "case {case}: {convention} is not a {architecture} calling convention (function {function})"
    )]
    UnsupportedConvention {
        case: String,
        function: String,
        convention: String,
        architecture: String,
    },

    #[error("case {case}: inconsistent cfg expectation for {function}: {reason}")]
    InconsistentCfg {
        case: String,
        function: String,
        reason: String,
    },

    #[error("case {case}: cfg expectation for {function} checks nothing")]
    EmptyCfg { case: String, function: String },

    #[error("case {case}: timeout_ms must be at least 1")]
    ZeroTimeout { case: String },
}

/// Errors from loading a catalog from disk.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: FsError,
    },

    #[error("failed to parse catalog {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid catalog pattern: {0}")]
    Pattern(String),

    #[error("no catalog files in {0}")]
    Empty(PathBuf),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Ordered, validated set of test cases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    cases: Vec<TestCase>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The default matrix: one minimal program per supported target.
    pub fn builtin() -> Registry {
        let main = |cc: CallingConvention| {
            ExpectedFacts::new()
                .with_function("main")
                .with_calling_convention("main", cc)
        };
        Registry::builder()
            .add(
                TestCase::new(
                    "simple_x86",
                    Architecture::X86,
                    ObjectFormat::Pe,
                    SampleRef::path("simple_x86.exe"),
                )
                .with_expected(main(CallingConvention::Cdecl)),
            )
            .add(
                TestCase::new(
                    "simple_x64",
                    Architecture::X86_64,
                    ObjectFormat::Pe,
                    SampleRef::path("simple_x64.exe"),
                )
                .with_expected(main(CallingConvention::Microsoft)),
            )
            .add(
                TestCase::new(
                    "simple_elf_x64",
                    Architecture::X86_64,
                    ObjectFormat::Elf,
                    SampleRef::path("simple_x64.elf"),
                )
                .with_expected(main(CallingConvention::SysV)),
            )
            .add(
                TestCase::new(
                    "simple_arm",
                    Architecture::Arm,
                    ObjectFormat::Elf,
                    SampleRef::path("simple_arm.elf"),
                )
                .with_expected(main(CallingConvention::Aapcs)),
            )
            .add(
                TestCase::new(
                    "simple_arm64",
                    Architecture::Arm64,
                    ObjectFormat::Elf,
                    SampleRef::path("simple_arm64.elf"),
                )
                .with_expected(main(CallingConvention::Aapcs64)),
            )
            .add(
                TestCase::new(
                    "simple_mips",
                    Architecture::Mips,
                    ObjectFormat::Elf,
                    SampleRef::path("simple_mips.elf"),
                )
                .with_expected(main(CallingConvention::MipsO32)),
            )
            .add(
                TestCase::new(
                    "simple_powerpc",
                    Architecture::PowerPc,
                    ObjectFormat::Elf,
                    SampleRef::path("simple_powerpc.elf"),
                )
                .with_expected(main(CallingConvention::PpcSysV)),
            )
            .build()
            .expect("built-in catalog is valid")
    }

    /// All cases in declaration order.
    pub fn list_cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn cases_for_architecture(&self, architecture: Architecture) -> Vec<&TestCase> {
        self.cases
            .iter()
            .filter(|c| c.architecture == architecture)
            .collect()
    }

    pub fn cases_for_format(&self, format: ObjectFormat) -> Vec<&TestCase> {
        self.cases.iter().filter(|c| c.format == format).collect()
    }

    pub fn get(&self, name: &str) -> Option<&TestCase> {
        self.cases.iter().find(|c| c.name == name)
    }

    /// Subset whose names match `pattern`, keeping order.
    pub fn filtered(&self, pattern: &Regex) -> Registry {
        self.retain(|c| pattern.is_match(&c.name))
    }

    /// Subset restricted to the given architectures. Empty means all.
    pub fn for_architectures(&self, architectures: &[Architecture]) -> Registry {
        if architectures.is_empty() {
            return self.clone();
        }
        self.retain(|c| architectures.contains(&c.architecture))
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    fn retain(&self, keep: impl Fn(&TestCase) -> bool) -> Registry {
        Registry {
            cases: self.cases.iter().filter(|c| keep(c)).cloned().collect(),
        }
    }
}

/// Collects cases and validates them once in [`RegistryBuilder::build`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    cases: Vec<TestCase>,
}

impl RegistryBuilder {
    pub fn add(mut self, case: TestCase) -> Self {
        self.cases.push(case);
        self
    }

    pub fn extend(mut self, cases: impl IntoIterator<Item = TestCase>) -> Self {
        self.cases.extend(cases);
        self
    }

    pub fn build(self) -> Result<Registry, RegistryError> {
        let mut seen = HashSet::new();
        for case in &self.cases {
            validate_name(&case.name)?;
            if !seen.insert(case.name.as_str()) {
                return Err(RegistryError::DuplicateName(case.name.clone()));
            }
            if case.timeout_ms == Some(0) {
                return Err(RegistryError::ZeroTimeout {
                    case: case.name.clone(),
                });
            }
            if let Some(expected) = &case.expected {
                validate_expected(case, expected)?;
            }
        }
        Ok(Registry { cases: self.cases })
    }
}

/// Names double as scratch directory names.
fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() {
        return Err(RegistryError::EmptyName);
    }
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid_chars || name == "." || name == ".." {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn validate_expected(case: &TestCase, expected: &ExpectedFacts) -> Result<(), RegistryError> {
    if expected
        .functions
        .iter()
        .any(|f| f.name().is_none() && f.address().is_none())
    {
        return Err(RegistryError::EmptyFunction {
            case: case.name.clone(),
        });
    }

    for (function, convention) in &expected.calling_conventions {
        if !case.architecture.supports(*convention) {
            return Err(RegistryError::UnsupportedConvention {
                case: case.name.clone(),
                function: function.clone(),
                convention: convention.to_string(),
                architecture: case.architecture.display_name().to_string(),
            });
        }
    }

    for (function, cfg) in &expected.cfg {
        if *cfg == CfgExpectation::default() {
            return Err(RegistryError::EmptyCfg {
                case: case.name.clone(),
                function: function.clone(),
            });
        }
        let inconsistent = |reason: String| RegistryError::InconsistentCfg {
            case: case.name.clone(),
            function: function.clone(),
            reason,
        };
        if cfg.blocks == Some(0) {
            return Err(inconsistent("a function has at least one block".into()));
        }
        if let (Some(blocks), Some(reachable)) = (cfg.blocks, cfg.reachable_blocks) {
            if reachable > blocks {
                return Err(inconsistent(format!(
                    "{} reachable blocks exceed {} blocks",
                    reachable, blocks
                )));
            }
            if cfg.all_reachable == Some(true) && reachable != blocks {
                return Err(inconsistent(
                    "all_reachable contradicts reachable_blocks".into(),
                ));
            }
        }
        if cfg.reachable_blocks == Some(0) {
            return Err(inconsistent("the entry block is always reachable".into()));
        }
    }
    Ok(())
}

/// Files of a catalog directory that are loaded.
const CATALOG_GLOB: &str = "*.json";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    cases: Vec<TestCase>,
}

/// Load a catalog from a JSON file, or from every `*.json` file in a
/// directory (sorted by path, concatenated in order).
pub fn load_catalog<F: Filesystem>(fs: &F, path: &Path) -> Result<Registry, CatalogError> {
    let stat = fs.stat(path).map_err(|source| CatalogError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let stat = stat.ok_or_else(|| CatalogError::NotFound(path.to_path_buf()))?;

    let files = if stat.is_dir {
        catalog_files(fs, path)?
    } else {
        vec![path.to_path_buf()]
    };

    let mut builder = Registry::builder();
    for file in &files {
        builder = builder.extend(read_catalog_file(fs, file)?);
    }
    Ok(builder.build()?)
}

fn catalog_files<F: Filesystem>(fs: &F, dir: &Path) -> Result<Vec<PathBuf>, CatalogError> {
    let pattern =
        glob::Pattern::new(CATALOG_GLOB).map_err(|e| CatalogError::Pattern(e.to_string()))?;
    let entries = fs.list_dir(dir).map_err(|source| CatalogError::Read {
        path: dir.to_path_buf(),
        source,
    })?;

    let files: Vec<PathBuf> = entries
        .into_iter()
        .filter(|path| {
            path.file_name()
                .map_or(false, |name| pattern.matches(&name.to_string_lossy()))
        })
        .collect();

    if files.is_empty() {
        return Err(CatalogError::Empty(dir.to_path_buf()));
    }
    Ok(files)
}

fn read_catalog_file<F: Filesystem>(fs: &F, path: &Path) -> Result<Vec<TestCase>, CatalogError> {
    let json = fs.read_to_string(path).map_err(|source| CatalogError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let catalog: CatalogFile = serde_json::from_str(&json).map_err(|source| CatalogError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(catalog.cases)
}
