//! Harness configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dmx_fs::{Filesystem, FsError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CORPUS_DIR: &str = "fixtures";
pub const DEFAULT_SCRATCH_DIR: &str = "target/dmx-scratch";

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: FsError,
    },

    #[error("invalid config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("workers must be at least 1")]
    NoWorkers,

    #[error("timeout must be at least 1 ms")]
    ZeroTimeout,

    #[error("no decompiler configured; pass --decompiler or set decompiler.program")]
    MissingDecompiler,

    #[error("decompiler program is empty")]
    EmptyProgram,
}

/// What happens to a case's scratch directory once its outcome is known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScratchPolicy {
    Always,
    Never,
    #[default]
    OnFailure,
}

impl ScratchPolicy {
    /// Whether scratch output should be kept for a case with the given result.
    pub fn retain(self, succeeded: bool) -> bool {
        match self {
            ScratchPolicy::Always => true,
            ScratchPolicy::Never => false,
            ScratchPolicy::OnFailure => !succeeded,
        }
    }
}

/// External decompiler command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompilerCommand {
    pub program: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl DecompilerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

/// Configuration for a matrix run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Root of the fixture corpus.
    pub corpus_dir: PathBuf,
    /// Root under which each case gets `<scratch_dir>/<case name>`.
    pub scratch_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decompiler: Option<DecompilerCommand>,
    pub workers: usize,
    /// Run-wide timeout override. Per-case timeouts still take precedence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub scratch_policy: ScratchPolicy,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            corpus_dir: PathBuf::from(DEFAULT_CORPUS_DIR),
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            decompiler: None,
            workers: default_workers(),
            timeout_ms: None,
            scratch_policy: ScratchPolicy::default(),
        }
    }
}

/// Available parallelism, or 1 when it cannot be determined.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(path: &Path, json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a JSON config file.
    pub fn load<F: Filesystem>(fs: &F, path: &Path) -> Result<Self, ConfigError> {
        let json = fs.read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(path, &json)
    }

    pub fn with_corpus_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.corpus_dir = dir.into();
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn with_decompiler(mut self, command: DecompilerCommand) -> Self {
        self.decompiler = Some(command);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_scratch_policy(mut self, policy: ScratchPolicy) -> Self {
        self.scratch_policy = policy;
        self
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Validate settings that every command relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.timeout_ms == Some(0) {
            return Err(ConfigError::ZeroTimeout);
        }
        if let Some(command) = &self.decompiler {
            if command.program.as_os_str().is_empty() {
                return Err(ConfigError::EmptyProgram);
            }
        }
        Ok(())
    }

    /// Validate and return the decompiler command needed to run cases.
    pub fn require_decompiler(&self) -> Result<&DecompilerCommand, ConfigError> {
        self.validate()?;
        self.decompiler.as_ref().ok_or(ConfigError::MissingDecompiler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmx_fs::MockFilesystem;

    #[test]
    fn test_default_config() {
        let config = HarnessConfig::default();
        assert_eq!(config.corpus_dir, PathBuf::from("fixtures"));
        assert_eq!(config.scratch_dir, PathBuf::from("target/dmx-scratch"));
        assert!(config.workers >= 1);
        assert_eq!(config.scratch_policy, ScratchPolicy::OnFailure);
        assert!(config.decompiler.is_none());
        assert!(config.timeout_override().is_none());
    }

    #[test]
    fn test_builder() {
        let config = HarnessConfig::new()
            .with_corpus_dir("/corpus")
            .with_scratch_dir("/tmp/scratch")
            .with_workers(3)
            .with_timeout(Duration::from_secs(5))
            .with_scratch_policy(ScratchPolicy::Always)
            .with_decompiler(DecompilerCommand::new("retdec").with_args(vec!["--quiet".into()]));

        assert_eq!(config.corpus_dir, PathBuf::from("/corpus"));
        assert_eq!(config.workers, 3);
        assert_eq!(config.timeout_override(), Some(Duration::from_secs(5)));
        assert_eq!(config.scratch_policy, ScratchPolicy::Always);
        assert_eq!(config.decompiler.unwrap().args, vec!["--quiet".to_string()]);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = HarnessConfig::from_json(
            Path::new("dmx.json"),
            r#"{"corpus_dir": "/data/corpus", "scratch_policy": "never"}"#,
        )
        .unwrap();
        assert_eq!(config.corpus_dir, PathBuf::from("/data/corpus"));
        assert_eq!(config.scratch_dir, PathBuf::from(DEFAULT_SCRATCH_DIR));
        assert_eq!(config.scratch_policy, ScratchPolicy::Never);
    }

    #[test]
    fn test_json_decompiler() {
        let config = HarnessConfig::from_json(
            Path::new("dmx.json"),
            r#"{"decompiler": {"program": "/opt/retdec/bin/retdec-json", "args": ["-s"]},
                "workers": 2, "timeout_ms": 1500}"#,
        )
        .unwrap();
        let command = config.require_decompiler().unwrap();
        assert_eq!(command.program, PathBuf::from("/opt/retdec/bin/retdec-json"));
        assert_eq!(command.args, vec!["-s".to_string()]);
        assert_eq!(config.timeout_override(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_example_config_parses() {
        let json = include_str!("../../dmx.example.json");
        let config = HarnessConfig::from_json(Path::new("dmx.example.json"), json).unwrap();
        assert_eq!(config.workers, 4);
        let decompiler = config.require_decompiler().unwrap();
        assert_eq!(decompiler.program, PathBuf::from("dmx-decompile"));
        assert_eq!(decompiler.args, vec!["--json"]);
    }

    #[test]
    fn test_invalid_json() {
        let err = HarnessConfig::from_json(Path::new("bad.json"), "{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Json { .. }));
        assert!(err.to_string().contains("bad.json"));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let json = r#"{"scratch_policy": "sometimes"}"#;
        let err = HarnessConfig::from_json(Path::new("c.json"), json).unwrap_err();
        assert!(matches!(err, ConfigError::Json { .. }));
    }

    #[test]
    fn test_load_from_filesystem() {
        let fs = MockFilesystem::new();
        fs.add_file("/etc/dmx.json", br#"{"workers": 4}"#.to_vec());
        let config = HarnessConfig::load(&fs, Path::new("/etc/dmx.json")).unwrap();
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn test_load_missing_file() {
        let fs = MockFilesystem::new();
        let err = HarnessConfig::load(&fs, Path::new("/etc/missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_validate_zero_workers() {
        let err = HarnessConfig::new().with_workers(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::NoWorkers));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let err = HarnessConfig::new()
            .with_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroTimeout));
    }

    #[test]
    fn test_require_decompiler_missing() {
        let err = HarnessConfig::new().require_decompiler().unwrap_err();
        assert!(matches!(err, ConfigError::MissingDecompiler));
    }

    #[test]
    fn test_require_decompiler_empty_program() {
        let err = HarnessConfig::new()
            .with_decompiler(DecompilerCommand::new(""))
            .require_decompiler()
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyProgram));
    }

    #[test]
    fn test_scratch_policy_retain() {
        assert!(ScratchPolicy::Always.retain(true));
        assert!(ScratchPolicy::Always.retain(false));
        assert!(!ScratchPolicy::Never.retain(false));
        assert!(ScratchPolicy::OnFailure.retain(false));
        assert!(!ScratchPolicy::OnFailure.retain(true));
    }

    #[test]
    fn test_roundtrip_serialization() {
        let config = HarnessConfig::new()
            .with_workers(2)
            .with_decompiler(DecompilerCommand::new("decomp"));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"on-failure\""));
        let parsed = HarnessConfig::from_json(Path::new("x"), &json).unwrap();
        assert_eq!(parsed, config);
    }
}
