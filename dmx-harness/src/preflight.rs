//! Process-level checks made once before any case starts.
//!
//! A failure here aborts the whole run. Everything else is attached to the
//! outcome of the case it affects.

use std::path::{Path, PathBuf};

use dmx_fs::{Filesystem, FsError};
use thiserror::Error;

use crate::config::HarnessConfig;

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("fixture corpus not found: {0}")]
    CorpusMissing(PathBuf),

    #[error("fixture corpus is not a directory: {0}")]
    CorpusNotDirectory(PathBuf),

    #[error("cannot access fixture corpus {path}: {source}")]
    CorpusUnreadable {
        path: PathBuf,
        #[source]
        source: FsError,
    },

    #[error("cannot create scratch root {path}: {source}")]
    ScratchUnavailable {
        path: PathBuf,
        #[source]
        source: FsError,
    },
}

pub fn check_corpus<F: Filesystem>(fs: &F, corpus_dir: &Path) -> Result<(), PreflightError> {
    let stat = fs
        .stat(corpus_dir)
        .map_err(|source| PreflightError::CorpusUnreadable {
            path: corpus_dir.to_path_buf(),
            source,
        })?;
    match stat {
        None => Err(PreflightError::CorpusMissing(corpus_dir.to_path_buf())),
        Some(stat) if !stat.is_dir => {
            Err(PreflightError::CorpusNotDirectory(corpus_dir.to_path_buf()))
        }
        Some(_) => Ok(()),
    }
}

pub fn check_scratch<F: Filesystem>(fs: &F, scratch_dir: &Path) -> Result<(), PreflightError> {
    fs.create_dir_all(scratch_dir)
        .map_err(|source| PreflightError::ScratchUnavailable {
            path: scratch_dir.to_path_buf(),
            source,
        })
}

/// Run every fatal check for `config`.
pub fn preflight<F: Filesystem>(fs: &F, config: &HarnessConfig) -> Result<(), PreflightError> {
    check_corpus(fs, &config.corpus_dir)?;
    check_scratch(fs, &config.scratch_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmx_fs::MockFilesystem;

    fn config() -> HarnessConfig {
        HarnessConfig::new()
            .with_corpus_dir("/corpus")
            .with_scratch_dir("/scratch")
    }

    #[test]
    fn test_preflight_ok() {
        let fs = MockFilesystem::new();
        fs.add_dir("/corpus");
        preflight(&fs, &config()).unwrap();
        assert!(fs.has_dir(Path::new("/scratch")));
    }

    #[test]
    fn test_corpus_missing() {
        let fs = MockFilesystem::new();
        let err = preflight(&fs, &config()).unwrap_err();
        assert!(matches!(err, PreflightError::CorpusMissing(_)));
    }

    #[test]
    fn test_corpus_not_directory() {
        let fs = MockFilesystem::new();
        fs.add_file("/corpus", b"not a dir".to_vec());
        let err = preflight(&fs, &config()).unwrap_err();
        assert!(matches!(err, PreflightError::CorpusNotDirectory(_)));
    }

    #[test]
    fn test_corpus_unreadable() {
        let fs = MockFilesystem::new();
        fs.add_dir("/corpus");
        fs.deny("/corpus");
        let err = preflight(&fs, &config()).unwrap_err();
        assert!(matches!(err, PreflightError::CorpusUnreadable { .. }));
    }

    #[test]
    fn test_scratch_unavailable() {
        let fs = MockFilesystem::new();
        fs.add_dir("/corpus");
        fs.deny("/scratch");
        let err = preflight(&fs, &config()).unwrap_err();
        assert!(matches!(err, PreflightError::ScratchUnavailable { .. }));
        assert!(err.to_string().contains("/scratch"));
    }

    #[test]
    fn test_empty_corpus_is_fine() {
        // An empty corpus means every case is skipped, not a fatal error.
        let fs = MockFilesystem::new();
        fs.add_dir("/corpus");
        check_corpus(&fs, Path::new("/corpus")).unwrap();
    }
}
