//! Sample resolution against the fixture corpus.
//!
//! Resolution checks that a sample exists and is non-empty; it never parses
//! the binary. A missing fixture is an expected state in partial checkouts and
//! is reported as [`Resolution::Absent`], not as an error.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use dmx_fs::{Filesystem, FsError};
use dmx_schema::{ObjectFormat, SampleRef};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Subdirectory holding content-addressed samples.
pub const DIGEST_DIR: &str = "by-sha256";

/// Infrastructure faults while resolving a sample.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("sample path must be relative to the corpus: {0}")]
    UnsafePath(PathBuf),

    #[error("invalid sha256 digest: {0}")]
    InvalidDigest(String),

    #[error("sample is a directory: {0}")]
    NotAFile(PathBuf),

    #[error("failed to read sample {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: FsError,
    },

    #[error("sha256 mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// A validated sample on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSample {
    pub path: PathBuf,
    pub format: ObjectFormat,
    pub size: u64,
}

/// Why a sample is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsenceReason {
    Missing,
    Empty,
}

/// A sample that could not be used, with the path that was checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsentSample {
    pub path: PathBuf,
    pub reason: AbsenceReason,
}

impl fmt::Display for AbsentSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            AbsenceReason::Missing => write!(f, "sample not found: {}", self.path.display()),
            AbsenceReason::Empty => write!(f, "sample is empty: {}", self.path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Present(ResolvedSample),
    Absent(AbsentSample),
}

/// Resolves sample references relative to a corpus root.
pub struct SampleResolver<'a, F: Filesystem> {
    fs: &'a F,
    corpus_dir: PathBuf,
}

impl<'a, F: Filesystem> SampleResolver<'a, F> {
    pub fn new(fs: &'a F, corpus_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            corpus_dir: corpus_dir.into(),
        }
    }

    /// Location of a sample inside the corpus.
    pub fn sample_path(&self, sample: &SampleRef) -> Result<PathBuf, ResolveError> {
        match sample {
            SampleRef::Path(relative) => {
                let safe = !relative.as_os_str().is_empty()
                    && relative
                        .components()
                        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
                if !safe {
                    return Err(ResolveError::UnsafePath(relative.clone()));
                }
                Ok(self.corpus_dir.join(relative))
            }
            SampleRef::Digest { sha256 } => {
                let digest = sha256.to_ascii_lowercase();
                if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(ResolveError::InvalidDigest(sha256.clone()));
                }
                Ok(self.corpus_dir.join(DIGEST_DIR).join(digest))
            }
        }
    }

    pub fn resolve(
        &self,
        sample: &SampleRef,
        format: ObjectFormat,
    ) -> Result<Resolution, ResolveError> {
        let path = self.sample_path(sample)?;
        let io_error = |source| ResolveError::Io {
            path: path.clone(),
            source,
        };

        let stat = match self.fs.stat(&path).map_err(io_error)? {
            Some(stat) => stat,
            None => {
                return Ok(Resolution::Absent(AbsentSample {
                    path,
                    reason: AbsenceReason::Missing,
                }))
            }
        };
        if stat.is_dir {
            return Err(ResolveError::NotAFile(path));
        }
        if stat.len == 0 {
            return Ok(Resolution::Absent(AbsentSample {
                path,
                reason: AbsenceReason::Empty,
            }));
        }

        if let SampleRef::Digest { sha256 } = sample {
            let data = self.fs.read_bytes(&path).map_err(io_error)?;
            let actual = compute_sha256(&data);
            if !actual.eq_ignore_ascii_case(sha256) {
                return Err(ResolveError::DigestMismatch {
                    path,
                    expected: sha256.to_ascii_lowercase(),
                    actual,
                });
            }
        }

        Ok(Resolution::Present(ResolvedSample {
            path,
            format,
            size: stat.len,
        }))
    }

    pub fn corpus_dir(&self) -> &Path {
        &self.corpus_dir
    }
}

/// Compute SHA256 hash of data, returning hex string.
pub fn compute_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmx_fs::MockFilesystem;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn resolver(fs: &MockFilesystem) -> SampleResolver<'_, MockFilesystem> {
        SampleResolver::new(fs, "/corpus")
    }

    #[test]
    fn test_present_sample() {
        let fs = MockFilesystem::new();
        fs.add_file("/corpus/arm/simple.elf", b"\x7fELF....".to_vec());

        let resolution = resolver(&fs)
            .resolve(&SampleRef::path("arm/simple.elf"), ObjectFormat::Elf)
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Present(ResolvedSample {
                path: PathBuf::from("/corpus/arm/simple.elf"),
                format: ObjectFormat::Elf,
                size: 8,
            })
        );
    }

    #[test]
    fn test_missing_sample_is_absent() {
        let fs = MockFilesystem::new();
        let resolution = resolver(&fs)
            .resolve(&SampleRef::path("simple_arm.elf"), ObjectFormat::Elf)
            .unwrap();
        match resolution {
            Resolution::Absent(absent) => {
                assert_eq!(absent.reason, AbsenceReason::Missing);
                assert_eq!(absent.to_string(), "sample not found: /corpus/simple_arm.elf");
            }
            other => panic!("expected absent, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_sample_is_absent() {
        let fs = MockFilesystem::new();
        fs.add_file("/corpus/empty.exe", Vec::<u8>::new());
        let resolution = resolver(&fs)
            .resolve(&SampleRef::path("empty.exe"), ObjectFormat::Pe)
            .unwrap();
        match resolution {
            Resolution::Absent(absent) => {
                assert_eq!(absent.reason, AbsenceReason::Empty);
                assert!(absent.to_string().starts_with("sample is empty"));
            }
            other => panic!("expected absent, got {:?}", other),
        }
    }

    #[test]
    fn test_unreadable_sample_is_error() {
        let fs = MockFilesystem::new();
        fs.add_file("/corpus/locked/a.elf", b"x".to_vec());
        fs.deny("/corpus/locked");
        let err = resolver(&fs)
            .resolve(&SampleRef::path("locked/a.elf"), ObjectFormat::Elf)
            .unwrap_err();
        assert!(matches!(err, ResolveError::Io { .. }));
    }

    #[test]
    fn test_directory_is_error() {
        let fs = MockFilesystem::new();
        fs.add_dir("/corpus/arm");
        let err = resolver(&fs)
            .resolve(&SampleRef::path("arm"), ObjectFormat::Elf)
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotAFile(_)));
    }

    #[test]
    fn test_escaping_paths_rejected() {
        let fs = MockFilesystem::new();
        let r = resolver(&fs);
        for bad in ["../outside.elf", "/etc/passwd", "arm/../../x", ""] {
            let err = r.sample_path(&SampleRef::path(bad)).unwrap_err();
            assert!(matches!(err, ResolveError::UnsafePath(_)), "accepted {:?}", bad);
        }
        assert_eq!(
            r.sample_path(&SampleRef::path("./arm/a.elf")).unwrap(),
            PathBuf::from("/corpus/./arm/a.elf")
        );
    }

    #[test]
    fn test_digest_sample_verified() {
        let fs = MockFilesystem::new();
        fs.add_file(format!("/corpus/by-sha256/{}", HELLO_SHA256), b"hello".to_vec());

        let resolution = resolver(&fs)
            .resolve(&SampleRef::sha256(HELLO_SHA256.to_uppercase()), ObjectFormat::Other)
            .unwrap();
        assert!(matches!(resolution, Resolution::Present(ResolvedSample { size: 5, .. })));
    }

    #[test]
    fn test_digest_mismatch_is_error() {
        let fs = MockFilesystem::new();
        fs.add_file(format!("/corpus/by-sha256/{}", HELLO_SHA256), b"tampered".to_vec());
        let err = resolver(&fs)
            .resolve(&SampleRef::sha256(HELLO_SHA256), ObjectFormat::Elf)
            .unwrap_err();
        match err {
            ResolveError::DigestMismatch { expected, .. } => assert_eq!(expected, HELLO_SHA256),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_digest_sample_is_absent() {
        let fs = MockFilesystem::new();
        let resolution = resolver(&fs)
            .resolve(&SampleRef::sha256(HELLO_SHA256), ObjectFormat::Elf)
            .unwrap();
        assert!(matches!(resolution, Resolution::Absent(_)));
    }

    #[test]
    fn test_invalid_digest_rejected() {
        let fs = MockFilesystem::new();
        let err = resolver(&fs)
            .resolve(&SampleRef::sha256("abcd"), ObjectFormat::Elf)
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidDigest(_)));
    }

    #[test]
    fn test_compute_sha256() {
        assert_eq!(compute_sha256(b"hello"), HELLO_SHA256);
    }
}
