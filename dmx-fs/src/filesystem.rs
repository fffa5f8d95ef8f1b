//! Filesystem trait and implementations.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use thiserror::Error;

/// Errors from filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("path error: {0}")]
    Path(String),
}

impl FsError {
    /// True when the underlying error is a missing file or directory.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

/// Minimal metadata about a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub len: u64,
    pub is_dir: bool,
}

/// Trait for filesystem operations.
/// Abstracted so the resolver and report writer can be tested in memory.
pub trait Filesystem: Send + Sync {
    /// Stat a path. Returns `Ok(None)` if nothing exists there.
    fn stat(&self, path: &Path) -> Result<Option<FileStat>, FsError>;

    /// Read file contents as bytes.
    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>, FsError>;

    /// Read file contents as a string.
    fn read_to_string(&self, path: &Path) -> Result<String, FsError>;

    /// Write data atomically (write to a sibling temp file, then rename).
    /// Parent directories are created as needed.
    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), FsError>;

    /// Create directory and parents if needed.
    fn create_dir_all(&self, path: &Path) -> Result<(), FsError>;

    /// Remove a directory tree. Missing directories are not an error.
    fn remove_dir_all(&self, path: &Path) -> Result<(), FsError>;

    /// Regular files directly inside `dir`, sorted by path.
    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, FsError>;

    /// Check if a path exists.
    fn exists(&self, path: &Path) -> bool;
}

/// Real filesystem implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFilesystem;

impl Filesystem for RealFilesystem {
    fn stat(&self, path: &Path) -> Result<Option<FileStat>, FsError> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(FileStat {
                len: meta.len(),
                is_dir: meta.is_dir(),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        Ok(fs::read(path)?)
    }

    fn read_to_string(&self, path: &Path) -> Result<String, FsError> {
        Ok(fs::read_to_string(path)?)
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp_path = temp_sibling(path)?;
        fs::write(&temp_path, data)?;
        // Rename is atomic on the same filesystem
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<(), FsError> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, FsError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// `report.json` -> `.report.json.tmp` in the same directory.
fn temp_sibling(path: &Path) -> Result<PathBuf, FsError> {
    let name = path
        .file_name()
        .ok_or_else(|| FsError::Path(format!("no file name in {}", path.display())))?;
    let mut temp_name = OsString::from(".");
    temp_name.push(name);
    temp_name.push(".tmp");
    Ok(path.with_file_name(temp_name))
}

/// Mock filesystem for testing.
/// Cloning creates a new handle to the same underlying data.
#[derive(Debug, Clone, Default)]
pub struct MockFilesystem {
    files: Arc<RwLock<HashMap<PathBuf, Vec<u8>>>>,
    dirs: Arc<RwLock<HashSet<PathBuf>>>,
    denied: Arc<RwLock<HashSet<PathBuf>>>,
}

impl MockFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file directly (for test setup). Parent directories are implied.
    pub fn add_file(&self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) {
        let path = path.into();
        self.register_parents(&path);
        self.files.write().unwrap().insert(path, data.into());
    }

    /// Add an empty directory.
    pub fn add_dir(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.register_parents(&path);
        self.dirs.write().unwrap().insert(path);
    }

    /// Make every operation on `path` fail with `PermissionDenied`.
    pub fn deny(&self, path: impl Into<PathBuf>) {
        self.denied.write().unwrap().insert(path.into());
    }

    /// Get content of a specific file.
    pub fn get_file(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.read().unwrap().get(path).cloned()
    }

    /// Whether a directory is registered at `path`.
    pub fn has_dir(&self, path: &Path) -> bool {
        self.dirs.read().unwrap().contains(path)
    }

    fn register_parents(&self, path: &Path) {
        let mut dirs = self.dirs.write().unwrap();
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            dirs.insert(ancestor.to_path_buf());
        }
    }

    fn check_denied(&self, path: &Path) -> Result<(), FsError> {
        let denied = self.denied.read().unwrap();
        if path.ancestors().any(|p| denied.contains(p)) {
            return Err(FsError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("permission denied: {}", path.display()),
            )));
        }
        Ok(())
    }

    fn not_found(path: &Path) -> FsError {
        FsError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("file not found: {}", path.display()),
        ))
    }
}

impl Filesystem for MockFilesystem {
    fn stat(&self, path: &Path) -> Result<Option<FileStat>, FsError> {
        self.check_denied(path)?;
        if let Some(data) = self.files.read().unwrap().get(path) {
            return Ok(Some(FileStat {
                len: data.len() as u64,
                is_dir: false,
            }));
        }
        if self.dirs.read().unwrap().contains(path) {
            return Ok(Some(FileStat { len: 0, is_dir: true }));
        }
        Ok(None)
    }

    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        self.check_denied(path)?;
        self.get_file(path).ok_or_else(|| Self::not_found(path))
    }

    fn read_to_string(&self, path: &Path) -> Result<String, FsError> {
        let data = self.read_bytes(path)?;
        String::from_utf8(data).map_err(|e| FsError::Path(format!("invalid utf8: {}", e)))
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        self.check_denied(path)?;
        self.add_file(path.to_path_buf(), data.to_vec());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        self.check_denied(path)?;
        self.add_dir(path.to_path_buf());
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<(), FsError> {
        self.check_denied(path)?;
        self.files.write().unwrap().retain(|p, _| !p.starts_with(path));
        self.dirs.write().unwrap().retain(|p| !p.starts_with(path));
        Ok(())
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, FsError> {
        self.check_denied(dir)?;
        if !self.has_dir(dir) {
            return Err(Self::not_found(dir));
        }
        let mut files: Vec<PathBuf> = self
            .files
            .read()
            .unwrap()
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .cloned()
            .collect();
        files.sort();
        Ok(files)
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.read().unwrap().contains_key(path) || self.dirs.read().unwrap().contains(path)
    }
}
