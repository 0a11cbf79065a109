//! The file-system boundary.
//!
//! All source reads and artifact writes go through [`FileSystem`], so the
//! orchestrator can run against the real disk ([`OsFileSystem`]) or against an
//! in-memory tree with fault injection ([`MemoryFileSystem`]).

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Errors returned by [`FileSystem`] operations.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// The path does not exist.
    #[error("file not found: {path}")]
    NotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// Any other I/O failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },
}

impl FsError {
    /// Returns `true` if this error means the path does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound { .. })
    }

    fn from_io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            FsError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            FsError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Abstract file-system capability used by every orchestrator component.
///
/// Implementations must be shareable across threads: the watch loop polls
/// from a background thread while cycles read and write from the driver.
pub trait FileSystem: Send + Sync {
    /// Reads the full contents of a file.
    fn read(&self, path: &Path) -> Result<Vec<u8>, FsError>;

    /// Writes a file, creating parent directories as needed.
    fn write(&self, path: &Path, data: &[u8]) -> Result<(), FsError>;

    /// Atomically replaces `to` with `from`.
    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError>;

    /// Removes a file.
    fn remove(&self, path: &Path) -> Result<(), FsError>;

    /// Returns `true` if a file exists at `path`.
    fn exists(&self, path: &Path) -> bool;
}

/// [`FileSystem`] backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        std::fs::read(path).map_err(|e| FsError::from_io(path, e))
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| FsError::from_io(parent, e))?;
        }
        std::fs::write(path, data).map_err(|e| FsError::from_io(path, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        std::fs::rename(from, to).map_err(|e| FsError::from_io(from, e))
    }

    fn remove(&self, path: &Path) -> Result<(), FsError> {
        std::fs::remove_file(path).map_err(|e| FsError::from_io(path, e))
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<PathBuf, Vec<u8>>,
    failing_writes: BTreeSet<PathBuf>,
    write_log: Vec<PathBuf>,
}

/// In-memory [`FileSystem`] for tests.
///
/// Supports injecting write failures for specific paths and records every
/// successful write (including renames) in order.
#[derive(Default)]
pub struct MemoryFileSystem {
    state: Mutex<MemoryState>,
}

impl MemoryFileSystem {
    /// Creates an empty in-memory file system.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Inserts or replaces a file without recording it in the write log.
    pub fn insert(&self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) {
        self.lock().files.insert(path.into(), data.into());
    }

    /// Deletes a file without recording it in the write log.
    pub fn delete(&self, path: &Path) {
        self.lock().files.remove(path);
    }

    /// Returns the contents of a file, if present.
    pub fn get(&self, path: &Path) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    /// Makes every subsequent write to `path` fail with an I/O error.
    pub fn fail_writes_to(&self, path: impl Into<PathBuf>) {
        self.lock().failing_writes.insert(path.into());
    }

    /// Removes all injected write failures.
    pub fn clear_failures(&self) {
        self.lock().failing_writes.clear();
    }

    /// Drains the ordered log of written paths.
    pub fn take_write_log(&self) -> Vec<PathBuf> {
        std::mem::take(&mut self.lock().write_log)
    }

    /// Returns all file paths currently stored.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().files.keys().cloned().collect()
    }
}

impl FileSystem for MemoryFileSystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        self.lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| FsError::NotFound {
                path: path.to_path_buf(),
            })
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        let mut state = self.lock();
        if state.failing_writes.contains(path) {
            return Err(FsError::Io {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "injected write failure"),
            });
        }
        state.files.insert(path.to_path_buf(), data.to_vec());
        state.write_log.push(path.to_path_buf());
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let mut state = self.lock();
        if state.failing_writes.contains(to) {
            return Err(FsError::Io {
                path: to.to_path_buf(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "injected write failure"),
            });
        }
        let data = state.files.remove(from).ok_or_else(|| FsError::NotFound {
            path: from.to_path_buf(),
        })?;
        state.files.insert(to.to_path_buf(), data);
        state.write_log.push(to.to_path_buf());
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<(), FsError> {
        self.lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| FsError::NotFound {
                path: path.to_path_buf(),
            })
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().files.contains_key(path)
    }
}
