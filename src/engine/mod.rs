//! Native IO provider abstraction
//!
//! The workload engine never calls the operating system directly. Everything
//! that reaches the filesystem goes through a [`NativeIo`] implementation:
//!
//! - **SyncIo**: blocking positional reads/writes on real files (`sync.rs`)
//! - **MockIo**: in-memory namespace that records every call, for tests (`mock.rs`)
//!
//! Providers are shared by all worker threads, so they are `Send + Sync` and take
//! `&self`. Data transfers report failures as `io::Result` and the caller decides
//! whether an error is counted or fatal.
//!
//! This module also holds the run-scoped [`HandleRegistry`] and the [`KeyMap`]
//! collaborator used when data validation is enabled.
//!
//! # Example
//!
//! ```
//! use fspulse::engine::{NativeIo, OpenMode};
//! use fspulse::engine::mock::MockIo;
//! use std::path::Path;
//!
//! let io = MockIo::new();
//! let h = io.open(Path::new("/data/f1"), OpenMode::Write).unwrap();
//! io.write(h, 0, &[0u8; 512]).unwrap();
//! assert_eq!(io.size(h).unwrap(), 512);
//! io.close(h).unwrap();
//! ```

pub mod mock;
pub mod sync;

use crate::error::FatalError;
use crate::Result;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

/// Opaque handle returned by [`NativeIo::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u64);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing file, read only
    Read,
    /// Read/write, created if missing, never truncated
    Write,
}

/// Filesystem primitives used by the workload engine
pub trait NativeIo: Send + Sync {
    /// Open `path`; `OpenMode::Write` creates the file if it does not exist
    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Handle>;

    /// Read exactly `buf.len()` bytes at `offset`
    fn read(&self, handle: Handle, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write all of `buf` at `offset`
    fn write(&self, handle: Handle, offset: u64, buf: &[u8]) -> io::Result<()>;

    fn close(&self, handle: Handle) -> io::Result<()>;

    /// Current size of an open file
    fn size(&self, handle: Handle) -> io::Result<u64>;

    /// Monotonic timestamp in microseconds
    fn now(&self) -> u64;

    fn delete(&self, path: &Path) -> io::Result<()>;

    fn mkdir(&self, path: &Path) -> io::Result<()>;

    /// Create a directory and any missing parents
    fn mkdir_all(&self, path: &Path) -> io::Result<()>;

    fn rmdir(&self, path: &Path) -> io::Result<()>;

    /// Stat a path, returning its size
    fn get_attr(&self, path: &Path) -> io::Result<u64>;

    /// Set the modification time of a path
    fn set_attr(&self, path: &Path, mtime: SystemTime) -> io::Result<()>;

    /// Check read access
    fn access(&self, path: &Path) -> io::Result<bool>;

    fn exists(&self, path: &Path) -> bool;

    /// Size of a regular file, `None` if there is no such file
    fn file_size(&self, path: &Path) -> Option<u64>;
}

/// Every handle currently open in the run
///
/// Registering a handle twice, or closing one that was never registered, means
/// two sessions think they own the same file and is fatal.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    open: Mutex<HashMap<Handle, PathBuf>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: Handle, path: &Path) -> Result<()> {
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        if open.contains_key(&handle) {
            return Err(FatalError::DuplicateHandle {
                handle: handle.0,
                path: path.to_path_buf(),
            }
            .into());
        }
        open.insert(handle, path.to_path_buf());
        Ok(())
    }

    pub fn unregister(&self, handle: Handle) -> Result<PathBuf> {
        self.open
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle)
            .ok_or_else(|| FatalError::UnknownHandle(handle.0).into())
    }

    pub fn len(&self) -> usize {
        self.open.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Data validation bookkeeping, told about every block before it is written
pub trait KeyMap: Send + Sync {
    fn store_block_info(&self, path: &Path, offset: u64, length: u64);

    /// The file was deleted; its blocks no longer hold known data
    fn forget(&self, path: &Path);
}

/// Key map that records written block ranges per file
#[derive(Debug, Default)]
pub struct BlockMap {
    files: Mutex<HashMap<PathBuf, BTreeMap<u64, u64>>>,
}

impl BlockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded `(offset, length)` pairs for a file, in offset order
    pub fn blocks(&self, path: &Path) -> Vec<(u64, u64)> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .map(|m| m.iter().map(|(&o, &l)| (o, l)).collect())
            .unwrap_or_default()
    }
}

impl KeyMap for BlockMap {
    fn store_block_info(&self, path: &Path, offset: u64, length: u64) {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(path.to_path_buf())
            .or_default()
            .insert(offset, length);
    }

    fn forget(&self, path: &Path) {
        self.files.lock().unwrap_or_else(|e| e.into_inner()).remove(path);
    }
}
