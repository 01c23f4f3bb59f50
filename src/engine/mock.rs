//! Mock native IO provider for testing
//!
//! This module provides an in-memory implementation of [`NativeIo`]. Files are
//! just sizes, directories are just paths, and every call is recorded so tests
//! can assert exactly which transfers happened in which order.
//!
//! # Features
//!
//! - Deterministic clock: every `now()` call advances time by 10us
//! - Enforces parent directories, empty-directory removal and EOF on reads
//! - Configurable read/write failure injection
//! - Thread-safe call log
//!
//! # Example
//!
//! ```
//! use fspulse::engine::{NativeIo, OpenMode};
//! use fspulse::engine::mock::{IoCall, MockIo};
//! use std::path::Path;
//!
//! let io = MockIo::new();
//! io.add_dir("/d");
//! let h = io.open(Path::new("/d/f"), OpenMode::Write).unwrap();
//! io.write(h, 0, &[0u8; 4096]).unwrap();
//! io.close(h).unwrap();
//!
//! let writes = io.calls_of(IoCall::Write);
//! assert_eq!(writes.len(), 1);
//! assert_eq!(writes[0].length, 4096);
//! ```

use super::{Handle, NativeIo, OpenMode};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

/// Kind of a recorded provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoCall {
    Open,
    Read,
    Write,
    Close,
    Delete,
    Mkdir,
    Rmdir,
    GetAttr,
    SetAttr,
    Access,
}

/// Record of one provider call for test verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoRecord {
    pub call: IoCall,
    pub path: PathBuf,
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Default)]
struct MockState {
    files: HashMap<PathBuf, u64>,
    mtimes: HashMap<PathBuf, SystemTime>,
    dirs: HashSet<PathBuf>,
    handles: HashMap<Handle, PathBuf>,
    next_handle: u64,
    log: Vec<IoRecord>,
}

impl MockState {
    fn parent_exists(&self, path: &Path) -> bool {
        match path.parent() {
            Some(p) if p.as_os_str().is_empty() || p == Path::new("/") => true,
            Some(p) => self.dirs.contains(p),
            None => true,
        }
    }

    fn handle_path(&self, handle: Handle) -> io::Result<PathBuf> {
        self.handles
            .get(&handle)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("handle {} is not open", handle)))
    }

    fn record(&mut self, call: IoCall, path: &Path, offset: u64, length: u64) {
        self.log.push(IoRecord {
            call,
            path: path.to_path_buf(),
            offset,
            length,
        });
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
}

/// In-memory provider
#[derive(Debug, Default)]
pub struct MockIo {
    state: Mutex<MockState>,
    clock: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MockIo {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pre-populate a directory (and its ancestors)
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut state = self.state();
        for p in path.as_ref().ancestors() {
            if p.as_os_str().is_empty() || p == Path::new("/") {
                break;
            }
            state.dirs.insert(p.to_path_buf());
        }
    }

    /// Pre-populate a file of `size` bytes, creating its directories
    pub fn add_file(&self, path: impl AsRef<Path>, size: u64) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.add_dir(parent);
        }
        self.state().files.insert(path.to_path_buf(), size);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn has_file(&self, path: impl AsRef<Path>) -> bool {
        self.state().files.contains_key(path.as_ref())
    }

    pub fn has_dir(&self, path: impl AsRef<Path>) -> bool {
        self.state().dirs.contains(path.as_ref())
    }

    pub fn open_handles(&self) -> usize {
        self.state().handles.len()
    }

    pub fn mtime(&self, path: impl AsRef<Path>) -> Option<SystemTime> {
        self.state().mtimes.get(path.as_ref()).copied()
    }

    /// Copy of the call log
    pub fn calls(&self) -> Vec<IoRecord> {
        self.state().log.clone()
    }

    pub fn calls_of(&self, call: IoCall) -> Vec<IoRecord> {
        self.state().log.iter().filter(|r| r.call == call).cloned().collect()
    }

    pub fn clear_calls(&self) {
        self.state().log.clear();
    }
}

impl NativeIo for MockIo {
    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Handle> {
        let mut state = self.state();
        let exists = state.files.contains_key(path);
        match mode {
            OpenMode::Read if !exists => return Err(not_found(path)),
            OpenMode::Write if !exists => {
                if !state.parent_exists(path) {
                    return Err(not_found(path.parent().unwrap_or(path)));
                }
                state.files.insert(path.to_path_buf(), 0);
            }
            _ => {}
        }
        state.next_handle += 1;
        let handle = Handle(state.next_handle);
        state.handles.insert(handle, path.to_path_buf());
        state.record(IoCall::Open, path, 0, 0);
        Ok(handle)
    }

    fn read(&self, handle: Handle, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut state = self.state();
        let path = state.handle_path(handle)?;
        state.record(IoCall::Read, &path, offset, buf.len() as u64);
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected read failure"));
        }
        let size = state.files.get(&path).copied().unwrap_or(0);
        if offset + buf.len() as u64 > size {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of file"));
        }
        Ok(())
    }

    fn write(&self, handle: Handle, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        let path = state.handle_path(handle)?;
        state.record(IoCall::Write, &path, offset, buf.len() as u64);
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        let end = offset + buf.len() as u64;
        let size = state.files.entry(path).or_insert(0);
        *size = (*size).max(end);
        Ok(())
    }

    fn close(&self, handle: Handle) -> io::Result<()> {
        let mut state = self.state();
        let path = state.handle_path(handle)?;
        state.handles.remove(&handle);
        state.record(IoCall::Close, &path, 0, 0);
        Ok(())
    }

    fn size(&self, handle: Handle) -> io::Result<u64> {
        let state = self.state();
        let path = state.handle_path(handle)?;
        Ok(state.files.get(&path).copied().unwrap_or(0))
    }

    fn now(&self) -> u64 {
        self.clock.fetch_add(10, Ordering::Relaxed) + 10
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state();
        if state.files.remove(path).is_none() {
            return Err(not_found(path));
        }
        state.record(IoCall::Delete, path, 0, 0);
        Ok(())
    }

    fn mkdir(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state();
        if !state.parent_exists(path) {
            return Err(not_found(path.parent().unwrap_or(path)));
        }
        if !state.dirs.insert(path.to_path_buf()) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, format!("{} exists", path.display())));
        }
        state.record(IoCall::Mkdir, path, 0, 0);
        Ok(())
    }

    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        self.add_dir(path);
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state();
        if !state.dirs.contains(path) {
            return Err(not_found(path));
        }
        let in_use = state.files.keys().any(|f| f.parent() == Some(path))
            || state.dirs.iter().any(|d| d.parent() == Some(path));
        if in_use {
            return Err(io::Error::new(io::ErrorKind::Other, format!("{} not empty", path.display())));
        }
        state.dirs.remove(path);
        state.record(IoCall::Rmdir, path, 0, 0);
        Ok(())
    }

    fn get_attr(&self, path: &Path) -> io::Result<u64> {
        let mut state = self.state();
        let size = match state.files.get(path) {
            Some(&size) => size,
            None if state.dirs.contains(path) => 0,
            None => return Err(not_found(path)),
        };
        state.record(IoCall::GetAttr, path, 0, 0);
        Ok(size)
    }

    fn set_attr(&self, path: &Path, mtime: SystemTime) -> io::Result<()> {
        let mut state = self.state();
        if !state.files.contains_key(path) && !state.dirs.contains(path) {
            return Err(not_found(path));
        }
        state.mtimes.insert(path.to_path_buf(), mtime);
        state.record(IoCall::SetAttr, path, 0, 0);
        Ok(())
    }

    fn access(&self, path: &Path) -> io::Result<bool> {
        let mut state = self.state();
        state.record(IoCall::Access, path, 0, 0);
        Ok(state.files.contains_key(path) || state.dirs.contains(path))
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.state();
        state.files.contains_key(path) || state.dirs.contains(path)
    }

    fn file_size(&self, path: &Path) -> Option<u64> {
        self.state().files.get(path).copied()
    }
}
