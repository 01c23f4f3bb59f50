//! Synchronous filesystem provider
//!
//! Blocking positional IO on real files. Open files live in a handle table so
//! that any worker can reach its file through a plain [`Handle`].
//!
//! # Features
//!
//! - Uses `read_exact_at`/`write_all_at` (pread/pwrite) so the file offset is never shared
//! - Handle lookups take a read lock only; the transfer itself runs unlocked
//! - Metadata calls map one to one onto `std::fs`, `access(2)` goes through libc
//!
//! # Example
//!
//! ```no_run
//! use fspulse::engine::{NativeIo, OpenMode};
//! use fspulse::engine::sync::SyncIo;
//! use std::path::Path;
//!
//! let io = SyncIo::new();
//! let h = io.open(Path::new("/tmp/fspulse/file000000.dat"), OpenMode::Write)?;
//! io.write(h, 0, &[0u8; 4096])?;
//! io.close(h)?;
//! # Ok::<(), std::io::Error>(())
//! ```

use super::{Handle, NativeIo, OpenMode};
use crate::util::fast_time::FastInstant;
use std::collections::HashMap;
use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

/// Provider backed by the local filesystem
pub struct SyncIo {
    files: RwLock<HashMap<Handle, Arc<File>>>,
    next_handle: AtomicU64,
    origin: FastInstant,
}

impl SyncIo {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            origin: FastInstant::now(),
        }
    }

    fn file(&self, handle: Handle) -> io::Result<Arc<File>> {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&handle)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("handle {} is not open", handle)))
    }
}

impl Default for SyncIo {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeIo for SyncIo {
    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Handle> {
        let file = match mode {
            OpenMode::Read => File::open(path)?,
            OpenMode::Write => OpenOptions::new().read(true).write(true).create(true).open(path)?,
        };
        let handle = Handle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle, Arc::new(file));
        Ok(handle)
    }

    fn read(&self, handle: Handle, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file(handle)?.read_exact_at(buf, offset)
    }

    fn write(&self, handle: Handle, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.file(handle)?.write_all_at(buf, offset)
    }

    fn close(&self, handle: Handle) -> io::Result<()> {
        let file = self
            .files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("handle {} is not open", handle)))?;
        drop(file);
        Ok(())
    }

    fn size(&self, handle: Handle) -> io::Result<u64> {
        Ok(self.file(handle)?.metadata()?.len())
    }

    fn now(&self) -> u64 {
        FastInstant::now().duration_since(self.origin).as_micros() as u64
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn mkdir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn rmdir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn get_attr(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn set_attr(&self, path: &Path, mtime: SystemTime) -> io::Result<()> {
        File::open(path)?.set_modified(mtime)
    }

    fn access(&self, path: &Path) -> io::Result<bool> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let rc = unsafe { libc::access(c_path.as_ptr(), libc::R_OK) };
        if rc == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EACCES) => Ok(false),
            _ => Err(err),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn file_size(&self, path: &Path) -> Option<u64> {
        fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_write_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.dat");
        let io = SyncIo::new();

        let h = io.open(&path, OpenMode::Write).unwrap();
        io.write(h, 4096, &[7u8; 4096]).unwrap();
        assert_eq!(io.size(h).unwrap(), 8192);

        let mut buf = vec![0u8; 4096];
        io.read(h, 4096, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 7));
        io.close(h).unwrap();

        assert_eq!(io.file_size(&path), Some(8192));
        assert!(io.close(h).is_err());
    }

    #[test]
    fn test_read_past_eof_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.dat");
        std::fs::write(&path, [1u8; 100]).unwrap();
        let io = SyncIo::new();
        let h = io.open(&path, OpenMode::Read).unwrap();
        let mut buf = vec![0u8; 4096];
        assert!(io.read(h, 0, &mut buf).is_err());
        io.close(h).unwrap();
    }

    #[test]
    fn test_open_missing_for_read_fails() {
        let dir = TempDir::new().unwrap();
        let io = SyncIo::new();
        assert!(io.open(&dir.path().join("nope"), OpenMode::Read).is_err());
    }

    #[test]
    fn test_metadata_ops() {
        let dir = TempDir::new().unwrap();
        let io = SyncIo::new();
        let sub = dir.path().join("d1");
        io.mkdir(&sub).unwrap();
        assert!(io.exists(&sub));
        assert_eq!(io.file_size(&sub), None);

        let file = sub.join("f");
        io.close(io.open(&file, OpenMode::Write).unwrap()).unwrap();
        assert_eq!(io.get_attr(&file).unwrap(), 0);
        assert!(io.access(&file).unwrap());

        let later = SystemTime::now() + Duration::from_secs(3600);
        io.set_attr(&file, later).unwrap();
        let mtime = std::fs::metadata(&file).unwrap().modified().unwrap();
        assert!(mtime > SystemTime::now());

        assert!(io.rmdir(&sub).is_err());
        io.delete(&file).unwrap();
        io.rmdir(&sub).unwrap();
        assert!(!io.exists(&sub));

        io.mkdir_all(&dir.path().join("a/b/c")).unwrap();
        assert!(io.exists(&dir.path().join("a/b")));
    }

    #[test]
    fn test_now_is_monotonic() {
        let io = SyncIo::new();
        let a = io.now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(io.now() >= a + 1000);
    }
}
