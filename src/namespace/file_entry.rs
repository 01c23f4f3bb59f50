//! File entries and file leases

use super::busy::BusyLock;
use super::directory::DirLease;
use super::Anchor;
use crate::error::FatalError;
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Bad blocks after which a file is skipped for good
const MAX_BAD_BLOCKS: u64 = 100;

/// One file slot of an anchor
///
/// The slot outlives the file: deleting it clears `exists` and the slot can be
/// created again later.
#[derive(Debug)]
pub struct FileEntry {
    index: usize,
    dir: usize,
    path: PathBuf,
    target_size: u64,
    lock: BusyLock,
    exists: AtomicBool,
    bad: AtomicBool,
    copied: AtomicBool,
    current_size: AtomicU64,
    bad_bytes: AtomicU64,
    bad_blocks: AtomicU64,
}

impl FileEntry {
    pub(crate) fn new(index: usize, dir: usize, path: PathBuf, target_size: u64) -> Self {
        Self {
            index,
            dir,
            path,
            target_size,
            lock: BusyLock::new(),
            exists: AtomicBool::new(false),
            bad: AtomicBool::new(false),
            copied: AtomicBool::new(false),
            current_size: AtomicU64::new(0),
            bad_bytes: AtomicU64::new(0),
            bad_blocks: AtomicU64::new(0),
        }
    }

    /// Position within the anchor; copies pair entries by this index
    pub fn index(&self) -> usize {
        self.index
    }

    /// Index of the containing directory
    pub fn dir(&self) -> usize {
        self.dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn target_size(&self) -> u64 {
        self.target_size
    }

    #[inline]
    pub fn exists(&self) -> bool {
        self.exists.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_bad(&self) -> bool {
        self.bad.load(Ordering::Acquire)
    }

    pub fn is_copied(&self) -> bool {
        self.copied.load(Ordering::Acquire)
    }

    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        self.exists() && self.current_size() >= self.target_size
    }

    pub fn is_busy(&self) -> bool {
        self.lock.is_busy()
    }

    pub(crate) fn lock(&self) -> &BusyLock {
        &self.lock
    }

    /// Startup discovery only; no lease needed before workers run
    pub(crate) fn discovered(&self, size: u64) {
        self.exists.store(true, Ordering::Release);
        self.current_size.store(size, Ordering::Release);
    }
}

/// Exclusive hold on a file's busy-lock
///
/// All mutation of a [`FileEntry`] goes through its lease. Dropping the lease
/// releases the file and, if it was taken, the parent directory.
#[derive(Debug)]
pub struct FileLease {
    anchor: Arc<Anchor>,
    index: usize,
    parent: Option<DirLease>,
    released: bool,
}

impl FileLease {
    pub(crate) fn new(anchor: Arc<Anchor>, index: usize) -> Self {
        Self {
            anchor,
            index,
            parent: None,
            released: false,
        }
    }

    pub fn anchor(&self) -> &Arc<Anchor> {
        &self.anchor
    }

    pub fn entry(&self) -> &FileEntry {
        self.anchor.file(self.index)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        self.entry().path()
    }

    /// Try to also lock the parent directory so it cannot be removed under us
    pub fn lock_parent(&mut self) -> bool {
        if self.parent.is_some() {
            return true;
        }
        match self.anchor.try_lock_dir(self.entry().dir()) {
            Some(lease) => {
                self.parent = Some(lease);
                true
            }
            None => false,
        }
    }

    pub fn parent_exists(&self) -> bool {
        self.anchor.dir(self.entry().dir()).exists()
    }

    /// Flip the existence flag, keeping directory and anchor counts in step
    ///
    /// Both transitions clear the copied flag. Setting the flag to the value it
    /// already has is a fatal error.
    pub fn set_exists(&self, exists: bool) -> Result<()> {
        let entry = self.entry();
        if entry.exists.swap(exists, Ordering::AcqRel) == exists {
            return Err(FatalError::ExistsUnchanged {
                path: entry.path.clone(),
                exists,
            }
            .into());
        }
        entry.copied.store(false, Ordering::Release);
        self.anchor.dir(entry.dir).count_files(exists)?;
        self.anchor.count_files(exists)
    }

    /// Update the size as last seen on disk
    pub fn set_current_size(&self, size: u64) {
        let old = self.entry().current_size.swap(size, Ordering::AcqRel);
        match (old > 0, size > 0) {
            (false, true) => self.anchor.count_filled(true),
            (true, false) => self.anchor.count_filled(false),
            _ => {}
        }
    }

    pub fn set_copied(&self, copied: bool) {
        self.entry().copied.store(copied, Ordering::Release);
    }

    /// Record a failed transfer of `length` bytes
    ///
    /// Returns true when this pushes the file over the bad-file threshold:
    /// more than 1% of its bytes or more than 100 blocks.
    pub fn mark_block_bad(&self, length: u64) -> bool {
        let entry = self.entry();
        let bytes = entry.bad_bytes.fetch_add(length, Ordering::AcqRel) + length;
        let blocks = entry.bad_blocks.fetch_add(1, Ordering::AcqRel) + 1;
        let too_many = bytes.saturating_mul(100) > entry.target_size || blocks > MAX_BAD_BLOCKS;
        if too_many && !entry.bad.swap(true, Ordering::AcqRel) {
            return true;
        }
        false
    }

    /// Release the lock, failing if it was not held
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        let entry = self.entry();
        entry.lock().unlock(&entry.path().display().to_string())
    }
}

impl Drop for FileLease {
    fn drop(&mut self) {
        if !self.released {
            let entry = self.anchor.file(self.index);
            let _ = entry.lock().unlock(&entry.path().display().to_string());
        }
    }
}
