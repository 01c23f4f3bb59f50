//! Directory nodes and directory leases

use super::busy::BusyLock;
use super::Anchor;
use crate::error::FatalError;
use crate::Result;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// One directory of an anchor's tree
///
/// A directory whose `parent` is `None` sits directly under the anchor root,
/// which always exists and never needs locking.
#[derive(Debug)]
pub struct Directory {
    index: usize,
    depth: usize,
    parent: Option<usize>,
    children: Vec<usize>,
    files: Range<usize>,
    path: PathBuf,
    lock: BusyLock,
    exists: AtomicBool,
    file_count: AtomicU64,
}

impl Directory {
    pub(crate) fn new(index: usize, depth: usize, parent: Option<usize>, path: PathBuf) -> Self {
        Self {
            index,
            depth,
            parent,
            children: Vec::new(),
            files: 0..0,
            path,
            lock: BusyLock::new(),
            exists: AtomicBool::new(false),
            file_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn add_child(&mut self, child: usize) {
        self.children.push(child);
    }

    pub(crate) fn set_files(&mut self, files: Range<usize>) {
        self.files = files;
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }

    /// Indices of the files living in this directory
    pub fn files(&self) -> Range<usize> {
        self.files.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn exists(&self) -> bool {
        self.exists.load(Ordering::Acquire)
    }

    /// Existing files in this directory
    pub fn file_count(&self) -> u64 {
        self.file_count.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.lock.is_busy()
    }

    pub(crate) fn lock(&self) -> &BusyLock {
        &self.lock
    }

    /// Startup discovery only; no lease needed before workers run
    pub(crate) fn discovered(&self) {
        self.exists.store(true, Ordering::Release);
    }

    pub(crate) fn count_files(&self, add: bool) -> Result<()> {
        if add {
            self.file_count.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        }
        self.file_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| {
                FatalError::NegativeCount {
                    what: "file",
                    path: self.path.clone(),
                }
                .into()
            })
    }

    pub(crate) fn set_exists(&self, exists: bool) -> Result<()> {
        if self.exists.swap(exists, Ordering::AcqRel) == exists {
            return Err(FatalError::ExistsUnchanged {
                path: self.path.clone(),
                exists,
            }
            .into());
        }
        Ok(())
    }
}

/// Exclusive hold on a directory's busy-lock
///
/// Dropping the lease releases the lock; [`DirLease::release`] does the same but
/// reports a lock that was cleared by somebody else.
#[derive(Debug)]
pub struct DirLease {
    anchor: Arc<Anchor>,
    index: usize,
    parent: Option<Box<DirLease>>,
    released: bool,
}

impl DirLease {
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

    pub fn dir(&self) -> &Directory {
        self.anchor.dir(self.index)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Try to also lock the parent directory; the anchor root always succeeds
    pub fn lock_parent(&mut self) -> bool {
        let parent = match self.dir().parent() {
            Some(p) => p,
            None => return true,
        };
        match self.anchor.try_lock_dir(parent) {
            Some(lease) => {
                self.parent = Some(Box::new(lease));
                true
            }
            None => false,
        }
    }

    pub fn parent_exists(&self) -> bool {
        self.anchor.parent_exists(self.index)
    }

    pub fn any_existing_children(&self) -> bool {
        self.anchor.any_existing_children(self.index)
    }

    /// Record that the directory now exists on disk
    pub fn mark_created(&self) -> Result<()> {
        self.dir().set_exists(true)?;
        self.anchor.count_dirs(true)
    }

    /// Record that the directory was removed
    ///
    /// # Errors
    ///
    /// Fatal if the directory still holds files or existing children.
    pub fn mark_deleted(&self) -> Result<()> {
        let dir = self.dir();
        let files = dir.file_count();
        let children = dir
            .children()
            .iter()
            .filter(|&&c| self.anchor.dir(c).exists())
            .count();
        if files > 0 || children > 0 {
            return Err(FatalError::DirectoryNotEmpty {
                path: dir.path().to_path_buf(),
                files,
                children,
            }
            .into());
        }
        dir.set_exists(false)?;
        self.anchor.count_dirs(false)
    }

    /// Release the lock, failing if it was not held
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        let dir = self.dir();
        dir.lock().unlock(&dir.path().display().to_string())
    }
}

impl Drop for DirLease {
    fn drop(&mut self) {
        if !self.released {
            let dir = self.anchor.dir(self.index);
            let _ = dir.lock().unlock(&dir.path().display().to_string());
        }
    }
}
