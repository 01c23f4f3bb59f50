//! Namespace model
//!
//! An [`Anchor`] is the in-memory image of one managed directory tree: every
//! directory and file slot the workload may touch, with existence flags, sizes
//! and a busy-lock per entity. Workers share anchors through `Arc` and take
//! [`FileLease`]/[`DirLease`] values to mutate an entity.
//!
//! # Layout
//!
//! ```text
//! <root>/dir1_0.dir/dir2_0.dir/file000000.dat
//!                             /file000001.dat
//!                  /dir2_1.dir/...
//!       /dir1_1.dir/...
//! ```
//!
//! Directories are stored parents first (depth, then position) and files are
//! numbered across the whole anchor, so two anchors built from the same shape
//! pair up file by file.
//!
//! # Example
//!
//! ```
//! use fspulse::config::{AnchorConfig, FileDistribution, FileSizes};
//! use fspulse::namespace::Anchor;
//!
//! let config = AnchorConfig {
//!     name: "a".to_string(),
//!     path: "/tmp/fspulse".into(),
//!     depth: 2,
//!     width: 2,
//!     files: 3,
//!     sizes: FileSizes::Fixed(8192),
//!     distribution: FileDistribution::Bottom,
//! };
//! let anchor = Anchor::build(&config).unwrap();
//! assert_eq!(anchor.dir_count(), 6);
//! assert_eq!(anchor.file_count(), 12);
//! ```

pub mod busy;
pub mod directory;
pub mod file_entry;

pub use directory::{DirLease, Directory};
pub use file_entry::{FileEntry, FileLease};

use crate::blocked::ActiveRoles;
use crate::config::{AnchorConfig, FileDistribution, SelectionMode};
use crate::engine::NativeIo;
use crate::error::FatalError;
use crate::Result;
use anyhow::Context;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// File sizes are drawn from a fixed seed so every run sees the same tree
const SIZE_SEED: u64 = 0;

/// What a directory is being selected for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirPurpose {
    Create,
    Remove,
}

/// Root of one managed directory tree
#[derive(Debug)]
pub struct Anchor {
    name: String,
    root: PathBuf,
    depth: usize,
    width: usize,
    dirs: Vec<Directory>,
    files: Vec<FileEntry>,
    existing_files: AtomicU64,
    existing_dirs: AtomicU64,
    filled_files: AtomicU64,
    file_cursor: AtomicUsize,
    dir_cursor: AtomicUsize,
    roles: Arc<ActiveRoles>,
}

impl Anchor {
    /// Build the tree image for `config`. Nothing is touched on disk and every
    /// entity starts out non-existing; see [`Anchor::discover`].
    pub fn build(config: &AnchorConfig) -> Result<Self> {
        if config.depth == 0 || config.width == 0 {
            anyhow::bail!(
                "anchor {}: depth and width must be at least 1 (got {}x{})",
                config.name,
                config.depth,
                config.width
            );
        }

        let mut dirs: Vec<Directory> = Vec::new();
        let mut level: Vec<usize> = Vec::new();
        for depth in 1..=config.depth {
            let parents: Vec<Option<usize>> = if depth == 1 {
                vec![None]
            } else {
                level.iter().map(|&p| Some(p)).collect()
            };
            let mut next = Vec::with_capacity(parents.len() * config.width);
            for parent in parents {
                for _ in 0..config.width {
                    let index = dirs.len();
                    let name = format!("dir{}_{}.dir", depth, next.len());
                    let path = match parent {
                        Some(p) => dirs[p].path().join(name),
                        None => config.path.join(name),
                    };
                    dirs.push(Directory::new(index, depth, parent, path));
                    if let Some(p) = parent {
                        dirs[p].add_child(index);
                    }
                    next.push(index);
                }
            }
            level = next;
        }

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(SIZE_SEED);
        let mut files = Vec::new();
        for dir in dirs.iter_mut() {
            let holds_files = match config.distribution {
                FileDistribution::Bottom => dir.depth() == config.depth,
                FileDistribution::All => true,
            };
            if !holds_files {
                continue;
            }
            let start = files.len();
            for number in 0..config.files {
                let path = dir.path().join(format!("file{:06}.dat", number));
                let size = config.sizes.pick(&mut rng);
                files.push(FileEntry::new(files.len(), dir.index(), path, size));
            }
            dir.set_files(start..files.len());
        }

        Ok(Self {
            name: config.name.clone(),
            root: config.path.clone(),
            depth: config.depth,
            width: config.width,
            dirs,
            files,
            existing_files: AtomicU64::new(0),
            existing_dirs: AtomicU64::new(0),
            filled_files: AtomicU64::new(0),
            file_cursor: AtomicUsize::new(0),
            dir_cursor: AtomicUsize::new(0),
            roles: Arc::new(ActiveRoles::default()),
        })
    }

    /// Create the root directory if needed and mark everything already on disk
    /// as existing. Must run before any worker touches the anchor.
    pub fn discover(&self, io: &dyn NativeIo) -> Result<()> {
        io.mkdir_all(&self.root)
            .with_context(|| format!("Failed to create anchor root: {}", self.root.display()))?;

        for dir in &self.dirs {
            if io.exists(dir.path()) {
                dir.discovered();
                self.existing_dirs.fetch_add(1, Ordering::AcqRel);
            }
        }
        for file in &self.files {
            if let Some(size) = io.file_size(file.path()) {
                file.discovered(size);
                self.dirs[file.dir()].count_files(true)?;
                self.existing_files.fetch_add(1, Ordering::AcqRel);
                if size > 0 {
                    self.filled_files.fetch_add(1, Ordering::AcqRel);
                }
            }
        }

        tracing::info!(
            anchor = %self.name,
            dirs = self.dir_count(),
            existing_dirs = self.existing_dirs(),
            files = self.file_count(),
            existing_files = self.existing_files(),
            "anchor discovered"
        );
        Ok(())
    }

    /// Create every directory that does not exist yet, parents first
    ///
    /// Run before the workers start so that file workloads find their
    /// directories in place. Returns the number of directories created.
    pub fn create_missing_dirs(self: &Arc<Self>, io: &dyn NativeIo) -> Result<usize> {
        let mut created = 0;
        for index in 0..self.dirs.len() {
            if self.dirs[index].exists() {
                continue;
            }
            let lease = self
                .try_lock_dir(index)
                .with_context(|| format!("Directory busy during setup: {}", self.dirs[index].path().display()))?;
            io.mkdir(lease.dir().path())
                .with_context(|| format!("Failed to create directory: {}", lease.dir().path().display()))?;
            lease.mark_created()?;
            lease.release()?;
            created += 1;
        }
        if created > 0 {
            tracing::debug!(anchor = %self.name, created, "created missing directories");
        }
        Ok(created)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn roles(&self) -> &Arc<ActiveRoles> {
        &self.roles
    }

    pub fn dir(&self, index: usize) -> &Directory {
        &self.dirs[index]
    }

    pub fn dirs(&self) -> &[Directory] {
        &self.dirs
    }

    pub fn file(&self, index: usize) -> &FileEntry {
        &self.files[index]
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn existing_files(&self) -> u64 {
        self.existing_files.load(Ordering::Acquire)
    }

    /// Files that could still be created
    pub fn missing_files(&self) -> u64 {
        (self.files.len() as u64).saturating_sub(self.existing_files())
    }

    /// Existing files with at least one byte
    pub fn filled_files(&self) -> u64 {
        self.filled_files.load(Ordering::Acquire)
    }

    /// Existing files at or beyond their target size
    pub fn full_files(&self) -> usize {
        self.files.iter().filter(|f| f.is_full()).count()
    }

    pub fn existing_dirs(&self) -> u64 {
        self.existing_dirs.load(Ordering::Acquire)
    }

    pub fn missing_dirs(&self) -> u64 {
        (self.dirs.len() as u64).saturating_sub(self.existing_dirs())
    }

    /// Does any directory that is meant to hold files exist?
    pub fn any_file_parent_exists(&self) -> bool {
        self.dirs.iter().any(|d| !d.files().is_empty() && d.exists())
    }

    pub fn parent_exists(&self, dir: usize) -> bool {
        match self.dirs[dir].parent() {
            Some(p) => self.dirs[p].exists(),
            None => true,
        }
    }

    pub fn any_existing_children(&self, dir: usize) -> bool {
        self.dirs[dir].children().iter().any(|&c| self.dirs[c].exists())
    }

    fn count(counter: &AtomicU64, add: bool, what: &'static str, root: &Path) -> Result<()> {
        if add {
            counter.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        }
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| {
                FatalError::NegativeCount {
                    what,
                    path: root.to_path_buf(),
                }
                .into()
            })
    }

    pub(crate) fn count_files(&self, add: bool) -> Result<()> {
        Self::count(&self.existing_files, add, "existing file", &self.root)
    }

    pub(crate) fn count_dirs(&self, add: bool) -> Result<()> {
        Self::count(&self.existing_dirs, add, "existing directory", &self.root)
    }

    pub(crate) fn count_filled(&self, add: bool) {
        if add {
            self.filled_files.fetch_add(1, Ordering::AcqRel);
        } else {
            let _ = self
                .filled_files
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
    }

    /// Non-blocking attempt to lock a file
    pub fn try_lock_file(self: &Arc<Self>, index: usize) -> Option<FileLease> {
        if self.files[index].lock().try_lock() {
            Some(FileLease::new(Arc::clone(self), index))
        } else {
            None
        }
    }

    /// Non-blocking attempt to lock a directory
    pub fn try_lock_dir(self: &Arc<Self>, index: usize) -> Option<DirLease> {
        if self.dirs[index].lock().try_lock() {
            Some(DirLease::new(Arc::clone(self), index))
        } else {
            None
        }
    }

    /// Next candidate file; does not lock it
    ///
    /// Random picks uniformly over all slots. Sequential walks the slots round
    /// robin, shared by every worker on the anchor; with `once` set it returns
    /// `None` after one full pass.
    pub fn select_file<R: Rng + ?Sized>(&self, mode: SelectionMode, once: bool, rng: &mut R) -> Option<usize> {
        if self.files.is_empty() {
            return None;
        }
        match mode {
            SelectionMode::Random => Some(rng.gen_range(0..self.files.len())),
            SelectionMode::Sequential => {
                let n = self.file_cursor.fetch_add(1, Ordering::AcqRel);
                if once && n >= self.files.len() {
                    None
                } else {
                    Some(n % self.files.len())
                }
            }
        }
    }

    /// Next candidate directory for mkdir or rmdir; does not lock it
    ///
    /// For creation the pick moves up to the highest missing ancestor, so a
    /// parent is created before its children. For removal it moves down to the
    /// deepest existing descendant, so children go first.
    pub fn select_directory<R: Rng + ?Sized>(&self, mode: SelectionMode, purpose: DirPurpose, rng: &mut R) -> usize {
        let mut index = match mode {
            SelectionMode::Random => rng.gen_range(0..self.dirs.len()),
            SelectionMode::Sequential => self.dir_cursor.fetch_add(1, Ordering::AcqRel) % self.dirs.len(),
        };
        match purpose {
            DirPurpose::Create => {
                while let Some(p) = self.dirs[index].parent() {
                    if self.dirs[p].exists() {
                        break;
                    }
                    index = p;
                }
            }
            DirPurpose::Remove => {
                if self.dirs[index].exists() {
                    while let Some(&child) = self.dirs[index]
                        .children()
                        .iter()
                        .find(|&&c| self.dirs[c].exists())
                    {
                        index = child;
                    }
                }
            }
        }
        index
    }
}
