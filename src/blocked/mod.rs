//! Block reasons and the retry/exhaustion policy
//!
//! Every time a worker fails to get a usable target it records a [`BlockReason`]
//! and goes back to selection. The same counters also carry plain event counts
//! (opens, creates, deletes, ...) so the end-of-run summary shows both.
//!
//! Whether retrying can ever succeed is decided by [`can_we_get_more_work`]: it
//! looks at the namespace counts and at the roles still active on the anchor. A
//! worker that gets `false` stops with "no more work" instead of spinning.

use crate::error::FatalError;
use crate::namespace::Anchor;
use crate::Result;
use crossbeam::utils::CachePadded;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Why a worker could not make progress, or a counted event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockReason {
    FileBusy,
    DirBusyMkdir,
    DirBusyRmdir,
    ParentDirBusy,
    BadFileSkipped,
    FileMustExist,
    FileMayNotExist,
    FileNotFull,
    DirExists,
    DirDoesNotExist,
    MissingParent,
    DirStillHasChild,
    DirStillHasFiles,
    FileIsCopied,
    ReadOpens,
    WriteOpens,
    FileCreates,
    FileDeletes,
    FilesCopied,
    FileCloses,
    DirectoryCreates,
    DirectoryDeletes,
    GetAttr,
    SetAttr,
    Access,
}

impl BlockReason {
    pub const COUNT: usize = 25;

    pub const ALL: [BlockReason; Self::COUNT] = [
        BlockReason::FileBusy,
        BlockReason::DirBusyMkdir,
        BlockReason::DirBusyRmdir,
        BlockReason::ParentDirBusy,
        BlockReason::BadFileSkipped,
        BlockReason::FileMustExist,
        BlockReason::FileMayNotExist,
        BlockReason::FileNotFull,
        BlockReason::DirExists,
        BlockReason::DirDoesNotExist,
        BlockReason::MissingParent,
        BlockReason::DirStillHasChild,
        BlockReason::DirStillHasFiles,
        BlockReason::FileIsCopied,
        BlockReason::ReadOpens,
        BlockReason::WriteOpens,
        BlockReason::FileCreates,
        BlockReason::FileDeletes,
        BlockReason::FilesCopied,
        BlockReason::FileCloses,
        BlockReason::DirectoryCreates,
        BlockReason::DirectoryDeletes,
        BlockReason::GetAttr,
        BlockReason::SetAttr,
        BlockReason::Access,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            BlockReason::FileBusy => "FILE_BUSY",
            BlockReason::DirBusyMkdir => "DIR_BUSY_MKDIR",
            BlockReason::DirBusyRmdir => "DIR_BUSY_RMDIR",
            BlockReason::ParentDirBusy => "PARENT_DIR_BUSY",
            BlockReason::BadFileSkipped => "BAD_FILE_SKIPPED",
            BlockReason::FileMustExist => "FILE_MUST_EXIST",
            BlockReason::FileMayNotExist => "FILE_MAY_NOT_EXIST",
            BlockReason::FileNotFull => "FILE_NOT_FULL",
            BlockReason::DirExists => "DIR_EXISTS",
            BlockReason::DirDoesNotExist => "DIR_DOES_NOT_EXIST",
            BlockReason::MissingParent => "MISSING_PARENT",
            BlockReason::DirStillHasChild => "DIR_STILL_HAS_CHILD",
            BlockReason::DirStillHasFiles => "DIR_STILL_HAS_FILES",
            BlockReason::FileIsCopied => "FILE_IS_COPIED",
            BlockReason::ReadOpens => "READ_OPENS",
            BlockReason::WriteOpens => "WRITE_OPENS",
            BlockReason::FileCreates => "FILE_CREATES",
            BlockReason::FileDeletes => "FILE_DELETES",
            BlockReason::FilesCopied => "FILES_COPIED",
            BlockReason::FileCloses => "FILE_CLOSES",
            BlockReason::DirectoryCreates => "DIRECTORY_CREATES",
            BlockReason::DirectoryDeletes => "DIRECTORY_DELETES",
            BlockReason::GetAttr => "GET_ATTR",
            BlockReason::SetAttr => "SET_ATTR",
            BlockReason::Access => "ACCESS",
        }
    }

    /// True for stalls, false for plain event counts
    pub fn is_block(self) -> bool {
        self.index() <= BlockReason::FileIsCopied.index()
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-worker block and event counters, readable from the reporter thread
#[derive(Debug)]
pub struct BlockCounters {
    counts: [CachePadded<AtomicU64>; BlockReason::COUNT],
}

impl BlockCounters {
    pub fn new() -> Self {
        Self {
            counts: std::array::from_fn(|_| CachePadded::new(AtomicU64::new(0))),
        }
    }

    #[inline]
    pub fn count(&self, reason: BlockReason) {
        self.counts[reason.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, reason: BlockReason) -> u64 {
        self.counts[reason.index()].load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> BlockSummary {
        let mut summary = BlockSummary::default();
        for reason in BlockReason::ALL {
            summary.counts[reason.index()] = self.get(reason);
        }
        summary
    }
}

impl Default for BlockCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain copy of block counters, mergeable across workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSummary {
    counts: [u64; BlockReason::COUNT],
}

impl Default for BlockSummary {
    fn default() -> Self {
        Self {
            counts: [0; BlockReason::COUNT],
        }
    }
}

impl BlockSummary {
    pub fn get(&self, reason: BlockReason) -> u64 {
        self.counts[reason.index()]
    }

    pub fn merge(&mut self, other: &BlockSummary) {
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts.iter()) {
            *mine += theirs;
        }
    }

    /// Non-zero counters in catalogue order
    pub fn non_zero(&self) -> impl Iterator<Item = (BlockReason, u64)> + '_ {
        BlockReason::ALL
            .into_iter()
            .map(|r| (r, self.get(r)))
            .filter(|&(_, n)| n > 0)
    }
}

/// Backoff and give-up limits for blocked workers
#[derive(Debug, Clone, Copy)]
pub struct BlockPolicy {
    pub backoff: Duration,
    pub max_consecutive: u64,
}

impl Default for BlockPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_micros(200),
            max_consecutive: 10_000,
        }
    }
}

/// One worker's view of the block counters plus its consecutive-block streak
#[derive(Debug)]
pub struct Blocker {
    worker: usize,
    policy: BlockPolicy,
    counters: Arc<BlockCounters>,
    consecutive: u64,
}

impl Blocker {
    pub fn new(worker: usize, policy: BlockPolicy, counters: Arc<BlockCounters>) -> Self {
        Self {
            worker,
            policy,
            counters,
            consecutive: 0,
        }
    }

    pub fn counters(&self) -> &Arc<BlockCounters> {
        &self.counters
    }

    /// Count an event that is not a stall
    #[inline]
    pub fn event(&self, reason: BlockReason) {
        self.counters.count(reason);
    }

    /// Count a stall and back off
    ///
    /// # Errors
    ///
    /// [`FatalError::TooManyBlocks`] when the worker has not completed a
    /// transaction for more than `max_consecutive` blocks.
    pub fn block(&mut self, reason: BlockReason) -> Result<()> {
        self.counters.count(reason);
        self.consecutive += 1;
        if self.consecutive > self.policy.max_consecutive {
            return Err(FatalError::TooManyBlocks {
                worker: self.worker,
                count: self.consecutive,
                reason: reason.label(),
            }
            .into());
        }
        if !self.policy.backoff.is_zero() {
            std::thread::sleep(self.policy.backoff);
        }
        Ok(())
    }

    /// Count a stall that is expected to clear on the next attempt
    ///
    /// No backoff, and the consecutive-block streak is left alone.
    #[inline]
    pub fn wait(&self, reason: BlockReason) {
        self.counters.count(reason);
    }

    /// A transaction completed
    #[inline]
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u64 {
        self.consecutive
    }
}

/// Role a worker plays on an anchor, as far as producing resources goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    FileCreator,
    FileDeleter,
    DirCreator,
    DirDeleter,
}

/// Number of live workers per role on one anchor
#[derive(Debug, Default)]
pub struct ActiveRoles {
    counts: [AtomicUsize; 4],
}

impl ActiveRoles {
    fn slot(role: Role) -> usize {
        match role {
            Role::FileCreator => 0,
            Role::FileDeleter => 1,
            Role::DirCreator => 2,
            Role::DirDeleter => 3,
        }
    }

    pub fn active(&self, role: Role) -> usize {
        self.counts[Self::slot(role)].load(Ordering::Acquire)
    }

    /// Register a role; it stays active until the guard is dropped
    pub fn enter(self: &Arc<Self>, role: Role) -> RoleGuard {
        self.counts[Self::slot(role)].fetch_add(1, Ordering::AcqRel);
        RoleGuard {
            roles: Arc::clone(self),
            role,
        }
    }
}

/// Keeps a role registered for the lifetime of a worker
#[derive(Debug)]
pub struct RoleGuard {
    roles: Arc<ActiveRoles>,
    role: Role,
}

impl Drop for RoleGuard {
    fn drop(&mut self) {
        self.roles.counts[ActiveRoles::slot(self.role)].fetch_sub(1, Ordering::AcqRel);
    }
}

/// Can retrying after `reason` ever succeed on `anchor`?
///
/// Contention reasons always answer yes. Existence reasons answer yes while a
/// matching entity is still around or some live worker can produce one.
pub fn can_we_get_more_work(reason: BlockReason, anchor: &Anchor) -> bool {
    let roles = anchor.roles();
    match reason {
        BlockReason::FileMustExist => {
            anchor.existing_files() > 0 || roles.active(Role::FileCreator) > 0
        }
        BlockReason::FileNotFull => anchor.filled_files() > 0 || roles.active(Role::FileCreator) > 0,
        BlockReason::FileMayNotExist => {
            anchor.missing_files() > 0 || roles.active(Role::FileDeleter) > 0
        }
        BlockReason::DirDoesNotExist => {
            anchor.existing_dirs() > 0 || roles.active(Role::DirCreator) > 0
        }
        BlockReason::DirExists => anchor.missing_dirs() > 0 || roles.active(Role::DirDeleter) > 0,
        BlockReason::DirStillHasFiles => roles.active(Role::FileDeleter) > 0,
        BlockReason::DirStillHasChild => roles.active(Role::DirDeleter) > 0,
        BlockReason::MissingParent => {
            roles.active(Role::DirCreator) > 0 || anchor.any_file_parent_exists()
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::as_fatal;

    #[test]
    fn test_catalogue_consistent() {
        for (i, r) in BlockReason::ALL.iter().enumerate() {
            assert_eq!(r.index(), i);
        }
        assert!(BlockReason::FileBusy.is_block());
        assert!(BlockReason::FileIsCopied.is_block());
        assert!(!BlockReason::ReadOpens.is_block());
    }

    #[test]
    fn test_blocker_counts_and_resets() {
        let counters = Arc::new(BlockCounters::new());
        let policy = BlockPolicy {
            backoff: Duration::ZERO,
            max_consecutive: 3,
        };
        let mut blocker = Blocker::new(4, policy, Arc::clone(&counters));

        blocker.block(BlockReason::FileBusy).unwrap();
        blocker.block(BlockReason::FileBusy).unwrap();
        blocker.reset();
        blocker.block(BlockReason::FileMustExist).unwrap();
        blocker.wait(BlockReason::FileMustExist);
        blocker.event(BlockReason::ReadOpens);

        assert_eq!(counters.get(BlockReason::FileBusy), 2);
        assert_eq!(counters.get(BlockReason::FileMustExist), 2);
        assert_eq!(counters.get(BlockReason::ReadOpens), 1);
        assert_eq!(blocker.consecutive(), 1);
    }

    #[test]
    fn test_too_many_consecutive_blocks() {
        let policy = BlockPolicy {
            backoff: Duration::ZERO,
            max_consecutive: 2,
        };
        let mut blocker = Blocker::new(1, policy, Arc::new(BlockCounters::new()));
        blocker.block(BlockReason::DirExists).unwrap();
        blocker.block(BlockReason::DirExists).unwrap();
        let err = blocker.block(BlockReason::DirExists).unwrap_err();
        assert_eq!(
            as_fatal(&err),
            Some(&FatalError::TooManyBlocks {
                worker: 1,
                count: 3,
                reason: "DIR_EXISTS"
            })
        );
    }

    #[test]
    fn test_summary_merge() {
        let a = BlockCounters::new();
        a.count(BlockReason::FileDeletes);
        let b = BlockCounters::new();
        b.count(BlockReason::FileDeletes);
        b.count(BlockReason::DirBusyRmdir);

        let mut total = a.summary();
        total.merge(&b.summary());
        assert_eq!(total.get(BlockReason::FileDeletes), 2);
        let non_zero: Vec<_> = total.non_zero().collect();
        assert_eq!(
            non_zero,
            vec![(BlockReason::DirBusyRmdir, 1), (BlockReason::FileDeletes, 2)]
        );
    }

    #[test]
    fn test_role_guard() {
        let roles = Arc::new(ActiveRoles::default());
        let g1 = roles.enter(Role::FileCreator);
        let g2 = roles.enter(Role::FileCreator);
        assert_eq!(roles.active(Role::FileCreator), 2);
        assert_eq!(roles.active(Role::FileDeleter), 0);
        drop(g1);
        assert_eq!(roles.active(Role::FileCreator), 1);
        drop(g2);
        assert_eq!(roles.active(Role::FileCreator), 0);
    }
}
