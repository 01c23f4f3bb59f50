//! Target selection
//!
//! Each finder loops: pick a candidate, try to lock it, check the
//! preconditions for the operation at hand. A failed check releases the lock,
//! counts the block reason and retries; when the reason can never clear (see
//! [`can_we_get_more_work`](crate::blocked::can_we_get_more_work)) the finder
//! gives up and returns `None`.
//!
//! | Finder                  | Needs                                       |
//! |-------------------------|---------------------------------------------|
//! | `find_existing_file`    | file exists                                 |
//! | `find_file_to_read`     | file exists and is not empty                |
//! | `find_file_to_write`    | parent exists, file exists if required      |
//! | `find_nonexisting_file` | file missing, parent exists (and locked)    |

use super::recreates;
use crate::blocked::{BlockReason, Role};
use crate::namespace::{Anchor, FileLease};
use crate::worker::WorkerCtx;
use crate::Result;
use std::sync::Arc;

/// Whether a file about to be written has to exist already
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget {
    MustExist,
    Either,
}

/// Shared selection loop; `check` returns the reason a locked candidate is
/// unusable, or `None` to take it
fn find_file<F>(ctx: &mut WorkerCtx, anchor: &Arc<Anchor>, mut check: F) -> Result<Option<FileLease>>
where
    F: FnMut(&mut FileLease) -> Option<BlockReason>,
{
    let group = Arc::clone(&ctx.group);
    let config = &group.config;

    while !ctx.is_stopping() {
        let index = match anchor.select_file(config.select, config.select_once, &mut ctx.rng) {
            Some(index) => index,
            None => {
                group.exhausted("every file has been selected once", anchor);
                return Ok(None);
            }
        };

        let mut lease = match anchor.try_lock_file(index) {
            Some(lease) => lease,
            None => {
                ctx.block(BlockReason::FileBusy, anchor)?;
                continue;
            }
        };

        if lease.entry().is_bad() {
            drop(lease);
            ctx.block(BlockReason::BadFileSkipped, anchor)?;
            continue;
        }

        match check(&mut lease) {
            None => return Ok(Some(lease)),
            Some(reason) => {
                drop(lease);
                if !ctx.block(reason, anchor)? {
                    return Ok(None);
                }
            }
        }
    }
    Ok(None)
}

/// Any existing file (delete, attribute operations, open/close)
pub fn find_existing_file(ctx: &mut WorkerCtx, anchor: &Arc<Anchor>) -> Result<Option<FileLease>> {
    find_file(ctx, anchor, |lease| {
        if !lease.entry().exists() {
            return Some(BlockReason::FileMustExist);
        }
        None
    })
}

/// An existing, non-empty file
pub fn find_file_to_read(ctx: &mut WorkerCtx, anchor: &Arc<Anchor>) -> Result<Option<FileLease>> {
    find_file(ctx, anchor, |lease| {
        let entry = lease.entry();
        if !entry.exists() {
            return Some(BlockReason::FileMustExist);
        }
        if entry.current_size() == 0 {
            return Some(BlockReason::FileNotFull);
        }
        None
    })
}

/// A file to write into
///
/// A missing file will be created by the write, and an existing one may be
/// deleted and created again, so in both cases its parent is locked as for
/// [`find_nonexisting_file`].
pub fn find_file_to_write(ctx: &mut WorkerCtx, anchor: &Arc<Anchor>, target: WriteTarget) -> Result<Option<FileLease>> {
    let guard_parent = anchor.roles().active(Role::DirDeleter) > 0;
    let group = Arc::clone(&ctx.group);
    find_file(ctx, anchor, |lease| {
        let exists = lease.entry().exists();
        if target == WriteTarget::MustExist && !exists {
            return Some(BlockReason::FileMustExist);
        }
        let creates = !exists || recreates(&group.config, lease.entry());
        if creates && guard_parent && !lease.lock_parent() {
            return Some(BlockReason::ParentDirBusy);
        }
        if !lease.parent_exists() {
            return Some(BlockReason::MissingParent);
        }
        None
    })
}

/// A file slot that does not exist yet
///
/// While any rmdir worker runs on the anchor the parent directory is locked
/// too, so it cannot disappear between this check and the create.
pub fn find_nonexisting_file(ctx: &mut WorkerCtx, anchor: &Arc<Anchor>) -> Result<Option<FileLease>> {
    let guard_parent = anchor.roles().active(Role::DirDeleter) > 0;
    find_file(ctx, anchor, |lease| {
        if lease.entry().exists() {
            return Some(BlockReason::FileMayNotExist);
        }
        if guard_parent && !lease.lock_parent() {
            return Some(BlockReason::ParentDirBusy);
        }
        if !lease.parent_exists() {
            return Some(BlockReason::MissingParent);
        }
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileSizes, OperationType, SelectionMode, WorkloadConfig};
    use crate::engine::mock::MockIo;
    use crate::worker::testing::{anchor_with, bare_anchor, ctx_for};

    #[test]
    fn test_read_skips_missing_and_empty() {
        let io = Arc::new(MockIo::new());
        io.add_file("/a/dir1_0.dir/file000001.dat", 0);
        let anchor = anchor_with(&io, "a", 1, 1, 3, FileSizes::Fixed(4096), &[2]);
        let mut config = WorkloadConfig::new("w", "a", OperationType::Read);
        config.select = SelectionMode::Sequential;
        let mut ctx = ctx_for(&io, &anchor, config);

        let lease = find_file_to_read(&mut ctx, &anchor).unwrap().unwrap();
        assert_eq!(lease.index(), 2);
        let counters = ctx.blocker.counters();
        assert_eq!(counters.get(BlockReason::FileMustExist), 1);
        assert_eq!(counters.get(BlockReason::FileNotFull), 1);
    }

    #[test]
    fn test_busy_file_is_counted() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 2, FileSizes::Fixed(4096), &[0, 1]);
        let mut config = WorkloadConfig::new("w", "a", OperationType::Delete);
        config.select = SelectionMode::Sequential;
        let mut ctx = ctx_for(&io, &anchor, config);

        let held = anchor.try_lock_file(0).unwrap();
        let lease = find_existing_file(&mut ctx, &anchor).unwrap().unwrap();
        assert_eq!(lease.index(), 1);
        assert_eq!(ctx.blocker.counters().get(BlockReason::FileBusy), 1);
        drop(held);
    }

    #[test]
    fn test_nothing_to_create_is_exhausted() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 2, FileSizes::Fixed(4096), &[0, 1]);
        let mut ctx = ctx_for(&io, &anchor, WorkloadConfig::new("w", "a", OperationType::Create));

        assert!(find_nonexisting_file(&mut ctx, &anchor).unwrap().is_none());
        assert!(ctx.group.is_shutdown());
        assert_eq!(ctx.blocker.counters().get(BlockReason::FileMayNotExist), 1);
    }

    #[test]
    fn test_missing_parent_without_dir_creator_is_exhausted() {
        let io = Arc::new(MockIo::new());
        let anchor = bare_anchor(&io, "a", 1, 1, 2);
        let mut ctx = ctx_for(&io, &anchor, WorkloadConfig::new("w", "a", OperationType::Create));

        assert!(find_nonexisting_file(&mut ctx, &anchor).unwrap().is_none());
        assert_eq!(ctx.blocker.counters().get(BlockReason::MissingParent), 1);
    }

    #[test]
    fn test_create_locks_parent_when_rmdir_runs() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 1, FileSizes::Fixed(4096), &[]);
        let _rmdir = anchor.roles().enter(Role::DirDeleter);
        let mut ctx = ctx_for(&io, &anchor, WorkloadConfig::new("w", "a", OperationType::Create));

        let lease = find_nonexisting_file(&mut ctx, &anchor).unwrap().unwrap();
        assert!(anchor.dir(0).is_busy());
        drop(lease);
        assert!(!anchor.dir(0).is_busy());
    }

    #[test]
    fn test_rewrite_locks_parent_when_rmdir_runs() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 1, FileSizes::Fixed(4096), &[0]);
        let _rmdir = anchor.roles().enter(Role::DirDeleter);
        let mut config = WorkloadConfig::new("w", "a", OperationType::Write);
        config.delete_before_write = true;
        let mut ctx = ctx_for(&io, &anchor, config);

        let lease = find_file_to_write(&mut ctx, &anchor, WriteTarget::Either).unwrap().unwrap();
        assert!(anchor.dir(0).is_busy());
        let session = crate::ops::open_for_write(lease, &mut ctx).unwrap();
        assert!(anchor.dir(0).is_busy());
        session.close(&mut ctx).unwrap();
        assert!(!anchor.dir(0).is_busy());

        // A plain overwrite leaves the parent alone
        let mut ctx = ctx_for(&io, &anchor, WorkloadConfig::new("w", "a", OperationType::Write));
        let lease = find_file_to_write(&mut ctx, &anchor, WriteTarget::Either).unwrap().unwrap();
        assert!(!anchor.dir(0).is_busy());
        drop(lease);

        // An rmdir holding the directory blocks the rewrite
        let mut config = WorkloadConfig::new("w", "a", OperationType::Write);
        config.delete_before_write = true;
        let mut ctx = ctx_for(&io, &anchor, config);
        let dir = anchor.try_lock_dir(0).unwrap();
        assert!(find_file_to_write(&mut ctx, &anchor, WriteTarget::Either).is_err());
        assert!(ctx.blocker.counters().get(BlockReason::ParentDirBusy) > 0);
        assert!(!anchor.file(0).is_busy());
        drop(dir);
    }

    #[test]
    fn test_select_once_stops_after_one_pass() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 2, FileSizes::Fixed(4096), &[0, 1]);
        let mut config = WorkloadConfig::new("w", "a", OperationType::GetAttr);
        config.select = SelectionMode::Sequential;
        config.select_once = true;
        let mut ctx = ctx_for(&io, &anchor, config);

        for expected in 0..2 {
            let lease = find_existing_file(&mut ctx, &anchor).unwrap().unwrap();
            assert_eq!(lease.index(), expected);
        }
        assert!(find_existing_file(&mut ctx, &anchor).unwrap().is_none());
        assert!(ctx.group.is_shutdown());
    }
}
