//! Directory creation and removal
//!
//! Mkdir holds the new directory and its parent while the call runs, so an
//! rmdir of the parent cannot slip in between. Rmdir re-checks, under the
//! lock, that the directory has neither files nor existing children.

use super::{metadata_call, OpState, StateMachine};
use crate::blocked::BlockReason;
use crate::namespace::{DirLease, DirPurpose};
use crate::stats::OperationKind;
use crate::worker::WorkerCtx;
use crate::Result;
use std::sync::Arc;

/// Outcome of checking one locked candidate directory
enum Candidate {
    Take(DirLease),
    Retry,
    Exhausted,
}

/// Release `lease` and count `reason`, giving up when it can never clear
fn reject(lease: DirLease, reason: BlockReason, ctx: &mut WorkerCtx) -> Result<Candidate> {
    let anchor = Arc::clone(lease.anchor());
    drop(lease);
    if ctx.block(reason, &anchor)? {
        Ok(Candidate::Retry)
    } else {
        Ok(Candidate::Exhausted)
    }
}

#[derive(Debug)]
pub struct OpMkdir {
    state: OpState,
}

impl Default for OpMkdir {
    fn default() -> Self {
        Self::new()
    }
}

impl OpMkdir {
    pub fn new() -> Self {
        Self {
            state: OpState::Selecting,
        }
    }

    fn pick(&mut self, ctx: &mut WorkerCtx) -> Result<Candidate> {
        let anchor = Arc::clone(&ctx.group.anchor);
        let index = anchor.select_directory(ctx.group.config.select, DirPurpose::Create, &mut ctx.rng);
        let mut lease = match anchor.try_lock_dir(index) {
            Some(lease) => lease,
            None => {
                ctx.block(BlockReason::DirBusyMkdir, &anchor)?;
                return Ok(Candidate::Retry);
            }
        };
        self.state = OpState::Locked;

        if lease.dir().exists() {
            return reject(lease, BlockReason::DirExists, ctx);
        }
        if !lease.lock_parent() {
            return reject(lease, BlockReason::ParentDirBusy, ctx);
        }
        if !lease.parent_exists() {
            return reject(lease, BlockReason::MissingParent, ctx);
        }
        Ok(Candidate::Take(lease))
    }
}

impl StateMachine for OpMkdir {
    fn do_operation(&mut self, ctx: &mut WorkerCtx) -> Result<bool> {
        while !ctx.is_stopping() {
            self.state = OpState::Selecting;
            let lease = match self.pick(ctx)? {
                Candidate::Take(lease) => lease,
                Candidate::Retry => continue,
                Candidate::Exhausted => break,
            };

            self.state = OpState::Executing;
            let path = lease.dir().path().to_path_buf();
            metadata_call(ctx, OperationKind::Mkdir, &path, |io| io.mkdir(&path))?;
            lease.mark_created()?;
            ctx.blocker.event(BlockReason::DirectoryCreates);
            lease.release()?;
            self.state = OpState::Done;
            return Ok(true);
        }
        self.state = OpState::Exhausted;
        Ok(false)
    }

    fn state(&self) -> OpState {
        self.state
    }
}

#[derive(Debug)]
pub struct OpRmdir {
    state: OpState,
}

impl Default for OpRmdir {
    fn default() -> Self {
        Self::new()
    }
}

impl OpRmdir {
    pub fn new() -> Self {
        Self {
            state: OpState::Selecting,
        }
    }

    fn pick(&mut self, ctx: &mut WorkerCtx) -> Result<Candidate> {
        let anchor = Arc::clone(&ctx.group.anchor);
        let index = anchor.select_directory(ctx.group.config.select, DirPurpose::Remove, &mut ctx.rng);
        let lease = match anchor.try_lock_dir(index) {
            Some(lease) => lease,
            None => {
                ctx.block(BlockReason::DirBusyRmdir, &anchor)?;
                return Ok(Candidate::Retry);
            }
        };
        self.state = OpState::Locked;

        if !lease.dir().exists() {
            return reject(lease, BlockReason::DirDoesNotExist, ctx);
        }
        if lease.any_existing_children() {
            return reject(lease, BlockReason::DirStillHasChild, ctx);
        }
        if lease.dir().file_count() > 0 {
            return reject(lease, BlockReason::DirStillHasFiles, ctx);
        }
        Ok(Candidate::Take(lease))
    }
}

impl StateMachine for OpRmdir {
    fn do_operation(&mut self, ctx: &mut WorkerCtx) -> Result<bool> {
        while !ctx.is_stopping() {
            self.state = OpState::Selecting;
            let lease = match self.pick(ctx)? {
                Candidate::Take(lease) => lease,
                Candidate::Retry => continue,
                Candidate::Exhausted => break,
            };

            self.state = OpState::Executing;
            let path = lease.dir().path().to_path_buf();
            metadata_call(ctx, OperationKind::Rmdir, &path, |io| io.rmdir(&path))?;
            lease.mark_deleted()?;
            ctx.blocker.event(BlockReason::DirectoryDeletes);
            lease.release()?;
            self.state = OpState::Done;
            return Ok(true);
        }
        self.state = OpState::Exhausted;
        Ok(false)
    }

    fn state(&self) -> OpState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileSizes, OperationType, SelectionMode, WorkloadConfig};
    use crate::engine::mock::{IoCall, MockIo};
    use crate::engine::NativeIo;
    use crate::worker::testing::{anchor_with, bare_anchor, ctx_for};

    #[test]
    fn test_mkdir_builds_tree_parents_first() {
        let io = Arc::new(MockIo::new());
        let anchor = bare_anchor(&io, "a", 2, 2, 1);
        let mut config = WorkloadConfig::new("m", "a", OperationType::Mkdir);
        config.select = SelectionMode::Sequential;
        let mut ctx = ctx_for(&io, &anchor, config);
        let mut op = OpMkdir::new();

        for _ in 0..6 {
            assert!(op.do_operation(&mut ctx).unwrap());
        }
        assert_eq!(anchor.existing_dirs(), 6);
        assert!(anchor.dirs().iter().all(|d| io.has_dir(d.path())));
        assert!(anchor.dirs().iter().all(|d| !d.is_busy()));

        assert!(!op.do_operation(&mut ctx).unwrap());
        assert_eq!(op.state(), OpState::Exhausted);
        assert_eq!(ctx.blocker.counters().get(BlockReason::DirectoryCreates), 6);
    }

    #[test]
    fn test_rmdir_removes_children_first() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 2, 2, 1, FileSizes::Fixed(4096), &[]);
        let mut ctx = ctx_for(&io, &anchor, WorkloadConfig::new("r", "a", OperationType::Rmdir));
        let mut op = OpRmdir::new();

        for _ in 0..6 {
            assert!(op.do_operation(&mut ctx).unwrap());
        }
        assert_eq!(anchor.existing_dirs(), 0);
        let removed: Vec<_> = io.calls_of(IoCall::Rmdir).into_iter().map(|r| r.path).collect();
        for dir in anchor.dirs() {
            let pos = removed.iter().position(|p| p == dir.path()).unwrap();
            for &child in dir.children() {
                let child_pos = removed.iter().position(|p| p == anchor.dir(child).path()).unwrap();
                assert!(child_pos < pos);
            }
        }
        assert!(!op.do_operation(&mut ctx).unwrap());
    }

    #[test]
    fn test_rmdir_refuses_dir_with_files() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 2, FileSizes::Fixed(4096), &[1]);
        let mut ctx = ctx_for(&io, &anchor, WorkloadConfig::new("r", "a", OperationType::Rmdir));

        // No delete worker could ever empty it
        assert!(!OpRmdir::new().do_operation(&mut ctx).unwrap());
        assert!(anchor.dir(0).exists());
        assert_eq!(ctx.blocker.counters().get(BlockReason::DirStillHasFiles), 1);

        let lease = anchor.try_lock_file(1).unwrap();
        io.delete(lease.path()).unwrap();
        lease.set_exists(false).unwrap();
        lease.release().unwrap();

        let mut ctx = ctx_for(&io, &anchor, WorkloadConfig::new("r", "a", OperationType::Rmdir));
        assert!(OpRmdir::new().do_operation(&mut ctx).unwrap());
        assert!(!anchor.dir(0).exists());
    }
}
