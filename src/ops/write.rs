//! Write operation
//!
//! Same session handling as [`OpRead`](super::OpRead). Sequential writes may
//! target missing files, which then get created by the write; random writes
//! need an existing file to have something to overwrite.

use super::read::position;
use super::select::{find_file_to_write, WriteTarget};
use super::{open_for_write, OpState, StateMachine};
use crate::blocked::BlockReason;
use crate::session::{close_session, ActiveFile};
use crate::worker::WorkerCtx;
use crate::Result;
use std::sync::Arc;

#[derive(Debug)]
pub struct OpWrite {
    active: Option<ActiveFile>,
    state: OpState,
}

impl Default for OpWrite {
    fn default() -> Self {
        Self::new()
    }
}

impl OpWrite {
    pub fn new() -> Self {
        Self {
            active: None,
            state: OpState::Selecting,
        }
    }

    pub(crate) fn take_session(&mut self) -> Option<ActiveFile> {
        self.active.take()
    }

    pub(crate) fn give_session(&mut self, session: Option<ActiveFile>) {
        self.active = session;
    }

    fn open_next(&mut self, ctx: &mut WorkerCtx) -> Result<Option<ActiveFile>> {
        self.state = OpState::Selecting;
        let target = if ctx.group.config.sequential {
            WriteTarget::Either
        } else {
            WriteTarget::MustExist
        };
        let anchor = Arc::clone(&ctx.group.anchor);
        let lease = match find_file_to_write(ctx, &anchor, target)? {
            Some(lease) => lease,
            None => return Ok(None),
        };
        self.state = OpState::Locked;
        open_for_write(lease, ctx).map(Some)
    }
}

impl StateMachine for OpWrite {
    fn do_operation(&mut self, ctx: &mut WorkerCtx) -> Result<bool> {
        let (mut session, mut fresh) = match self.active.take() {
            Some(session) if !session.done_enough() => (session, false),
            mut stale => {
                close_session(&mut stale, ctx)?;
                match self.open_next(ctx)? {
                    Some(session) => (session, true),
                    None => {
                        self.state = OpState::Exhausted;
                        return Ok(false);
                    }
                }
            }
        };

        while !position(&mut session, false, ctx) {
            session.close(ctx)?;
            if fresh {
                // Nothing at all to transfer in this file
                let anchor = Arc::clone(&ctx.group.anchor);
                if !ctx.block(BlockReason::BadFileSkipped, &anchor)? {
                    self.state = OpState::Exhausted;
                    return Ok(false);
                }
            }
            session = match self.open_next(ctx)? {
                Some(session) => session,
                None => {
                    self.state = OpState::Exhausted;
                    return Ok(false);
                }
            };
            fresh = true;
        }

        self.state = OpState::Executing;
        session.write_block(ctx)?;
        session.check_quota();
        self.active = Some(session);
        self.state = OpState::Done;
        Ok(true)
    }

    fn state(&self) -> OpState {
        self.state
    }

    fn finish(&mut self, ctx: &mut WorkerCtx) -> Result<()> {
        close_session(&mut self.active, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocked::BlockReason;
    use crate::config::{FileSizes, OperationType, SelectionMode, WorkloadConfig};
    use crate::engine::mock::{IoCall, MockIo};
    use crate::engine::NativeIo;
    use crate::stats::OperationKind;
    use crate::worker::testing::{anchor_with, ctx_for, test_run};
    use crate::worker::WorkloadGroup;

    #[test]
    fn test_sequential_write_creates_file() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 1, FileSizes::Fixed(3 * 4096), &[]);
        let mut config = WorkloadConfig::new("w", "a", OperationType::Write);
        config.select = SelectionMode::Sequential;
        let mut ctx = ctx_for(&io, &anchor, config);
        let mut op = OpWrite::new();

        for _ in 0..3 {
            assert!(op.do_operation(&mut ctx).unwrap());
        }
        op.finish(&mut ctx).unwrap();

        let offsets: Vec<u64> = io.calls_of(IoCall::Write).iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0, 4096, 8192]);
        let entry = anchor.file(0);
        assert!(entry.exists());
        assert!(entry.is_full());
        assert_eq!(io.file_size(entry.path()), Some(3 * 4096));
        assert_eq!(ctx.blocker.counters().get(BlockReason::FileCreates), 1);
        assert_eq!(ctx.stats.snapshot().write_bytes, 3 * 4096);
    }

    #[test]
    fn test_random_write_needs_existing_file() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 4, FileSizes::Fixed(64 * 1024), &[2]);
        let mut config = WorkloadConfig::new("w", "a", OperationType::Write);
        config.sequential = false;
        let mut ctx = ctx_for(&io, &anchor, config);
        let mut op = OpWrite::new();

        for _ in 0..8 {
            assert!(op.do_operation(&mut ctx).unwrap());
        }
        op.finish(&mut ctx).unwrap();

        let writes = io.calls_of(IoCall::Write);
        assert_eq!(writes.len(), 8);
        assert!(writes.iter().all(|w| w.path == anchor.file(2).path()));
        assert_eq!(ctx.stats.snapshot().counter(OperationKind::Write).operations, 8);
    }

    #[test]
    fn test_random_write_of_short_files() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 2, FileSizes::Fixed(1000), &[0, 1]);
        let mut config = WorkloadConfig::new("w", "a", OperationType::Write);
        config.sequential = false;
        let mut ctx = ctx_for(&io, &anchor, config);
        let mut op = OpWrite::new();

        for _ in 0..50 {
            assert!(op.do_operation(&mut ctx).unwrap());
        }
        op.finish(&mut ctx).unwrap();

        let writes = io.calls_of(IoCall::Write);
        assert_eq!(writes.len(), 50);
        assert!(writes.iter().all(|w| w.offset == 0 && w.length == 1000));
        assert_eq!(ctx.stats.snapshot().counter(OperationKind::Write).operations, 50);
        assert_eq!(io.file_size(anchor.file(0).path()), Some(1000));
    }

    #[test]
    fn test_empty_target_size_counts_blocks() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 1, FileSizes::Fixed(0), &[0]);
        let mut config = WorkloadConfig::new("w", "a", OperationType::Write);
        config.sequential = false;
        let mut run = test_run(&io, vec![Arc::clone(&anchor)], vec![config.clone()]);
        run.policy.max_consecutive = 3;
        let group = WorkloadGroup::with_anchors(config, Arc::clone(&anchor), None);
        let mut ctx = WorkerCtx::new(0, Arc::new(run), Arc::new(group));
        let mut op = OpWrite::new();

        let err = op.do_operation(&mut ctx).unwrap_err();
        assert!(matches!(
            crate::error::as_fatal(&err),
            Some(crate::error::FatalError::TooManyBlocks { .. })
        ));
        assert_eq!(ctx.blocker.counters().get(BlockReason::BadFileSkipped), 4);
        assert!(io.calls_of(IoCall::Write).is_empty());
        assert_eq!(io.open_handles(), 0);
        assert!(!anchor.file(0).is_busy());
    }

    #[test]
    fn test_write_errors_mark_file_bad() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 1, FileSizes::Fixed(64 * 1024), &[0]);
        let mut config = WorkloadConfig::new("w", "a", OperationType::Write);
        config.sequential = false;
        let mut ctx = ctx_for(&io, &anchor, config);
        io.set_fail_writes(true);
        let mut op = OpWrite::new();

        assert!(op.do_operation(&mut ctx).unwrap());
        assert!(anchor.file(0).is_bad());
        let stats = ctx.stats.snapshot();
        assert_eq!(stats.counter(OperationKind::Write).errors, 1);
        assert_eq!(stats.counter(OperationKind::Write).operations, 0);

        op.finish(&mut ctx).unwrap();
        assert!(!anchor.file(0).is_busy());
    }
}
