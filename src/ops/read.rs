//! Read operation
//!
//! Keeps one file open across transactions. Each transaction reads one block,
//! sequentially or at a random aligned offset, and the file is swapped for a
//! new one once its quota is used up or the end of the file is reached.

use super::select::find_file_to_read;
use super::{OpState, StateMachine};
use crate::blocked::BlockReason;
use crate::engine::OpenMode;
use crate::session::{close_session, ActiveFile};
use crate::worker::WorkerCtx;
use crate::Result;
use std::sync::Arc;

#[derive(Debug)]
pub struct OpRead {
    active: Option<ActiveFile>,
    state: OpState,
    open_mode: OpenMode,
}

impl Default for OpRead {
    fn default() -> Self {
        Self::new()
    }
}

impl OpRead {
    pub fn new() -> Self {
        Self {
            active: None,
            state: OpState::Selecting,
            open_mode: OpenMode::Read,
        }
    }

    /// Read half of mixed read/write; files are opened read/write so the
    /// write half can continue on the same session
    pub(crate) fn for_mixed() -> Self {
        Self {
            open_mode: OpenMode::Write,
            ..Self::new()
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
        let anchor = Arc::clone(&ctx.group.anchor);
        let lease = match find_file_to_read(ctx, &anchor)? {
            Some(lease) => lease,
            None => return Ok(None),
        };
        self.state = OpState::Locked;
        ActiveFile::open(lease, self.open_mode, ctx).map(Some)
    }
}

/// Pick a transfer size and move to the next block
pub(crate) fn position(session: &mut ActiveFile, reading: bool, ctx: &mut WorkerCtx) -> bool {
    session.set_xfersize(ctx.pick_xfersize());
    if ctx.group.config.sequential {
        session.advance_sequential(reading)
    } else {
        session.advance_random(reading, &mut ctx.rng)
    }
}

impl StateMachine for OpRead {
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

        while !position(&mut session, true, ctx) {
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
        session.read_block(ctx)?;
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
    use crate::config::{FileSizes, OperationType, SelectionMode, WorkloadConfig};
    use crate::engine::mock::{IoCall, MockIo};
    use crate::stats::OperationKind;
    use crate::worker::testing::{anchor_with, ctx_for};

    #[test]
    fn test_sequential_read_switches_files_at_eof() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 2, FileSizes::Fixed(8192), &[0, 1]);
        let mut config = WorkloadConfig::new("r", "a", OperationType::Read);
        config.select = SelectionMode::Sequential;
        let mut ctx = ctx_for(&io, &anchor, config);
        let mut op = OpRead::new();

        for _ in 0..4 {
            assert!(op.do_operation(&mut ctx).unwrap());
        }
        op.finish(&mut ctx).unwrap();

        let reads = io.calls_of(IoCall::Read);
        let offsets: Vec<u64> = reads.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0, 4096, 0, 4096]);
        assert_eq!(reads[0].path, anchor.file(0).path());
        assert_eq!(reads[2].path, anchor.file(1).path());
        assert_eq!(io.calls_of(IoCall::Open).len(), 2);
        assert_eq!(io.open_handles(), 0);

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.counter(OperationKind::Read).operations, 4);
        assert_eq!(stats.read_bytes, 4 * 4096);
    }

    #[test]
    fn test_random_read_stays_in_file() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 1, FileSizes::Fixed(1024 * 1024), &[0]);
        let mut config = WorkloadConfig::new("r", "a", OperationType::Read);
        config.sequential = false;
        let mut ctx = ctx_for(&io, &anchor, config);
        let mut op = OpRead::new();

        for _ in 0..32 {
            assert!(op.do_operation(&mut ctx).unwrap());
            assert_eq!(op.state(), OpState::Done);
        }
        op.finish(&mut ctx).unwrap();

        let reads = io.calls_of(IoCall::Read);
        assert_eq!(reads.len(), 32);
        assert!(reads.iter().all(|r| r.offset % 4096 == 0 && r.offset + r.length <= 1024 * 1024));
        assert_eq!(io.calls_of(IoCall::Open).len(), 1);
    }

    #[test]
    fn test_random_read_of_short_files() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 2, FileSizes::Fixed(1000), &[0, 1]);
        let mut config = WorkloadConfig::new("r", "a", OperationType::Read);
        config.sequential = false;
        let mut ctx = ctx_for(&io, &anchor, config);
        let mut op = OpRead::new();

        for _ in 0..200 {
            assert!(op.do_operation(&mut ctx).unwrap());
        }
        op.finish(&mut ctx).unwrap();

        let reads = io.calls_of(IoCall::Read);
        assert_eq!(reads.len(), 200);
        assert!(reads.iter().all(|r| r.offset == 0 && r.length == 1000));
        assert_eq!(io.calls_of(IoCall::Open).len(), 200);
        assert_eq!(ctx.stats.snapshot().counter(OperationKind::Read).operations, 200);
    }

    #[test]
    fn test_read_with_no_files_is_exhausted() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 3, FileSizes::Fixed(8192), &[]);
        let mut ctx = ctx_for(&io, &anchor, WorkloadConfig::new("r", "a", OperationType::Read));
        let mut op = OpRead::new();

        assert!(!op.do_operation(&mut ctx).unwrap());
        assert_eq!(op.state(), OpState::Exhausted);
        assert!(ctx.group.is_shutdown());
    }
}
