//! File copy between two anchors
//!
//! A source file is paired with the file of the same number in the target
//! anchor. The source is always locked before the target. Any existing target
//! is deleted, then both files are walked block by block: the target write
//! uses exactly the offset and length of the source read.
//!
//! The source is flagged as copied once both files are closed. With
//! sequential selection the workload stops when it comes back to a file that
//! was already copied.

use super::select::find_file_to_read;
use super::{delete_file, OpState, StateMachine};
use crate::blocked::{BlockReason, Role};
use crate::config::SelectionMode;
use crate::engine::OpenMode;
use crate::namespace::{Anchor, FileLease};
use crate::session::ActiveFile;
use crate::stats::{response_micros, OperationKind};
use crate::worker::WorkerCtx;
use crate::Result;
use anyhow::Context;
use std::sync::Arc;

#[derive(Debug)]
pub struct OpCopy {
    state: OpState,
}

impl Default for OpCopy {
    fn default() -> Self {
        Self::new()
    }
}

impl OpCopy {
    pub fn new() -> Self {
        Self {
            state: OpState::Selecting,
        }
    }

    /// Lock a source and its target; `Ok(None)` means no more work
    fn find_pair(&mut self, ctx: &mut WorkerCtx, target_anchor: &Arc<Anchor>) -> Result<Option<(FileLease, FileLease)>> {
        let group = Arc::clone(&ctx.group);
        let guard_parent = target_anchor.roles().active(Role::DirDeleter) > 0;

        while !ctx.is_stopping() {
            self.state = OpState::Selecting;
            let source = match find_file_to_read(ctx, &group.anchor)? {
                Some(lease) => lease,
                None => return Ok(None),
            };

            if group.config.select == SelectionMode::Sequential && source.entry().is_copied() {
                ctx.blocker.event(BlockReason::FileIsCopied);
                source.release()?;
                group.exhausted("every source file has been copied", &group.anchor);
                return Ok(None);
            }

            let mut target = match target_anchor.try_lock_file(source.index()) {
                Some(lease) => lease,
                None => {
                    drop(source);
                    ctx.block(BlockReason::FileBusy, target_anchor)?;
                    continue;
                }
            };

            let reason = if guard_parent && !target.lock_parent() {
                Some(BlockReason::ParentDirBusy)
            } else if !target.parent_exists() {
                Some(BlockReason::MissingParent)
            } else {
                None
            };
            match reason {
                None => {
                    self.state = OpState::Locked;
                    return Ok(Some((source, target)));
                }
                Some(reason) => {
                    drop(target);
                    drop(source);
                    if !ctx.block(reason, target_anchor)? {
                        return Ok(None);
                    }
                }
            }
        }
        Ok(None)
    }
}

impl StateMachine for OpCopy {
    fn do_operation(&mut self, ctx: &mut WorkerCtx) -> Result<bool> {
        let group = Arc::clone(&ctx.group);
        let target_anchor = group
            .target
            .clone()
            .with_context(|| format!("Workload {}: copy needs a target anchor", group.config.name))?;

        let (source, target) = match self.find_pair(ctx, &target_anchor)? {
            Some(pair) => pair,
            None => {
                self.state = OpState::Exhausted;
                return Ok(false);
            }
        };

        self.state = OpState::Executing;
        let start = ctx.run.io.now();
        if target.entry().exists() {
            delete_file(&target, ctx)?;
        }
        let mut input = ActiveFile::open(source, OpenMode::Read, ctx)?;
        let mut output = ActiveFile::open(target, OpenMode::Write, ctx)?;

        let mut complete = true;
        loop {
            if ctx.is_stopping() {
                complete = false;
                break;
            }
            input.set_xfersize(ctx.pick_xfersize());
            if !input.advance_sequential(true) {
                break;
            }
            input.read_block(ctx)?;
            if input.done_enough() {
                complete = false;
                break;
            }
            output.set_position(input.offset(), input.xfersize());
            output.write_block(ctx)?;
            if output.done_enough() {
                complete = false;
                break;
            }
        }

        let bytes = input.bytes_done();
        let source = input.close_keep_lease(ctx)?;
        output.close(ctx)?;
        if complete {
            source.set_copied(true);
        }
        source.release()?;

        let end = ctx.run.io.now();
        ctx.stats
            .record(OperationKind::Copy, response_micros(start, end, OperationKind::Copy)?, bytes);
        if complete {
            ctx.blocker.event(BlockReason::FilesCopied);
        }
        self.state = OpState::Done;
        Ok(true)
    }

    fn state(&self) -> OpState {
        self.state
    }
}
