//! File creation
//!
//! Picks a file slot that does not exist, opens it for write (which creates
//! it) and closes it again. With `fill_on_create` the file is written up to
//! its target size before the close.

use super::select::find_nonexisting_file;
use super::{OpState, StateMachine};
use crate::engine::OpenMode;
use crate::session::ActiveFile;
use crate::stats::{response_micros, OperationKind};
use crate::worker::WorkerCtx;
use crate::Result;
use std::sync::Arc;

#[derive(Debug)]
pub struct OpCreate {
    state: OpState,
}

impl Default for OpCreate {
    fn default() -> Self {
        Self::new()
    }
}

impl OpCreate {
    pub fn new() -> Self {
        Self {
            state: OpState::Selecting,
        }
    }
}

impl StateMachine for OpCreate {
    fn do_operation(&mut self, ctx: &mut WorkerCtx) -> Result<bool> {
        self.state = OpState::Selecting;
        let anchor = Arc::clone(&ctx.group.anchor);
        let lease = match find_nonexisting_file(ctx, &anchor)? {
            Some(lease) => lease,
            None => {
                self.state = OpState::Exhausted;
                return Ok(false);
            }
        };

        self.state = OpState::Locked;
        let start = ctx.run.io.now();
        let mut session = ActiveFile::open(lease, OpenMode::Write, ctx)?;

        self.state = OpState::Executing;
        if ctx.group.config.fill_on_create {
            while !ctx.is_stopping() && !session.done_enough() {
                session.set_xfersize(ctx.pick_xfersize());
                if !session.advance_sequential(false) {
                    break;
                }
                session.write_block(ctx)?;
            }
        }
        session.close(ctx)?;

        let end = ctx.run.io.now();
        ctx.stats
            .record(OperationKind::Create, response_micros(start, end, OperationKind::Create)?, 0);
        self.state = OpState::Done;
        Ok(true)
    }

    fn state(&self) -> OpState {
        self.state
    }
}
