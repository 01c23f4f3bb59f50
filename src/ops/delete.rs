//! File deletion

use super::select::find_existing_file;
use super::{delete_file, OpState, StateMachine};
use crate::worker::WorkerCtx;
use crate::Result;
use std::sync::Arc;

#[derive(Debug)]
pub struct OpDelete {
    state: OpState,
}

impl Default for OpDelete {
    fn default() -> Self {
        Self::new()
    }
}

impl OpDelete {
    pub fn new() -> Self {
        Self {
            state: OpState::Selecting,
        }
    }
}

impl StateMachine for OpDelete {
    fn do_operation(&mut self, ctx: &mut WorkerCtx) -> Result<bool> {
        self.state = OpState::Selecting;
        let anchor = Arc::clone(&ctx.group.anchor);
        let lease = match find_existing_file(ctx, &anchor)? {
            Some(lease) => lease,
            None => {
                self.state = OpState::Exhausted;
                return Ok(false);
            }
        };

        self.state = OpState::Executing;
        delete_file(&lease, ctx)?;
        lease.release()?;
        self.state = OpState::Done;
        Ok(true)
    }

    fn state(&self) -> OpState {
        self.state
    }
}
