//! Mixed read/write
//!
//! Each transaction flips a weighted coin and runs either the read or the
//! write machine. The open file is moved into whichever machine runs and
//! taken back afterwards, so both keep working on the same file until its
//! quota is used up.

use super::{OpRead, OpState, OpWrite, StateMachine};
use crate::session::{close_session, ActiveFile};
use crate::worker::WorkerCtx;
use crate::Result;
use rand::Rng;

#[derive(Debug)]
pub struct OpReadWrite {
    read: OpRead,
    write: OpWrite,
    session: Option<ActiveFile>,
    state: OpState,
}

impl Default for OpReadWrite {
    fn default() -> Self {
        Self::new()
    }
}

impl OpReadWrite {
    pub fn new() -> Self {
        Self {
            read: OpRead::for_mixed(),
            write: OpWrite::new(),
            session: None,
            state: OpState::Selecting,
        }
    }

    fn choose_read(ctx: &mut WorkerCtx) -> bool {
        let pct = ctx.group.config.read_pct;
        if pct >= 100.0 {
            true
        } else if pct <= 0.0 {
            false
        } else {
            ctx.rng.gen::<f64>() * 100.0 < pct
        }
    }
}

impl StateMachine for OpReadWrite {
    fn do_operation(&mut self, ctx: &mut WorkerCtx) -> Result<bool> {
        if Self::choose_read(ctx) {
            self.read.give_session(self.session.take());
            let result = self.read.do_operation(ctx);
            self.session = self.read.take_session();
            self.state = self.read.state();
            result
        } else {
            self.write.give_session(self.session.take());
            let result = self.write.do_operation(ctx);
            self.session = self.write.take_session();
            self.state = self.write.state();
            result
        }
    }

    fn state(&self) -> OpState {
        self.state
    }

    fn finish(&mut self, ctx: &mut WorkerCtx) -> Result<()> {
        close_session(&mut self.session, ctx)
    }
}
