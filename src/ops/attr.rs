//! Single-shot operations on existing files
//!
//! Open, close, getattr, setattr and access each pick an existing file, run
//! one call against it and release it again.

use super::select::find_existing_file;
use super::{metadata_call, OpState, StateMachine};
use crate::blocked::BlockReason;
use crate::engine::OpenMode;
use crate::namespace::FileLease;
use crate::session::ActiveFile;
use crate::stats::OperationKind;
use crate::worker::WorkerCtx;
use crate::Result;
use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// How far setattr pushes the modification time forward
const SETATTR_OFFSET: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Select an existing file and hand it to `action`
fn on_existing_file<F>(state: &mut OpState, ctx: &mut WorkerCtx, action: F) -> Result<bool>
where
    F: FnOnce(FileLease, &mut WorkerCtx) -> Result<()>,
{
    *state = OpState::Selecting;
    let anchor = Arc::clone(&ctx.group.anchor);
    let lease = match find_existing_file(ctx, &anchor)? {
        Some(lease) => lease,
        None => {
            *state = OpState::Exhausted;
            return Ok(false);
        }
    };
    *state = OpState::Executing;
    action(lease, ctx)?;
    *state = OpState::Done;
    Ok(true)
}

macro_rules! single_shot {
    ($(#[$doc:meta])* $name:ident, $action:expr) => {
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name {
            state: OpState,
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            pub fn new() -> Self {
                Self {
                    state: OpState::Selecting,
                }
            }
        }

        impl StateMachine for $name {
            fn do_operation(&mut self, ctx: &mut WorkerCtx) -> Result<bool> {
                on_existing_file(&mut self.state, ctx, $action)
            }

            fn state(&self) -> OpState {
                self.state
            }
        }
    };
}

fn get_attr(lease: FileLease, ctx: &mut WorkerCtx) -> Result<()> {
    let path = lease.path().to_path_buf();
    metadata_call(ctx, OperationKind::GetAttr, &path, |io| io.get_attr(&path))?;
    ctx.blocker.event(BlockReason::GetAttr);
    lease.release()
}

fn set_attr(lease: FileLease, ctx: &mut WorkerCtx) -> Result<()> {
    let path = lease.path().to_path_buf();
    let mtime = SystemTime::now() + SETATTR_OFFSET;
    metadata_call(ctx, OperationKind::SetAttr, &path, |io| io.set_attr(&path, mtime))?;
    ctx.blocker.event(BlockReason::SetAttr);
    lease.release()
}

fn access(lease: FileLease, ctx: &mut WorkerCtx) -> Result<()> {
    let path = lease.path().to_path_buf();
    metadata_call(ctx, OperationKind::Access, &path, |io| {
        if io.access(&path)? {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "no read access"))
        }
    })?;
    ctx.blocker.event(BlockReason::Access);
    lease.release()
}

fn open_close(lease: FileLease, ctx: &mut WorkerCtx) -> Result<()> {
    ActiveFile::open(lease, OpenMode::Read, ctx)?.close(ctx)
}

fn open_write_close(lease: FileLease, ctx: &mut WorkerCtx) -> Result<()> {
    ActiveFile::open(lease, OpenMode::Write, ctx)?.close(ctx)
}

single_shot!(
    /// Stat an existing file
    OpGetAttr,
    get_attr
);
single_shot!(
    /// Move the modification time of an existing file a year ahead
    OpSetAttr,
    set_attr
);
single_shot!(
    /// Check read access on an existing file
    OpAccess,
    access
);
single_shot!(
    /// Open an existing file for read and close it again
    OpOpen,
    open_close
);
single_shot!(
    /// Open an existing file for write and close it again
    OpClose,
    open_write_close
);
