//! Operation state machines
//!
//! Every worker runs exactly one operation. Each operation is a small state
//! machine with the same loop body: find a target, lock it, check the
//! preconditions, execute, record, release. [`StateMachine::do_operation`]
//! runs one transaction and returns `false` once no more work can be found.
//!
//! ```text
//! Selecting -> Locked -> Executing -> Done
//!     \
//!      `-> Exhausted (no target, and nobody left who could produce one)
//! ```
//!
//! [`OpMachine`] is the closed set of operations, one variant per
//! [`OperationType`].

pub mod attr;
pub mod copy;
pub mod create;
pub mod delete;
pub mod dirs;
pub mod mixed;
pub mod read;
pub mod select;
pub mod write;

use crate::blocked::Role;
use crate::config::{OperationType, WorkloadConfig};
use crate::engine::{NativeIo, OpenMode};
use crate::error::FatalError;
use crate::namespace::{FileEntry, FileLease};
use crate::session::ActiveFile;
use crate::stats::{response_micros, OperationKind};
use crate::worker::WorkerCtx;
use crate::Result;
use std::io;
use std::path::Path;
use std::sync::Arc;

pub use attr::{OpAccess, OpClose, OpGetAttr, OpOpen, OpSetAttr};
pub use copy::OpCopy;
pub use create::OpCreate;
pub use delete::OpDelete;
pub use dirs::{OpMkdir, OpRmdir};
pub use mixed::OpReadWrite;
pub use read::OpRead;
pub use write::OpWrite;

/// Where an operation is in its current transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpState {
    Selecting,
    Locked,
    Executing,
    Done,
    Exhausted,
}

/// Uniform contract of every operation
pub trait StateMachine {
    /// Run one transaction; `Ok(false)` means there is no more work
    fn do_operation(&mut self, ctx: &mut WorkerCtx) -> Result<bool>;

    fn state(&self) -> OpState;

    /// Close anything still open at the end of the run
    fn finish(&mut self, _ctx: &mut WorkerCtx) -> Result<()> {
        Ok(())
    }
}

/// One of the thirteen operations
#[derive(Debug)]
pub enum OpMachine {
    Read(OpRead),
    Write(OpWrite),
    Create(OpCreate),
    Delete(OpDelete),
    Mkdir(OpMkdir),
    Rmdir(OpRmdir),
    Copy(OpCopy),
    Open(OpOpen),
    Close(OpClose),
    GetAttr(OpGetAttr),
    SetAttr(OpSetAttr),
    Access(OpAccess),
    ReadWrite(OpReadWrite),
}

impl OpMachine {
    pub fn new(operation: OperationType) -> Self {
        match operation {
            OperationType::Read => OpMachine::Read(OpRead::new()),
            OperationType::Write => OpMachine::Write(OpWrite::new()),
            OperationType::Create => OpMachine::Create(OpCreate::new()),
            OperationType::Delete => OpMachine::Delete(OpDelete::new()),
            OperationType::Mkdir => OpMachine::Mkdir(OpMkdir::new()),
            OperationType::Rmdir => OpMachine::Rmdir(OpRmdir::new()),
            OperationType::Copy => OpMachine::Copy(OpCopy::new()),
            OperationType::Open => OpMachine::Open(OpOpen::new()),
            OperationType::Close => OpMachine::Close(OpClose::new()),
            OperationType::GetAttr => OpMachine::GetAttr(OpGetAttr::new()),
            OperationType::SetAttr => OpMachine::SetAttr(OpSetAttr::new()),
            OperationType::Access => OpMachine::Access(OpAccess::new()),
            OperationType::ReadWrite => OpMachine::ReadWrite(OpReadWrite::new()),
        }
    }

    fn inner(&mut self) -> &mut dyn StateMachine {
        match self {
            OpMachine::Read(op) => op,
            OpMachine::Write(op) => op,
            OpMachine::Create(op) => op,
            OpMachine::Delete(op) => op,
            OpMachine::Mkdir(op) => op,
            OpMachine::Rmdir(op) => op,
            OpMachine::Copy(op) => op,
            OpMachine::Open(op) => op,
            OpMachine::Close(op) => op,
            OpMachine::GetAttr(op) => op,
            OpMachine::SetAttr(op) => op,
            OpMachine::Access(op) => op,
            OpMachine::ReadWrite(op) => op,
        }
    }

    pub fn do_operation(&mut self, ctx: &mut WorkerCtx) -> Result<bool> {
        self.inner().do_operation(ctx)
    }

    pub fn state(&mut self) -> OpState {
        self.inner().state()
    }

    pub fn finish(&mut self, ctx: &mut WorkerCtx) -> Result<()> {
        self.inner().finish(ctx)
    }
}

/// Producer role a worker running `operation` plays
///
/// The flag is true when the role applies to the workload's target anchor
/// rather than its own.
pub fn role_for(operation: OperationType, sequential: bool) -> Option<(Role, bool)> {
    match operation {
        OperationType::Create => Some((Role::FileCreator, false)),
        OperationType::Write | OperationType::ReadWrite if sequential => Some((Role::FileCreator, false)),
        OperationType::Copy => Some((Role::FileCreator, true)),
        OperationType::Delete => Some((Role::FileDeleter, false)),
        OperationType::Mkdir => Some((Role::DirCreator, false)),
        OperationType::Rmdir => Some((Role::DirDeleter, false)),
        _ => None,
    }
}

/// Run a timed metadata call and record it under `kind`
///
/// Provider failures here are fatal.
pub(crate) fn metadata_call<T>(
    ctx: &mut WorkerCtx,
    kind: OperationKind,
    path: &Path,
    call: impl FnOnce(&dyn NativeIo) -> io::Result<T>,
) -> Result<T> {
    let run = Arc::clone(&ctx.run);
    let start = run.io.now();
    let value = call(run.io.as_ref()).map_err(|e| FatalError::MetadataFailed {
        op: kind.label(),
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let end = run.io.now();
    ctx.stats.record(kind, response_micros(start, end, kind)?, 0);
    Ok(value)
}

/// Delete a leased file and update the namespace
pub(crate) fn delete_file(lease: &FileLease, ctx: &mut WorkerCtx) -> Result<()> {
    let path = lease.path().to_path_buf();
    metadata_call(ctx, OperationKind::Delete, &path, |io| io.delete(&path))?;
    lease.set_current_size(0);
    lease.set_exists(false)?;
    ctx.blocker.event(crate::blocked::BlockReason::FileDeletes);
    if let Some(key_map) = &ctx.run.key_map {
        key_map.forget(&path);
    }
    Ok(())
}

/// Whether [`open_for_write`] deletes `entry` before opening it
pub(crate) fn recreates(config: &WorkloadConfig, entry: &FileEntry) -> bool {
    config.sequential
        && config.delete_before_write
        && entry.exists()
        && (config.stop_after.is_none() || entry.is_full())
}

/// Open a file for writing
///
/// With `delete_before_write` a sequential workload first deletes an existing
/// file (only a full one when a quota is set) and counts the open as a create.
pub(crate) fn open_for_write(lease: FileLease, ctx: &mut WorkerCtx) -> Result<ActiveFile> {
    let recreate = recreates(&ctx.group.config, lease.entry());

    if recreate {
        delete_file(&lease, ctx)?;
    }
    let start = ctx.run.io.now();
    let session = ActiveFile::open(lease, OpenMode::Write, ctx)?;
    if recreate {
        let end = ctx.run.io.now();
        ctx.stats
            .record(OperationKind::Create, response_micros(start, end, OperationKind::Create)?, 0);
    }
    Ok(session)
}
