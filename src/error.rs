//! Fatal invariant violations
//!
//! Everything in here aborts the run. Lock contention, exhausted namespaces and
//! read/write transaction errors are handled locally and never become a
//! `FatalError`.

use std::path::PathBuf;
use thiserror::Error;

/// Broken invariant that halts the run
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FatalError {
    #[error("negative delta for {field}: current {current} < previous {previous}")]
    NegativeDelta {
        field: String,
        current: u64,
        previous: u64,
    },

    #[error("histogram bucket layouts differ ({left} vs {right} buckets)")]
    BucketLayoutMismatch { left: usize, right: usize },

    #[error("invalid bucket layout: {0}")]
    InvalidBucketLayout(String),

    #[error("failed to open {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("{op} of {path} failed: {reason}")]
    MetadataFailed {
        op: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("unknown handle {0}")]
    UnknownHandle(u64),

    #[error("duplicate handle registration {handle} for {path}")]
    DuplicateHandle { handle: u64, path: PathBuf },

    #[error("interval length requested before the scheduler was initialized")]
    IntervalNotInitialized,

    #[error("unlocking {0} which is not busy")]
    NotBusy(String),

    #[error("existence of {path} already set to {exists}")]
    ExistsUnchanged { path: PathBuf, exists: bool },

    #[error("directory {path} still has {files} files and {children} existing children")]
    DirectoryNotEmpty {
        path: PathBuf,
        files: u64,
        children: usize,
    },

    #[error("negative {what} count in {path}")]
    NegativeCount { what: &'static str, path: PathBuf },

    #[error("reading beyond end of {path}: offset {offset} + {length} > size {size}")]
    ReadBeyondEof {
        path: PathBuf,
        offset: u64,
        length: u64,
        size: u64,
    },

    #[error("clock went backwards during {0}")]
    TimeTravel(String),

    #[error("worker {worker} blocked {count} consecutive times, last reason {reason}")]
    TooManyBlocks {
        worker: usize,
        count: u64,
        reason: &'static str,
    },

    #[error("data error limit of {0} exceeded")]
    TooManyDataErrors(u64),
}

/// Look for a `FatalError` anywhere in an error chain
pub fn as_fatal(err: &anyhow::Error) -> Option<&FatalError> {
    err.chain().find_map(|e| e.downcast_ref::<FatalError>())
}
