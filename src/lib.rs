//! FSPulse - Concurrent filesystem workload engine
//!
//! FSPulse drives many worker threads against a managed directory tree,
//! creating, deleting, reading, writing, copying and stat'ing files and
//! directories while reporting statistics on wall-clock aligned intervals.
//!
//! # Architecture
//!
//! - **Namespace model**: in-memory tree of directories and files, each guarded by a
//!   non-blocking busy-lock
//! - **Active sessions**: per-thread open file with transfer size, position and quota
//! - **Operation state machines**: one loop body per operation kind
//! - **Block counters**: every stall is classified and counted; exhaustion ends a worker cleanly
//! - **Statistics**: counters, response histograms and delta/accumulate arithmetic
//! - **Interval scheduler**: second-aligned boundaries shared by all workers

pub mod blocked;
pub mod config;
pub mod engine;
pub mod error;
pub mod namespace;
pub mod ops;
pub mod output;
pub mod scheduler;
pub mod session;
pub mod stats;
pub mod util;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use engine::NativeIo;
pub use error::FatalError;
pub use worker::Runner;

/// Result type used throughout FSPulse
pub type Result<T> = anyhow::Result<T>;
