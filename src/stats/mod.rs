//! Statistics collection
//!
//! Per-operation counters with response histograms, grouped into an
//! [`AggregateStats`] per worker. Interval reporting works on three values of the
//! same shape: the current cumulative totals, the previous snapshot, and their
//! difference.
//!
//! - **Per-worker recording**: each worker owns a [`WorkerStats`] cell; `record` only
//!   contends with the interval snapshot, never with other workers
//! - **Accumulate / delta / copy**: exact arithmetic on every field and bucket
//! - **Negative deltas are fatal**: a counter that went backwards means a reset
//!   happened underneath the reporter
//!
//! # Example
//!
//! ```
//! use fspulse::stats::{AggregateStats, OperationKind};
//! use fspulse::stats::histogram::BucketLayout;
//! use std::sync::Arc;
//!
//! let layout = Arc::new(BucketLayout::default());
//! let mut previous = AggregateStats::new(Arc::clone(&layout));
//! let mut current = previous.clone();
//! current.record(OperationKind::Read, 120, 4096);
//! current.record(OperationKind::Read, 80, 4096);
//!
//! let delta = AggregateStats::delta(&current, &previous).unwrap();
//! assert_eq!(delta.counter(OperationKind::Read).operations, 2);
//! assert_eq!(delta.read_bytes, 8192);
//! previous.copy_from(&current).unwrap();
//! ```

pub mod histogram;

use crate::error::FatalError;
use crate::Result;
pub use histogram::{BucketLayout, ResponseHistogram};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

/// Kind of a completed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Read,
    Write,
    Create,
    Delete,
    Mkdir,
    Rmdir,
    Copy,
    Open,
    Close,
    GetAttr,
    SetAttr,
    Access,
}

impl OperationKind {
    pub const COUNT: usize = 12;

    pub const ALL: [OperationKind; Self::COUNT] = [
        OperationKind::Read,
        OperationKind::Write,
        OperationKind::Create,
        OperationKind::Delete,
        OperationKind::Mkdir,
        OperationKind::Rmdir,
        OperationKind::Copy,
        OperationKind::Open,
        OperationKind::Close,
        OperationKind::GetAttr,
        OperationKind::SetAttr,
        OperationKind::Access,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Write => "write",
            OperationKind::Create => "create",
            OperationKind::Delete => "delete",
            OperationKind::Mkdir => "mkdir",
            OperationKind::Rmdir => "rmdir",
            OperationKind::Copy => "copy",
            OperationKind::Open => "open",
            OperationKind::Close => "close",
            OperationKind::GetAttr => "getattr",
            OperationKind::SetAttr => "setattr",
            OperationKind::Access => "access",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Response time in microseconds between two provider timestamps
///
/// An end before the start is a broken clock, not a zero-length transaction.
pub fn response_micros(start: u64, end: u64, what: OperationKind) -> Result<u64> {
    if start > end {
        return Err(FatalError::TimeTravel(what.to_string()).into());
    }
    Ok(end - start)
}

fn checked_delta(field: String, current: u64, previous: u64) -> Result<u64> {
    current.checked_sub(previous).ok_or_else(|| {
        FatalError::NegativeDelta {
            field,
            current,
            previous,
        }
        .into()
    })
}

/// Count, response sum and response histogram for one operation kind
#[derive(Debug, Clone)]
pub struct OperationCounter {
    pub operations: u64,
    pub response_micros: u64,
    pub errors: u64,
    pub histogram: ResponseHistogram,
}

impl OperationCounter {
    pub fn new(layout: Arc<BucketLayout>) -> Self {
        Self {
            operations: 0,
            response_micros: 0,
            errors: 0,
            histogram: ResponseHistogram::new(layout),
        }
    }

    /// Count one completed operation
    #[inline]
    pub fn add_response(&mut self, micros: u64) {
        self.operations += 1;
        self.response_micros += micros;
        self.histogram.add(micros);
    }

    pub fn accumulate(&mut self, other: &OperationCounter) -> Result<()> {
        self.histogram.accumulate(&other.histogram)?;
        self.operations += other.operations;
        self.response_micros += other.response_micros;
        self.errors += other.errors;
        Ok(())
    }

    /// `current - previous` for every field and bucket
    pub fn delta(kind: OperationKind, current: &OperationCounter, previous: &OperationCounter) -> Result<Self> {
        Ok(Self {
            operations: checked_delta(format!("{}.operations", kind), current.operations, previous.operations)?,
            response_micros: checked_delta(
                format!("{}.response", kind),
                current.response_micros,
                previous.response_micros,
            )?,
            errors: checked_delta(format!("{}.errors", kind), current.errors, previous.errors)?,
            histogram: ResponseHistogram::delta(&current.histogram, &previous.histogram)?,
        })
    }

    pub fn copy_from(&mut self, other: &OperationCounter) -> Result<()> {
        self.histogram.copy_from(&other.histogram)?;
        self.operations = other.operations;
        self.response_micros = other.response_micros;
        self.errors = other.errors;
        Ok(())
    }

    /// Operations per second over `elapsed_micros`; 0 when nothing can be computed
    pub fn rate(&self, elapsed_micros: u64) -> f64 {
        if self.operations == 0 || elapsed_micros == 0 {
            return 0.0;
        }
        self.operations as f64 * 1_000_000.0 / elapsed_micros as f64
    }

    /// Average response time in milliseconds; 0 when there were no operations
    pub fn avg_response_ms(&self) -> f64 {
        if self.operations == 0 {
            return 0.0;
        }
        self.response_micros as f64 / self.operations as f64 / 1000.0
    }
}

/// All counters and byte totals for one reporting scope
#[derive(Debug, Clone)]
pub struct AggregateStats {
    counters: Vec<OperationCounter>,
    pub read_bytes: u64,
    pub write_bytes: u64,
    /// Interval or run length these numbers cover
    pub elapsed_micros: u64,
}

impl AggregateStats {
    pub fn new(layout: Arc<BucketLayout>) -> Self {
        Self {
            counters: OperationKind::ALL
                .iter()
                .map(|_| OperationCounter::new(Arc::clone(&layout)))
                .collect(),
            read_bytes: 0,
            write_bytes: 0,
            elapsed_micros: 0,
        }
    }

    pub fn counter(&self, kind: OperationKind) -> &OperationCounter {
        &self.counters[kind.index()]
    }

    /// Record one completed transaction
    #[inline]
    pub fn record(&mut self, kind: OperationKind, response_micros: u64, bytes: u64) {
        self.counters[kind.index()].add_response(response_micros);
        match kind {
            OperationKind::Read => self.read_bytes += bytes,
            OperationKind::Write => self.write_bytes += bytes,
            _ => {}
        }
    }

    /// Record a failed read or write transaction
    pub fn record_error(&mut self, kind: OperationKind) {
        self.counters[kind.index()].errors += 1;
    }

    pub fn errors(&self) -> u64 {
        self.counters.iter().map(|c| c.errors).sum()
    }

    /// Add `other` into this scope. `elapsed_micros` is left alone: summing
    /// workers does not sum wall-clock time.
    pub fn accumulate(&mut self, other: &AggregateStats) -> Result<()> {
        for (mine, theirs) in self.counters.iter_mut().zip(&other.counters) {
            mine.accumulate(theirs)?;
        }
        self.read_bytes += other.read_bytes;
        self.write_bytes += other.write_bytes;
        Ok(())
    }

    /// `current - previous` for every counter, byte total and bucket
    ///
    /// # Errors
    ///
    /// [`FatalError::NegativeDelta`] if any field of `previous` exceeds `current`.
    pub fn delta(current: &AggregateStats, previous: &AggregateStats) -> Result<Self> {
        let counters = OperationKind::ALL
            .iter()
            .map(|&kind| OperationCounter::delta(kind, current.counter(kind), previous.counter(kind)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            counters,
            read_bytes: checked_delta("read_bytes".to_string(), current.read_bytes, previous.read_bytes)?,
            write_bytes: checked_delta("write_bytes".to_string(), current.write_bytes, previous.write_bytes)?,
            elapsed_micros: checked_delta(
                "elapsed".to_string(),
                current.elapsed_micros,
                previous.elapsed_micros,
            )?,
        })
    }

    pub fn copy_from(&mut self, other: &AggregateStats) -> Result<()> {
        for (mine, theirs) in self.counters.iter_mut().zip(&other.counters) {
            mine.copy_from(theirs)?;
        }
        self.read_bytes = other.read_bytes;
        self.write_bytes = other.write_bytes;
        self.elapsed_micros = other.elapsed_micros;
        Ok(())
    }

    pub fn rate(&self, kind: OperationKind) -> f64 {
        self.counter(kind).rate(self.elapsed_micros)
    }

    pub fn avg_response_ms(&self, kind: OperationKind) -> f64 {
        self.counter(kind).avg_response_ms()
    }

    pub fn total_operations(&self) -> u64 {
        self.counters.iter().map(|c| c.operations).sum()
    }

    /// Operations per second over all kinds
    pub fn total_rate(&self) -> f64 {
        if self.elapsed_micros == 0 {
            return 0.0;
        }
        self.total_operations() as f64 * 1_000_000.0 / self.elapsed_micros as f64
    }

    /// Average response time over all kinds
    pub fn total_avg_response_ms(&self) -> f64 {
        let ops = self.total_operations();
        if ops == 0 {
            return 0.0;
        }
        let sum: u64 = self.counters.iter().map(|c| c.response_micros).sum();
        sum as f64 / ops as f64 / 1000.0
    }

    /// Megabytes (2^20) per second for reads and writes
    pub fn mb_per_sec(&self) -> (f64, f64) {
        if self.elapsed_micros == 0 {
            return (0.0, 0.0);
        }
        let secs = self.elapsed_micros as f64 / 1_000_000.0;
        let mb = 1024.0 * 1024.0;
        (self.read_bytes as f64 / mb / secs, self.write_bytes as f64 / mb / secs)
    }

    /// All kinds merged into one histogram
    pub fn total_histogram(&self) -> Result<ResponseHistogram> {
        let mut total = ResponseHistogram::new(Arc::clone(self.counters[0].histogram.layout()));
        for c in &self.counters {
            total.accumulate(&c.histogram)?;
        }
        Ok(total)
    }
}

/// Statistics cell owned by one worker thread
///
/// The worker records into it for every transaction; the interval reporter
/// takes a copy at each boundary.
#[derive(Debug)]
pub struct WorkerStats {
    workload: String,
    inner: Mutex<AggregateStats>,
}

impl WorkerStats {
    pub fn new(workload: &str, layout: Arc<BucketLayout>) -> Self {
        Self {
            workload: workload.to_string(),
            inner: Mutex::new(AggregateStats::new(layout)),
        }
    }

    pub fn workload(&self) -> &str {
        &self.workload
    }

    pub fn record(&self, kind: OperationKind, response_micros: u64, bytes: u64) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(kind, response_micros, bytes);
    }

    /// Record a failed transaction and return this worker's error total
    pub fn record_error(&self, kind: OperationKind) -> u64 {
        let mut stats = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        stats.record_error(kind);
        stats.errors()
    }

    pub fn snapshot(&self) -> AggregateStats {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Cumulative statistics at one instant: run total plus one entry per workload
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub total: AggregateStats,
    pub per_workload: BTreeMap<String, AggregateStats>,
}

impl StatsSnapshot {
    pub fn empty(layout: Arc<BucketLayout>) -> Self {
        Self {
            total: AggregateStats::new(layout),
            per_workload: BTreeMap::new(),
        }
    }

    /// Interval delta between two cumulative snapshots
    ///
    /// A workload missing from `previous` is compared against zero.
    pub fn delta(current: &StatsSnapshot, previous: &StatsSnapshot) -> Result<StatsSnapshot> {
        let layout = Arc::clone(current.total.counter(OperationKind::Read).histogram.layout());
        let zero = AggregateStats::new(Arc::clone(&layout));
        let mut per_workload = BTreeMap::new();
        for (name, cur) in &current.per_workload {
            let prev = previous.per_workload.get(name).unwrap_or(&zero);
            per_workload.insert(name.clone(), AggregateStats::delta(cur, prev)?);
        }
        Ok(StatsSnapshot {
            total: AggregateStats::delta(&current.total, &previous.total)?,
            per_workload,
        })
    }
}

/// Run-scoped registry of every worker's statistics cell
#[derive(Debug)]
pub struct StatsRegistry {
    layout: Arc<BucketLayout>,
    workers: RwLock<Vec<Arc<WorkerStats>>>,
}

impl StatsRegistry {
    pub fn new(layout: Arc<BucketLayout>) -> Self {
        Self {
            layout,
            workers: RwLock::new(Vec::new()),
        }
    }

    pub fn layout(&self) -> &Arc<BucketLayout> {
        &self.layout
    }

    /// Create and register the statistics cell for a new worker
    pub fn register(&self, workload: &str) -> Arc<WorkerStats> {
        let stats = Arc::new(WorkerStats::new(workload, Arc::clone(&self.layout)));
        self.workers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&stats));
        stats
    }

    /// Sum every worker into a cumulative snapshot stamped with `elapsed_micros`
    pub fn snapshot(&self, elapsed_micros: u64) -> Result<StatsSnapshot> {
        let mut snap = StatsSnapshot::empty(Arc::clone(&self.layout));
        let workers = self.workers.read().unwrap_or_else(|e| e.into_inner());
        for worker in workers.iter() {
            let stats = worker.snapshot();
            snap.total.accumulate(&stats)?;
            snap.per_workload
                .entry(worker.workload().to_string())
                .or_insert_with(|| AggregateStats::new(Arc::clone(&self.layout)))
                .accumulate(&stats)?;
        }
        snap.total.elapsed_micros = elapsed_micros;
        for stats in snap.per_workload.values_mut() {
            stats.elapsed_micros = elapsed_micros;
        }
        Ok(snap)
    }

    /// Take a new cumulative snapshot and return it with its delta against `previous`
    pub fn snapshot_and_delta(
        &self,
        previous: &StatsSnapshot,
        elapsed_micros: u64,
    ) -> Result<(StatsSnapshot, StatsSnapshot)> {
        let current = self.snapshot(elapsed_micros)?;
        let delta = StatsSnapshot::delta(&current, previous)?;
        Ok((delta, current))
    }
}
