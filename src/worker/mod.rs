//! Worker threads and the run that drives them
//!
//! A [`Runner`] owns one [`RunContext`]: the anchors, the provider, the
//! statistics registry and the run control. Every workload becomes a
//! [`WorkloadGroup`] of identical threads; each thread gets its own
//! [`WorkerCtx`] and one operation state machine, and calls it until the
//! machine reports that no more work can ever appear or the run ends.
//!
//! # Lifecycle
//!
//! 1. **Setup**: anchors are built, discovered and optionally formatted
//! 2. **Spawn**: producer roles are registered for every thread, then the
//!    threads start and wait on the start gate
//! 3. **Run**: the caller's thread aligns to the first interval boundary,
//!    opens the gate and reports every interval until the deadline
//! 4. **Teardown**: the done flag is raised, threads are joined and the
//!    first fatal error, if any, is returned
//!
//! The last worker to leave raises the done flag itself, so a run whose
//! workloads all exhaust ends early.

use crate::blocked::{can_we_get_more_work, BlockCounters, BlockPolicy, BlockReason, BlockSummary, Blocker, RoleGuard};
use crate::config::{Config, OperationType, WorkloadConfig};
use crate::engine::{BlockMap, HandleRegistry, KeyMap, NativeIo};
use crate::error::FatalError;
use crate::namespace::Anchor;
use crate::ops::{role_for, OpMachine};
use crate::output::{ReportSink, RunSummary};
use crate::scheduler::{Clock, IntervalClock, IntervalWait, PeriodicSignal, RunControl, SystemClock};
use crate::stats::{BucketLayout, OperationKind, StatsRegistry, StatsSnapshot, WorkerStats};
use crate::Result;
use anyhow::{bail, Context};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Seconds between per-worker progress lines at debug level
const HEARTBEAT_SECONDS: u64 = 10;

/// Everything shared by all threads of one run
pub struct RunContext {
    pub config: Config,
    pub anchors: BTreeMap<String, Arc<Anchor>>,
    pub io: Arc<dyn NativeIo>,
    pub handles: HandleRegistry,
    /// Present when validation is on
    pub key_map: Option<Arc<dyn KeyMap>>,
    pub stats: StatsRegistry,
    pub control: RunControl,
    pub policy: BlockPolicy,
    pub max_data_errors: Option<u64>,
    data_errors: AtomicU64,
    running: AtomicUsize,
    counters: Mutex<Vec<Arc<BlockCounters>>>,
}

impl RunContext {
    /// Build and discover every configured anchor
    pub fn new(config: Config, io: Arc<dyn NativeIo>) -> Result<Self> {
        let mut anchors = Vec::with_capacity(config.anchors.len());
        for anchor_config in &config.anchors {
            let anchor = Anchor::build(anchor_config)
                .with_context(|| format!("Failed to build anchor {}", anchor_config.name))?;
            anchor.discover(io.as_ref())?;
            anchors.push(Arc::new(anchor));
        }
        Self::with_anchors(config, anchors, io)
    }

    /// Run context over anchors that were already built and discovered
    pub fn with_anchors(config: Config, anchors: Vec<Arc<Anchor>>, io: Arc<dyn NativeIo>) -> Result<Self> {
        let layout = match &config.run.histogram_bounds {
            Some(bounds) => BucketLayout::from_bounds(bounds.clone())?,
            None => BucketLayout::default(),
        };
        let key_map: Option<Arc<dyn KeyMap>> = if config.run.validate {
            Some(Arc::new(BlockMap::new()))
        } else {
            None
        };
        let policy = BlockPolicy {
            backoff: Duration::from_micros(config.run.backoff_micros),
            max_consecutive: config.run.max_consecutive_blocks,
        };
        let max_data_errors = config.run.max_data_errors;

        Ok(Self {
            anchors: anchors
                .into_iter()
                .map(|a| (a.name().to_string(), a))
                .collect(),
            io,
            handles: HandleRegistry::new(),
            key_map,
            stats: StatsRegistry::new(Arc::new(layout)),
            control: RunControl::new(),
            policy,
            max_data_errors,
            data_errors: AtomicU64::new(0),
            running: AtomicUsize::new(0),
            counters: Mutex::new(Vec::new()),
            config,
        })
    }

    pub fn anchor(&self, name: &str) -> Result<Arc<Anchor>> {
        self.anchors
            .get(name)
            .cloned()
            .with_context(|| format!("Unknown anchor: {}", name))
    }

    /// Read and write errors counted so far, over all workers
    pub fn data_errors(&self) -> u64 {
        self.data_errors.load(Ordering::Acquire)
    }

    /// Fresh block counters for a new worker, kept for the run summary
    pub fn register_counters(&self) -> Arc<BlockCounters> {
        let counters = Arc::new(BlockCounters::new());
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&counters));
        counters
    }

    /// Block and event counters merged over every worker
    pub fn block_summary(&self) -> BlockSummary {
        let mut summary = BlockSummary::default();
        for counters in self.counters.lock().unwrap_or_else(|e| e.into_inner()).iter() {
            summary.merge(&counters.summary());
        }
        summary
    }

    /// Called by each worker on its way out; the last one ends the run
    fn worker_exited(&self) {
        if self.running.fetch_sub(1, Ordering::AcqRel) == 1 {
            tracing::info!("all workers finished");
            self.control.set_workload_done();
        }
    }
}

/// The threads of one workload and what they share
#[derive(Debug)]
pub struct WorkloadGroup {
    pub config: WorkloadConfig,
    pub anchor: Arc<Anchor>,
    /// Copy destination
    pub target: Option<Arc<Anchor>>,
    shutdown: AtomicBool,
}

impl WorkloadGroup {
    /// Resolve the workload's anchors in `run`
    pub fn new(config: WorkloadConfig, run: &RunContext) -> Result<Self> {
        let anchor = run.anchor(&config.anchor)?;
        let target = match &config.target_anchor {
            Some(name) => Some(run.anchor(name)?),
            None => None,
        };
        if let Some(target) = &target {
            if target.file_count() != anchor.file_count() {
                bail!(
                    "Workload {}: anchors {} and {} have different file counts ({} vs {})",
                    config.name,
                    anchor.name(),
                    target.name(),
                    anchor.file_count(),
                    target.file_count()
                );
            }
        }
        Ok(Self::with_anchors(config, anchor, target))
    }

    pub fn with_anchors(config: WorkloadConfig, anchor: Arc<Anchor>, target: Option<Arc<Anchor>>) -> Self {
        Self {
            config,
            anchor,
            target,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop every thread of this workload; only the first caller logs
    pub fn exhausted(&self, why: &str, anchor: &Anchor) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                workload = %self.config.name,
                anchor = %anchor.name(),
                reason = why,
                "no more work, stopping workload"
            );
        }
    }

    /// Producer role guard for one thread of this workload
    fn enter_role(&self) -> Option<RoleGuard> {
        let (role, on_target) = role_for(self.config.operation, self.config.sequential)?;
        let anchor = match (&self.target, on_target) {
            (Some(target), true) => target,
            _ => &self.anchor,
        };
        Some(anchor.roles().enter(role))
    }
}

/// Per-thread state handed to the operation state machines
pub struct WorkerCtx {
    pub id: usize,
    pub run: Arc<RunContext>,
    pub group: Arc<WorkloadGroup>,
    pub stats: Arc<WorkerStats>,
    pub blocker: Blocker,
    pub rng: Xoshiro256PlusPlus,
    buffer: Vec<u8>,
}

impl WorkerCtx {
    pub fn new(id: usize, run: Arc<RunContext>, group: Arc<WorkloadGroup>) -> Self {
        let stats = run.stats.register(&group.config.name);
        let blocker = Blocker::new(id, run.policy, run.register_counters());
        Self {
            id,
            run,
            group,
            stats,
            blocker,
            rng: Xoshiro256PlusPlus::from_entropy(),
            buffer: Vec::new(),
        }
    }

    /// True once the run is over or this workload has run out of work
    pub fn is_stopping(&self) -> bool {
        self.run.control.is_workload_done() || self.group.is_shutdown()
    }

    pub fn pick_xfersize(&mut self) -> u64 {
        self.group.config.xfersizes.pick(&mut self.rng)
    }

    /// Transfer buffer of exactly `length` bytes, grown on demand
    pub(crate) fn buffer_for(&mut self, length: u64) -> &mut [u8] {
        let length = length as usize;
        if self.buffer.len() < length {
            self.buffer.resize(length, 0x5a);
        }
        &mut self.buffer[..length]
    }

    /// Count a failed read or write
    ///
    /// # Errors
    ///
    /// [`FatalError::TooManyDataErrors`] once the run-wide ceiling is passed.
    pub fn data_error(&mut self, kind: OperationKind, path: &Path, offset: u64, length: u64, err: &io::Error) -> Result<()> {
        let worker_errors = self.stats.record_error(kind);
        let total = self.run.data_errors.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::warn!(
            worker = self.id,
            op = %kind,
            path = %path.display(),
            offset,
            length,
            error = %err,
            worker_errors,
            "transfer failed"
        );
        if let Some(max) = self.run.max_data_errors {
            if total > max {
                return Err(FatalError::TooManyDataErrors(max).into());
            }
        }
        Ok(())
    }

    /// Count a block on `anchor` and back off
    ///
    /// Returns `Ok(false)` when no other worker can ever clear `reason`; the
    /// whole workload is shut down in that case. A copy worker waiting for a
    /// source file to appear does not back off and never hits the
    /// consecutive-block limit.
    pub fn block(&mut self, reason: BlockReason, anchor: &Anchor) -> Result<bool> {
        if !can_we_get_more_work(reason, anchor) {
            self.blocker.event(reason);
            self.group.exhausted(reason.label(), anchor);
            return Ok(false);
        }
        if reason == BlockReason::FileMustExist && self.group.config.operation == OperationType::Copy {
            self.blocker.wait(reason);
        } else {
            self.blocker.block(reason)?;
        }
        Ok(true)
    }
}

/// Thread body: wait for the gate, then run the machine until it gives up
fn worker_main(ctx: &mut WorkerCtx) -> Result<u64> {
    if !ctx.run.control.wait_for_start() {
        return Ok(0);
    }
    tracing::debug!(
        worker = ctx.id,
        workload = %ctx.group.config.name,
        op = ?ctx.group.config.operation,
        "worker started"
    );

    let mut machine = OpMachine::new(ctx.group.config.operation);
    let result = drive(&mut machine, ctx);
    let finished = machine.finish(ctx);
    let transactions = result?;
    finished?;

    tracing::debug!(worker = ctx.id, transactions, state = ?machine.state(), "worker finished");
    Ok(transactions)
}

fn drive(machine: &mut OpMachine, ctx: &mut WorkerCtx) -> Result<u64> {
    let mut heartbeat = PeriodicSignal::new(HEARTBEAT_SECONDS);
    let mut transactions = 0u64;
    while !ctx.is_stopping() {
        if !machine.do_operation(ctx)? {
            break;
        }
        ctx.blocker.reset();
        transactions += 1;
        if heartbeat.go(ctx.run.io.now() / 1000) {
            tracing::debug!(worker = ctx.id, transactions, "worker progress");
        }
    }
    Ok(transactions)
}

/// Register roles for every thread of every group, then spawn them all
///
/// Roles go in before the first thread starts so no worker can conclude
/// that a producer is missing while it is still being spawned. Threads
/// park on the start gate.
pub(crate) fn spawn_workers(run: &Arc<RunContext>, groups: &[Arc<WorkloadGroup>]) -> Result<Vec<JoinHandle<Result<()>>>> {
    let mut planned = Vec::new();
    for group in groups {
        for _ in 0..group.config.threads {
            planned.push((Arc::clone(group), group.enter_role()));
        }
    }
    run.running.store(planned.len(), Ordering::Release);

    let mut handles = Vec::with_capacity(planned.len());
    for (id, (group, role)) in planned.into_iter().enumerate() {
        let name = format!("{}-{}", group.config.name, id);
        let mut ctx = WorkerCtx::new(id, Arc::clone(run), group);
        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            let result = worker_main(&mut ctx);
            drop(role);
            if let Err(e) = &result {
                tracing::error!(worker = ctx.id, error = %e, "worker failed");
                ctx.run.control.set_workload_done();
            }
            ctx.run.worker_exited();
            result.map(|_| ())
        });
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                run.control.set_workload_done();
                run.control.open_gate();
                return Err(e).with_context(|| format!("Failed to spawn worker thread {}", name));
            }
        }
    }
    Ok(handles)
}

/// Runs a whole configuration to completion
pub struct Runner {
    run: Arc<RunContext>,
    clock: Arc<dyn Clock>,
}

impl Runner {
    pub fn new(config: Config, io: Arc<dyn NativeIo>) -> Result<Self> {
        Self::with_clock(config, io, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Config, io: Arc<dyn NativeIo>, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            run: Arc::new(RunContext::new(config, io)?),
            clock,
        })
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.run
    }

    /// Run every workload for the configured time, reporting to `sink`
    pub fn run(&self, sink: &mut dyn ReportSink) -> Result<RunSummary> {
        let run = &self.run;
        if run.config.run.format_dirs {
            for anchor in run.anchors.values() {
                let created = anchor.create_missing_dirs(run.io.as_ref())?;
                if created > 0 {
                    tracing::info!(anchor = %anchor.name(), created, "formatted anchor directories");
                }
            }
        }

        let groups = run
            .config
            .workloads
            .iter()
            .map(|w| WorkloadGroup::new(w.clone(), run).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        let handles = spawn_workers(run, &groups)?;
        tracing::info!(
            workers = handles.len(),
            elapsed = run.config.run.elapsed,
            interval = run.config.run.interval,
            "starting run"
        );

        let schedule = self.schedule(sink);
        run.control.set_workload_done();
        run.control.open_gate();

        let mut first_error = None;
        for handle in handles {
            let result = handle
                .join()
                .map_err(|_| anyhow::anyhow!("Worker thread panicked"))
                .and_then(|r| r);
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            tracing::error!(error = %e, "run aborted");
            return Err(e);
        }
        let (intervals, totals) = schedule?;

        let blocks = run.block_summary();
        for (reason, count) in blocks.non_zero() {
            tracing::info!(reason = reason.label(), count, "block counter");
        }
        let summary = RunSummary {
            intervals,
            totals,
            blocks,
            data_errors: run.data_errors(),
        };
        sink.summary(&summary)?;
        Ok(summary)
    }

    /// Align to the first boundary, open the gate and report each interval
    ///
    /// Returns the number of intervals reported and the final cumulative
    /// snapshot.
    fn schedule(&self, sink: &mut dyn ReportSink) -> Result<(u64, StatsSnapshot)> {
        let run = &self.run;
        let clock = self.clock.as_ref();
        let mut intervals = IntervalClock::new();
        let mut previous = StatsSnapshot::empty(Arc::clone(run.stats.layout()));

        if intervals.start_first_interval(run.config.run.interval, clock, &run.control)? == IntervalWait::Cancelled {
            return Ok((0, previous));
        }
        let started = intervals.interval_start();
        run.control.set_deadline(started + run.config.run.elapsed * 1000);
        run.control.open_gate();

        let mut reported = 0;
        while intervals.wait_for_next_interval(clock, &run.control)? == IntervalWait::Boundary {
            reported += 1;
            let elapsed_micros = (intervals.interval_start() - started) * 1000;
            let (delta, current) = run.stats.snapshot_and_delta(&previous, elapsed_micros)?;
            sink.interval(reported, &delta)?;
            previous = current;
        }

        let elapsed_micros = clock.now_millis().saturating_sub(started) * 1000;
        let totals = run.stats.snapshot(elapsed_micros.max(previous.total.elapsed_micros))?;
        Ok((reported, totals))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::config::{FileSizes, OperationType, RunConfig};
    use crate::engine::mock::{IoCall, MockIo};
    use crate::engine::OpenMode;
    use crate::scheduler::ManualClock;
    use crate::session::ActiveFile;

    #[derive(Default)]
    struct CollectSink {
        intervals: Vec<u64>,
        summaries: usize,
    }

    impl ReportSink for CollectSink {
        fn interval(&mut self, number: u64, _delta: &StatsSnapshot) -> Result<()> {
            self.intervals.push(number);
            Ok(())
        }

        fn summary(&mut self, _summary: &RunSummary) -> Result<()> {
            self.summaries += 1;
            Ok(())
        }
    }

    #[test]
    fn test_delete_workers_all_exhaust() {
        let io = Arc::new(MockIo::new());
        let existing: Vec<usize> = (0..10).collect();
        let anchor = anchor_with(&io, "a", 1, 10, 1, FileSizes::Fixed(4096), &existing);
        let mut workload = WorkloadConfig::new("del", "a", OperationType::Delete);
        workload.threads = 50;

        let mut run = test_run(&io, vec![Arc::clone(&anchor)], vec![workload.clone()]);
        run.policy.backoff = Duration::from_micros(100);
        let run = Arc::new(run);
        let group = Arc::new(WorkloadGroup::with_anchors(workload, Arc::clone(&anchor), None));
        let handles = spawn_workers(&run, &[Arc::clone(&group)]).unwrap();
        assert_eq!(anchor.roles().active(crate::blocked::Role::FileDeleter), 50);

        run.control.open_gate();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(anchor.existing_files(), 0);
        assert_eq!(io.calls_of(IoCall::Delete).len(), 10);
        assert!(group.is_shutdown());
        assert!(run.control.is_workload_done());
        assert_eq!(anchor.roles().active(crate::blocked::Role::FileDeleter), 0);
        assert_eq!(run.block_summary().get(BlockReason::FileDeletes), 10);
        assert_eq!(run.stats.snapshot(1).unwrap().total.counter(OperationKind::Delete).operations, 10);
    }

    #[test]
    fn test_block_without_producer_exhausts_group() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 2, FileSizes::Fixed(4096), &[]);
        let mut ctx = ctx_for(&io, &anchor, WorkloadConfig::new("r", "a", OperationType::Read));

        assert!(!ctx.block(BlockReason::FileMustExist, &anchor).unwrap());
        assert!(ctx.is_stopping());
        assert_eq!(ctx.blocker.counters().get(BlockReason::FileMustExist), 1);

        // Busy files always clear eventually
        let mut ctx = ctx_for(&io, &anchor, WorkloadConfig::new("r", "a", OperationType::Read));
        assert!(ctx.block(BlockReason::FileBusy, &anchor).unwrap());
        assert!(!ctx.is_stopping());
    }

    #[test]
    fn test_copy_waits_for_sources_without_limit() {
        let io = Arc::new(MockIo::new());
        let source = anchor_with(&io, "src", 1, 1, 2, FileSizes::Fixed(4096), &[]);
        let target = anchor_with(&io, "dst", 1, 1, 2, FileSizes::Fixed(4096), &[]);
        let _creator = source.roles().enter(crate::blocked::Role::FileCreator);

        let mut copy = WorkloadConfig::new("c", "src", OperationType::Copy);
        copy.target_anchor = Some("dst".to_string());
        let mut run = test_run(&io, vec![Arc::clone(&source), Arc::clone(&target)], vec![copy.clone()]);
        run.policy.max_consecutive = 3;
        let run = Arc::new(run);
        let group = WorkloadGroup::with_anchors(copy, Arc::clone(&source), Some(Arc::clone(&target)));
        let mut ctx = WorkerCtx::new(0, Arc::clone(&run), Arc::new(group));

        for _ in 0..10 {
            assert!(ctx.block(BlockReason::FileMustExist, &source).unwrap());
        }
        assert_eq!(ctx.blocker.consecutive(), 0);
        assert_eq!(ctx.blocker.counters().get(BlockReason::FileMustExist), 10);

        // Other reasons still count towards the limit
        for _ in 0..3 {
            assert!(ctx.block(BlockReason::FileBusy, &source).unwrap());
        }
        assert!(ctx.block(BlockReason::FileBusy, &source).is_err());

        // A reader waiting on the same files does not get the exemption
        let read = WorkloadConfig::new("r", "src", OperationType::Read);
        let group = WorkloadGroup::with_anchors(read, Arc::clone(&source), None);
        let mut ctx = WorkerCtx::new(1, run, Arc::new(group));
        for _ in 0..3 {
            assert!(ctx.block(BlockReason::FileMustExist, &source).unwrap());
        }
        let err = ctx.block(BlockReason::FileMustExist, &source).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FatalError>(),
            Some(FatalError::TooManyBlocks { .. })
        ));
    }

    #[test]
    fn test_data_error_ceiling_is_fatal() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 1, FileSizes::Fixed(64 * 1024), &[0]);
        let config = WorkloadConfig::new("r", "a", OperationType::Read);
        let mut run = test_run(&io, vec![Arc::clone(&anchor)], vec![config.clone()]);
        run.max_data_errors = Some(1);
        let group = WorkloadGroup::with_anchors(config, Arc::clone(&anchor), None);
        let mut ctx = WorkerCtx::new(0, Arc::new(run), Arc::new(group));
        io.set_fail_reads(true);

        let lease = anchor.try_lock_file(0).unwrap();
        let mut afe = ActiveFile::open(lease, OpenMode::Read, &mut ctx).unwrap();
        afe.set_xfersize(4096);
        assert!(afe.advance_sequential(true));
        afe.read_block(&mut ctx).unwrap();
        assert_eq!(ctx.run.data_errors(), 1);

        assert!(afe.advance_sequential(true));
        let err = afe.read_block(&mut ctx).unwrap_err();
        assert_eq!(
            err.downcast_ref::<FatalError>(),
            Some(&FatalError::TooManyDataErrors(1))
        );
    }

    #[test]
    fn test_copy_group_needs_matching_target() {
        let io = Arc::new(MockIo::new());
        let source = anchor_with(&io, "src", 1, 1, 2, FileSizes::Fixed(4096), &[]);
        let target = anchor_with(&io, "dst", 1, 1, 3, FileSizes::Fixed(4096), &[]);
        let mut config = WorkloadConfig::new("c", "src", OperationType::Copy);
        config.target_anchor = Some("dst".to_string());
        let run = test_run(&io, vec![source, target], vec![config.clone()]);
        assert!(WorkloadGroup::new(config, &run).is_err());
    }

    #[test]
    fn test_runner_reports_each_interval() {
        let io = Arc::new(MockIo::new());
        io.add_file("/r/dir1_0.dir/file000000.dat", 64 * 1024);
        let workload = WorkloadConfig::new("reader", "r", OperationType::Read);
        let config = Config {
            run: RunConfig {
                elapsed: 3,
                interval: 1,
                backoff_micros: 0,
                ..RunConfig::default()
            },
            anchors: vec![anchor_config("r", 1, 1, 1, FileSizes::Fixed(64 * 1024))],
            workloads: vec![workload],
        };
        let clock = Arc::new(ManualClock::new(1_000_500));
        let runner = Runner::with_clock(config, Arc::clone(&io) as Arc<dyn NativeIo>, clock).unwrap();

        let mut sink = CollectSink::default();
        let summary = runner.run(&mut sink).unwrap();

        assert_eq!(sink.intervals, vec![1, 2, 3]);
        assert_eq!(sink.summaries, 1);
        assert_eq!(summary.intervals, 3);
        assert_eq!(summary.data_errors, 0);
        assert!(runner.context().control.is_workload_done());
        assert!(runner.context().handles.is_empty());
        assert_eq!(io.open_handles(), 0);
    }
}
