//! Interval scheduling
//!
//! All reporting happens on wall-clock boundaries aligned to full seconds. The
//! coordinating thread calls [`IntervalClock::start_first_interval`] once and
//! then [`IntervalClock::wait_for_next_interval`] in a loop; every return with
//! [`IntervalWait::Boundary`] is one completed interval.
//!
//! Waits sleep in steps of at most one second and poll [`RunControl`] between
//! steps, so the end of the workload cancels a partial interval promptly.
//!
//! Time comes from a [`Clock`] so tests can drive the scheduler without real
//! sleeping.

use crate::error::FatalError;
use crate::util::time::epoch_millis;
use crate::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Longest single sleep between polls of the done flag
const MAX_SLEEP_MILLIS: u64 = 1000;

/// Wall-clock source
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> u64;

    fn sleep(&self, duration: Duration);
}

/// The real system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        epoch_millis()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that only moves when somebody sleeps on it
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(start_millis),
        }
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration.as_millis() as u64);
    }
}

/// Run-wide cancellation flag, optional deadline and start gate
///
/// Workers poll [`RunControl::is_workload_done`] between transactions. The
/// scheduler also checks the deadline, so the run ends on the clock it is
/// scheduled by.
#[derive(Debug)]
pub struct RunControl {
    done: AtomicBool,
    /// Epoch millis at which the workload ends, 0 for none
    deadline: AtomicU64,
    gate: Mutex<bool>,
    gate_cond: Condvar,
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            deadline: AtomicU64::new(0),
            gate: Mutex::new(false),
            gate_cond: Condvar::new(),
        }
    }

    #[inline]
    pub fn is_workload_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn set_workload_done(&self) {
        self.done.store(true, Ordering::Release);
        // Wake anyone still waiting at the gate
        let _guard = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        self.gate_cond.notify_all();
    }

    pub fn set_deadline(&self, epoch_millis: u64) {
        self.deadline.store(epoch_millis, Ordering::Release);
    }

    pub fn deadline(&self) -> Option<u64> {
        match self.deadline.load(Ordering::Acquire) {
            0 => None,
            d => Some(d),
        }
    }

    /// Set the done flag if the deadline has passed; returns the flag
    pub fn poll(&self, now_millis: u64) -> bool {
        if let Some(deadline) = self.deadline() {
            if now_millis >= deadline && !self.is_workload_done() {
                self.set_workload_done();
            }
        }
        self.is_workload_done()
    }

    /// Release every worker waiting in [`RunControl::wait_for_start`]
    pub fn open_gate(&self) {
        let mut open = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        *open = true;
        self.gate_cond.notify_all();
    }

    /// Block until the gate opens; false if the run ended first
    pub fn wait_for_start(&self) -> bool {
        let mut open = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        while !*open && !self.is_workload_done() {
            open = self
                .gate_cond
                .wait_timeout(open, Duration::from_millis(100))
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        *open && !self.is_workload_done()
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Idle,
    Running,
    Boundary,
    Stopped,
}

/// Outcome of waiting for an interval boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalWait {
    Boundary,
    Cancelled,
}

/// Interval length and the current interval's epoch timestamps (millis)
#[derive(Debug)]
pub struct IntervalClock {
    seconds: u64,
    state: ClockState,
    interval_start: u64,
    interval_end: u64,
    next_start: u64,
    boundaries: u64,
}

impl IntervalClock {
    pub fn new() -> Self {
        Self {
            seconds: 0,
            state: ClockState::Idle,
            interval_start: 0,
            interval_end: 0,
            next_start: 0,
            boundaries: 0,
        }
    }

    /// Interval length
    ///
    /// # Errors
    ///
    /// [`FatalError::IntervalNotInitialized`] before the first interval started.
    pub fn seconds(&self) -> Result<u64> {
        if self.state == ClockState::Idle {
            return Err(FatalError::IntervalNotInitialized.into());
        }
        Ok(self.seconds)
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn interval_start(&self) -> u64 {
        self.interval_start
    }

    pub fn interval_end(&self) -> u64 {
        self.interval_end
    }

    pub fn next_start(&self) -> u64 {
        self.next_start
    }

    /// Completed boundaries so far
    pub fn boundaries(&self) -> u64 {
        self.boundaries
    }

    /// Align the first interval to the next full second at least one second
    /// from now and block until it starts
    pub fn start_first_interval(&mut self, seconds: u64, clock: &dyn Clock, control: &RunControl) -> Result<IntervalWait> {
        if seconds == 0 {
            anyhow::bail!("interval length must be at least one second");
        }
        let earliest = clock.now_millis() + 1000;
        let first = earliest.div_ceil(1000) * 1000;

        self.seconds = seconds;
        self.interval_start = first;
        self.interval_end = first + seconds * 1000;
        self.next_start = self.interval_end;
        self.state = ClockState::Running;

        tracing::debug!(seconds, first_start = first, "interval scheduler started");
        Ok(self.sleep_until(first, clock, control))
    }

    /// Advance to the next interval and block until the current one ends
    ///
    /// # Errors
    ///
    /// [`FatalError::IntervalNotInitialized`] if called before
    /// [`IntervalClock::start_first_interval`].
    pub fn wait_for_next_interval(&mut self, clock: &dyn Clock, control: &RunControl) -> Result<IntervalWait> {
        let length = self.seconds()? * 1000;
        if self.state == ClockState::Stopped {
            return Ok(IntervalWait::Cancelled);
        }

        let boundary = self.interval_end;
        self.state = ClockState::Running;
        let outcome = self.sleep_until(boundary, clock, control);
        if outcome == IntervalWait::Boundary {
            self.interval_start += length;
            self.interval_end += length;
            self.next_start += length;
            self.boundaries += 1;
            self.state = ClockState::Boundary;
        }
        Ok(outcome)
    }

    fn sleep_until(&mut self, target: u64, clock: &dyn Clock, control: &RunControl) -> IntervalWait {
        loop {
            let now = clock.now_millis();
            if now >= target {
                return IntervalWait::Boundary;
            }
            if control.poll(now) {
                self.state = ClockState::Stopped;
                return IntervalWait::Cancelled;
            }
            clock.sleep(Duration::from_millis((target - now).min(MAX_SLEEP_MILLIS)));
        }
    }
}

impl Default for IntervalClock {
    fn default() -> Self {
        Self::new()
    }
}

/// "Have n seconds passed since the last signal?"
///
/// The first call only primes the timer and returns false.
#[derive(Debug, Clone)]
pub struct PeriodicSignal {
    millis: u64,
    last: Option<u64>,
}

impl PeriodicSignal {
    pub fn new(seconds: u64) -> Self {
        Self {
            millis: seconds * 1000,
            last: None,
        }
    }

    pub fn go(&mut self, now_millis: u64) -> bool {
        match self.last {
            None => {
                self.last = Some(now_millis);
                false
            }
            Some(last) if now_millis.saturating_sub(last) >= self.millis => {
                self.last = Some(now_millis);
                true
            }
            Some(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::as_fatal;
    use std::sync::Arc;
    use std::thread;

    const T0: u64 = 1_700_000_000_250;

    #[test]
    fn test_first_interval_alignment() {
        let clock = ManualClock::new(T0);
        let control = RunControl::new();
        let mut ic = IntervalClock::new();

        let outcome = ic.start_first_interval(5, &clock, &control).unwrap();
        assert_eq!(outcome, IntervalWait::Boundary);
        // now + 1s = ...001_250, next full second is ...002_000
        assert_eq!(ic.interval_start(), 1_700_000_002_000);
        assert_eq!(ic.interval_end(), 1_700_000_007_000);
        assert_eq!(clock.now_millis(), 1_700_000_002_000);
        assert_eq!(ic.seconds().unwrap(), 5);
    }

    #[test]
    fn test_exact_second_still_waits_a_second() {
        let clock = ManualClock::new(1_700_000_000_000);
        let mut ic = IntervalClock::new();
        ic.start_first_interval(1, &clock, &RunControl::new()).unwrap();
        assert_eq!(ic.interval_start(), 1_700_000_001_000);
    }

    #[test]
    fn test_seventeen_second_run_gives_three_boundaries() {
        let clock = ManualClock::new(T0);
        let control = RunControl::new();
        let mut ic = IntervalClock::new();

        ic.start_first_interval(5, &clock, &control).unwrap();
        let start = ic.interval_start();
        control.set_deadline(start + 17_000);

        let mut boundaries = Vec::new();
        loop {
            match ic.wait_for_next_interval(&clock, &control).unwrap() {
                IntervalWait::Boundary => boundaries.push(clock.now_millis() - start),
                IntervalWait::Cancelled => break,
            }
        }
        assert_eq!(boundaries, vec![5_000, 10_000, 15_000]);
        assert_eq!(ic.boundaries(), 3);
        assert_eq!(ic.state(), ClockState::Stopped);
        // Cancelled at the deadline, not at the end of the partial interval
        assert_eq!(clock.now_millis() - start, 17_000);
        assert!(control.is_workload_done());
        assert_eq!(ic.wait_for_next_interval(&clock, &control).unwrap(), IntervalWait::Cancelled);
    }

    #[test]
    fn test_wait_before_start_is_fatal() {
        let mut ic = IntervalClock::new();
        let err = ic
            .wait_for_next_interval(&ManualClock::new(T0), &RunControl::new())
            .unwrap_err();
        assert_eq!(as_fatal(&err), Some(&FatalError::IntervalNotInitialized));
        assert!(ic.seconds().is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut ic = IntervalClock::new();
        assert!(ic
            .start_first_interval(0, &ManualClock::new(T0), &RunControl::new())
            .is_err());
    }

    #[test]
    fn test_done_flag_cancels_first_wait() {
        let clock = ManualClock::new(T0);
        let control = RunControl::new();
        control.set_workload_done();
        let mut ic = IntervalClock::new();
        let outcome = ic.start_first_interval(5, &clock, &control).unwrap();
        assert_eq!(outcome, IntervalWait::Cancelled);
        assert_eq!(clock.now_millis(), T0);
    }

    #[test]
    fn test_periodic_signal() {
        let mut sig = PeriodicSignal::new(2);
        assert!(!sig.go(10_000));
        assert!(!sig.go(11_000));
        assert!(sig.go(12_000));
        assert!(!sig.go(13_999));
        assert!(sig.go(14_000));
    }

    #[test]
    fn test_start_gate() {
        let control = Arc::new(RunControl::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let control = Arc::clone(&control);
                thread::spawn(move || control.wait_for_start())
            })
            .collect();
        control.open_gate();
        for w in waiters {
            assert!(w.join().unwrap());
        }

        let closed = RunControl::new();
        closed.set_workload_done();
        assert!(!closed.wait_for_start());
    }
}
