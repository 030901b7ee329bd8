//! # Retry Scheduler
//!
//! One-shot deferred continuations on the engine's own thread. The engine
//! never sleeps: it hands a [`DeferredTask`] to the scheduler, which delivers
//! it back as an event once the delay has elapsed. The node uses a tokio
//! timer; tests and scenario replay use [`ManualScheduler`] and advance time
//! explicitly.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::message::DisputeResultMessage;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Opaque handle of a scheduled continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Wrap a raw handle value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw handle value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Work the engine defers to a later turn of its loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredTask {
    /// Apply a dispute result again after its dispute was missing.
    RetryDisputeResult(DisputeResultMessage),
}

/// Schedules one-shot continuations.
pub trait RetryScheduler: Send {
    /// Deliver `task` back to the engine after `delay`. Must not block.
    fn run_after(&mut self, delay: Duration, task: DeferredTask) -> TimerHandle;
}

// ---------------------------------------------------------------------------
// ManualScheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ManualClock {
    now: Duration,
    next_handle: u64,
    scheduled: usize,
    pending: Vec<(Duration, TimerHandle, DeferredTask)>,
}

/// A scheduler driven by an explicit clock. Clones share the clock.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    clock: Arc<Mutex<ManualClock>>,
}

impl ManualScheduler {
    /// Create a scheduler at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Elapsed virtual time.
    pub fn now(&self) -> Duration {
        self.clock.lock().now
    }

    /// Continuations not yet due.
    pub fn pending(&self) -> usize {
        self.clock.lock().pending.len()
    }

    /// Continuations scheduled since creation.
    pub fn scheduled(&self) -> usize {
        self.clock.lock().scheduled
    }

    /// Move the clock forward by `by` and return every task now due, in
    /// due-time order.
    pub fn advance(&self, by: Duration) -> Vec<DeferredTask> {
        let mut clock = self.clock.lock();
        clock.now += by;
        let now = clock.now;
        let (mut due, rest): (Vec<_>, Vec<_>) =
            clock.pending.drain(..).partition(|(at, _, _)| *at <= now);
        clock.pending = rest;
        due.sort_by_key(|(at, handle, _)| (*at, *handle));
        due.into_iter().map(|(_, _, task)| task).collect()
    }
}

impl RetryScheduler for ManualScheduler {
    fn run_after(&mut self, delay: Duration, task: DeferredTask) -> TimerHandle {
        let mut clock = self.clock.lock();
        clock.next_handle += 1;
        clock.scheduled += 1;
        let handle = TimerHandle(clock.next_handle);
        let at = clock.now + delay;
        clock.pending.push((at, handle, task));
        handle
    }
}
