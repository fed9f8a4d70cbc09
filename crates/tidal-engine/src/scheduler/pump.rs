//! Event-loop pump
//!
//! Single-consumer driver for a [`SchedulerState`]. One iteration applies the
//! host's checkpoint order:
//!
//! 1. next-tick queue, then a microtask checkpoint, then next-tick again
//! 2. one snapshot's worth of immediates, each followed by its own checkpoint
//! 3. at most one due timer promoted to the macrotask slot and run
//! 4. a closing next-tick drain and microtask checkpoint
//!
//! Every drain is bounded so self-requeueing callbacks cannot stall the loop.
//! The pump is bound to the thread that created it; calling it from anywhere
//! else is a contract violation and panics.

use super::entry::{ImmediateSlot, Macrotask};
use super::state::SchedulerState;
use crate::clock::Clock;
use crate::defaults::{DEFAULT_DRAIN_LIMIT, DEFAULT_IMMEDIATE_LIMIT};
use crate::wake::WakeSignal;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

/// How `run_until_idle` treats timers that are not yet due
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaitMode {
    /// Stop as soon as nothing is runnable right now
    NoTimers,
    /// Keep waiting for timers and outstanding IO until no work remains
    Timers,
}

/// Drains a [`SchedulerState`] on its owner thread.
pub struct EventLoopPump {
    state: Arc<SchedulerState>,
    clock: Arc<dyn Clock>,
    wake: Arc<dyn WakeSignal>,

    /// This iteration's promoted timer, if any
    macrotask: Option<Macrotask>,

    owner: ThreadId,
    drain_limit: usize,
    immediate_limit: usize,
}

impl EventLoopPump {
    /// Create a pump for `state`, owned by the calling thread.
    pub fn new(state: Arc<SchedulerState>) -> Self {
        let clock = state.clock().clone();
        let wake = state.wake_signal().clone();
        Self {
            state,
            clock,
            wake,
            macrotask: None,
            owner: thread::current().id(),
            drain_limit: DEFAULT_DRAIN_LIMIT,
            immediate_limit: DEFAULT_IMMEDIATE_LIMIT,
        }
    }

    /// Override the per-drain bound for next-tick and microtask checkpoints.
    pub fn with_drain_limit(mut self, limit: usize) -> Self {
        self.drain_limit = limit.max(1);
        self
    }

    /// Override the per-iteration bound on immediates.
    pub fn with_immediate_limit(mut self, limit: usize) -> Self {
        self.immediate_limit = limit.max(1);
        self
    }

    /// The state this pump drains
    pub fn state(&self) -> &Arc<SchedulerState> {
        &self.state
    }

    /// Thread allowed to drive this pump
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    fn assert_owner(&self) {
        let current = thread::current().id();
        if current != self.owner {
            panic!(
                "EventLoopPump may only be driven by its owner thread {:?} (called from {:?})",
                self.owner, current
            );
        }
    }

    // ========================================================================
    // Liveness
    // ========================================================================

    /// True while anything is queued, scheduled or outstanding.
    pub fn has_pending_work(&self) -> bool {
        self.assert_owner();
        self.macrotask.is_some() || self.state.has_pending_work()
    }

    /// True if some work is runnable at the current tick.
    pub fn has_pending_work_now(&self) -> bool {
        self.assert_owner();
        self.macrotask.is_some() || self.state.has_pending_work_now(self.clock.now())
    }

    /// How long the owner thread may block before work becomes runnable.
    pub fn wait_duration(&self, max_wait: Duration) -> Duration {
        self.assert_owner();
        if self.macrotask.is_some() {
            return Duration::ZERO;
        }
        self.state.wait_duration(self.clock.now(), max_wait)
    }

    /// Block until woken by a producer, the next timer is due, or `max_wait`
    /// elapses. Returns immediately if work is already runnable.
    pub fn wait_for_work_or_next_timer(&self, max_wait: Duration) {
        let wait = self.wait_duration(max_wait);
        if wait.is_zero() {
            return;
        }
        self.wake.wait(wait);
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    /// Run one scheduler turn.
    pub fn run_one_iteration(&mut self) {
        self.assert_owner();

        self.drain_next_ticks();
        self.run_microtask_checkpoint();
        self.drain_next_ticks();
        self.drain_immediates_one_tick();
        self.promote_one_due_timer();

        if let Some(macrotask) = self.macrotask.take() {
            tracing::trace!(timer_id = macrotask.timer_id, "running timer callback");
            (macrotask.callback)();
            self.drain_next_ticks();
        }

        self.drain_next_ticks();
        self.run_microtask_checkpoint();
    }

    /// Iterate until idle. Returns the number of iterations run.
    ///
    /// With [`WaitMode::NoTimers`] this stops once nothing is runnable now;
    /// with [`WaitMode::Timers`] it blocks between iterations (at most
    /// `max_wait` at a time) until no work of any kind remains.
    pub fn run_until_idle(&mut self, mode: WaitMode, max_wait: Duration) -> usize {
        let mut iterations = 0;
        match mode {
            WaitMode::NoTimers => {
                while self.has_pending_work_now() {
                    self.run_one_iteration();
                    iterations += 1;
                }
            }
            WaitMode::Timers => {
                while self.has_pending_work() {
                    self.run_one_iteration();
                    iterations += 1;
                    if self.has_pending_work() {
                        self.wait_for_work_or_next_timer(max_wait);
                    }
                }
            }
        }
        iterations
    }

    /// Run iterations while work is runnable now, at most `max_iterations` of
    /// them. Returns the number run; a return equal to `max_iterations` means
    /// work may still be runnable.
    pub fn run_ready(&mut self, max_iterations: usize) -> usize {
        let mut iterations = 0;
        while iterations < max_iterations && self.has_pending_work_now() {
            self.run_one_iteration();
            iterations += 1;
        }
        iterations
    }

    // ========================================================================
    // Phases
    // ========================================================================

    /// Run next-tick callbacks until the queue is empty, including ones queued
    /// by the callbacks themselves, up to the drain limit.
    fn drain_next_ticks(&mut self) {
        for _ in 0..self.drain_limit {
            let Some(callback) = self.state.try_dequeue_next_tick() else {
                return;
            };
            callback();
        }
    }

    /// Run microtasks one at a time, draining next-tick callbacks around each so
    /// they always run before the next microtask.
    fn run_microtask_checkpoint(&mut self) {
        for _ in 0..self.drain_limit {
            self.drain_next_ticks();

            let Some(microtask) = self.state.try_dequeue_microtask() else {
                break;
            };
            microtask();

            self.drain_next_ticks();
        }
    }

    /// Run the immediates queued before this phase began. Immediates queued by
    /// these callbacks wait for the next iteration.
    fn drain_immediates_one_tick(&mut self) {
        let count = self.state.immediate_count_snapshot(self.immediate_limit);
        for _ in 0..count {
            match self.state.take_immediate_slot() {
                ImmediateSlot::Empty => return,
                ImmediateSlot::Canceled => continue,
                ImmediateSlot::Ready(callback) => {
                    callback();
                    self.drain_next_ticks();
                    self.run_microtask_checkpoint();
                }
            }
        }
    }

    fn promote_one_due_timer(&mut self) {
        let now = self.clock.now();
        if let Some(macrotask) = self.state.promote_due_timer(now) {
            tracing::trace!(timer_id = macrotask.timer_id, "promoted due timer");
            self.macrotask = Some(macrotask);
        }
    }
}
