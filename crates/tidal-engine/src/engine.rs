//! Single-thread engine
//!
//! Runs an entry point on the calling thread, then pumps its scheduler until no
//! work of any kind remains. This is the simplest host: no owner thread, no
//! cross-thread invocation.

use crate::clock::{Clock, MonotonicClock};
use crate::defaults::{DEFAULT_DRAIN_LIMIT, DEFAULT_MAX_WAIT};
use crate::scheduler::{EventLoopPump, SchedulerState, WaitMode};
use crate::timers::Timers;
use crate::wake::{CondvarSignal, WakeSignal};
use std::sync::Arc;
use std::time::Duration;

/// Engine configuration with injectable time and wake seams.
#[derive(Clone)]
pub struct Engine {
    clock: Arc<dyn Clock>,
    wake: Arc<dyn WakeSignal>,
    max_wait: Duration,
    drain_limit: usize,
}

impl Engine {
    /// Engine on the real monotonic clock with a condvar wake signal
    pub fn new() -> Self {
        Self::with_seams(Arc::new(MonotonicClock::new()), Arc::new(CondvarSignal::new()))
    }

    /// Engine reading time from `clock` and blocking on `wake`
    pub fn with_seams(clock: Arc<dyn Clock>, wake: Arc<dyn WakeSignal>) -> Self {
        Self {
            clock,
            wake,
            max_wait: DEFAULT_MAX_WAIT,
            drain_limit: DEFAULT_DRAIN_LIMIT,
        }
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn drain_limit(mut self, limit: usize) -> Self {
        self.drain_limit = limit;
        self
    }

    /// Run `entry` with a [`Timers`] handle, then drive the loop until idle,
    /// including timers and outstanding IO. Returns whatever `entry` returned.
    pub fn execute<F, R>(&self, entry: F) -> R
    where
        F: FnOnce(&Timers) -> R,
    {
        let state = Arc::new(SchedulerState::new(self.clock.clone(), self.wake.clone()));
        let mut pump = EventLoopPump::new(state.clone()).with_drain_limit(self.drain_limit);
        let timers = Timers::new(state);

        let result = entry(&timers);

        let iterations = pump.run_until_idle(WaitMode::Timers, self.max_wait);
        tracing::debug!(iterations, "engine loop idle");

        // Refuse scheduling through handles that outlive the run
        pump.state().close();
        result
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
