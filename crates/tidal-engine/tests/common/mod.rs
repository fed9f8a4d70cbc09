//! Shared test doubles for the pump integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tidal_engine::{Clock, EventLoopPump, ManualClock, SchedulerState, WakeError, WakeSignal};

/// Wake signal over virtual time: every wait advances the manual clock by the
/// full timeout, so tests never sleep. Can be told to fail its N-th signal.
pub struct VirtualWake {
    clock: Arc<ManualClock>,
    signals: AtomicUsize,
    waits: AtomicUsize,
    fail_on: Option<usize>,
}

impl VirtualWake {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            signals: AtomicUsize::new(0),
            waits: AtomicUsize::new(0),
            fail_on: None,
        }
    }

    /// Fail the `n`-th call to `signal` (1-based).
    pub fn failing_on(clock: Arc<ManualClock>, n: usize) -> Self {
        Self {
            fail_on: Some(n),
            ..Self::new(clock)
        }
    }

    pub fn signal_count(&self) -> usize {
        self.signals.load(Ordering::SeqCst)
    }

    pub fn wait_count(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }
}

impl WakeSignal for VirtualWake {
    fn signal(&self) -> Result<(), WakeError> {
        let n = self.signals.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on == Some(n) {
            return Err(WakeError(format!("injected failure on signal {}", n)));
        }
        Ok(())
    }

    fn wait(&self, timeout: Duration) -> bool {
        self.waits.fetch_add(1, Ordering::SeqCst);
        self.clock.advance(timeout);
        false
    }
}

/// A pump over virtual time with handles to its clock and wake signal.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub wake: Arc<VirtualWake>,
    pub pump: EventLoopPump,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new());
        let wake = Arc::new(VirtualWake::new(clock.clone()));
        Self::with_wake(clock, wake)
    }

    pub fn failing_on(n: usize) -> Self {
        let clock = Arc::new(ManualClock::new());
        let wake = Arc::new(VirtualWake::failing_on(clock.clone(), n));
        Self::with_wake(clock, wake)
    }

    fn with_wake(clock: Arc<ManualClock>, wake: Arc<VirtualWake>) -> Self {
        let state = SchedulerState::new(clock.clone(), wake.clone());
        Self {
            clock,
            wake,
            pump: EventLoopPump::new(Arc::new(state)),
        }
    }

    pub fn state(&self) -> Arc<SchedulerState> {
        self.pump.state().clone()
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now().as_nanos() / 1_000_000
    }

    /// Run the wait/iterate loop until no work remains. Panics if it takes
    /// more than `max_iterations` iterations.
    pub fn run_to_completion(&mut self, max_iterations: usize) -> usize {
        let mut iterations = 0;
        while self.pump.has_pending_work() {
            assert!(
                iterations < max_iterations,
                "loop still busy after {} iterations: {:?}",
                iterations,
                self.pump.state()
            );
            self.pump.run_one_iteration();
            iterations += 1;
            self.pump.wait_for_work_or_next_timer(Duration::from_millis(50));
        }
        iterations
    }
}

/// Ordered record of callback executions
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    /// Closure that appends `entry` each time it is called
    pub fn recorder(&self, entry: &str) -> impl Fn() + Send + Sync + 'static {
        let log = self.clone();
        let entry = entry.to_string();
        move || log.push(entry.clone())
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}
