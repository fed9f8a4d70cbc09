//! Cross-thread wake signal
//!
//! Producers call [`WakeSignal::signal`] after enqueueing work; the owner thread
//! blocks in [`WakeSignal::wait`] between pump iterations. The default
//! implementation is an auto-reset event built on a condvar.

use crate::error::WakeError;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Signal used to interrupt the pump's idle wait.
pub trait WakeSignal: Send + Sync {
    /// Wake one waiter (or the next one to call `wait`).
    fn signal(&self) -> Result<(), WakeError>;

    /// Block for at most `timeout`. Returns true if woken by a signal.
    fn wait(&self, timeout: Duration) -> bool;
}

/// Auto-reset event: a signal wakes exactly one wait, and a signal that arrives
/// while nobody waits is kept until the next wait consumes it.
#[derive(Debug, Default)]
pub struct CondvarSignal {
    signaled: Mutex<bool>,
    notify: Condvar,
}

impl CondvarSignal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WakeSignal for CondvarSignal {
    fn signal(&self) -> Result<(), WakeError> {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.notify.notify_one();
        Ok(())
    }

    fn wait(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock();
        if !*signaled && !timeout.is_zero() {
            // Spurious wakeups just end the wait early; the pump re-evaluates anyway.
            let _ = self.notify.wait_for(&mut signaled, timeout);
        }
        std::mem::replace(&mut *signaled, false)
    }
}
