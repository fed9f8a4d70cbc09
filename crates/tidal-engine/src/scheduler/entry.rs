//! Queue entries and the opaque handles returned to producers

use crate::clock::Tick;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A one-shot deferred callback (next-tick, microtask, immediate).
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A timer callback. Shared so a repeating timer can run it once per firing.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Handle returned by `schedule_timeout`
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TimeoutHandle(pub(crate) u64);

/// Handle returned by `schedule_interval`. Stable across reschedules.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct IntervalHandle(pub(crate) u64);

/// Handle returned by `schedule_immediate`
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ImmediateHandle(pub(crate) u64);

impl TimeoutHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl IntervalHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl ImmediateHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Entry in the timer heap (min-heap by due tick, then id)
pub(crate) struct TimerEntry {
    pub id: u64,
    pub callback: TimerCallback,
    pub due: Tick,
    pub repeating: bool,
    pub interval: Duration,
}

// Reverse ordering for min-heap: earliest due first, ties broken by scheduling order
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.due == other.due
    }
}

impl Eq for TimerEntry {}

impl fmt::Debug for TimerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerEntry")
            .field("id", &self.id)
            .field("due", &self.due)
            .field("repeating", &self.repeating)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Entry in the immediate FIFO
pub(crate) struct ImmediateEntry {
    pub id: u64,
    pub callback: Task,
}

/// The timer callback promoted for this iteration's macrotask slot
pub(crate) struct Macrotask {
    pub timer_id: u64,
    pub callback: TimerCallback,
}

/// Outcome of taking one slot from the immediate queue
pub(crate) enum ImmediateSlot {
    /// Queue was empty
    Empty,
    /// The entry in this slot had been canceled
    Canceled,
    /// Runnable callback
    Ready(Task),
}
