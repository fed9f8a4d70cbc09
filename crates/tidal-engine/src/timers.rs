//! Host timer primitives
//!
//! Script-facing wrapper over [`SchedulerState`] with host-style argument
//! handling: delays are milliseconds as `f64`, and clearing a missing handle
//! is a no-op.

use crate::error::SchedulerResult;
use crate::scheduler::{ImmediateHandle, IntervalHandle, SchedulerState, TimeoutHandle};
use std::sync::Arc;
use std::time::Duration;

/// Cloneable handle to the timer functions of one scheduler.
#[derive(Debug, Clone)]
pub struct Timers {
    scheduler: Arc<SchedulerState>,
}

impl Timers {
    pub fn new(scheduler: Arc<SchedulerState>) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Arc<SchedulerState> {
        &self.scheduler
    }

    pub fn set_timeout<F>(&self, callback: F, delay_ms: f64) -> SchedulerResult<TimeoutHandle>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.scheduler
            .schedule_timeout(callback, delay_from_millis(delay_ms))
    }

    pub fn clear_timeout(&self, handle: Option<TimeoutHandle>) {
        if let Some(handle) = handle {
            self.scheduler.cancel_timeout(handle);
        }
    }

    pub fn set_interval<F>(&self, callback: F, interval_ms: f64) -> SchedulerResult<IntervalHandle>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.scheduler
            .schedule_interval(callback, delay_from_millis(interval_ms))
    }

    pub fn clear_interval(&self, handle: Option<IntervalHandle>) {
        if let Some(handle) = handle {
            self.scheduler.cancel_interval(handle);
        }
    }

    pub fn set_immediate<F>(&self, callback: F) -> SchedulerResult<ImmediateHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.schedule_immediate(callback)
    }

    pub fn clear_immediate(&self, handle: Option<ImmediateHandle>) {
        if let Some(handle) = handle {
            self.scheduler.cancel_immediate(handle);
        }
    }

    pub fn queue_microtask<F>(&self, task: F) -> SchedulerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.queue_microtask(task)
    }

    pub fn next_tick<F>(&self, task: F) -> SchedulerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.queue_next_tick(task)
    }
}

/// Convert a script delay to a [`Duration`]. NaN and negative values mean
/// "as soon as possible"; values too large to represent saturate.
pub fn delay_from_millis(ms: f64) -> Duration {
    if ms.is_nan() || ms <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::MAX)
}
