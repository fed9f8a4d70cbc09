//! Event-loop scheduling
//!
//! [`SchedulerState`] is the thread-safe set of queues producers write into;
//! [`EventLoopPump`] drains it on a single owner thread.

mod entry;
mod pump;
mod state;

pub use entry::{ImmediateHandle, IntervalHandle, Task, TimeoutHandle, TimerCallback};
pub use pump::{EventLoopPump, WaitMode};
pub use state::SchedulerState;
