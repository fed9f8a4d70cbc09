//! Tidal Engine
//!
//! Cooperative, single-consumer task scheduling for compiled script callables:
//! next-tick callbacks, microtasks, immediates and one-shot/repeating timers,
//! drained in host-compatible order by an [`EventLoopPump`] bound to one thread.
//!
//! Producers on any thread enqueue work through [`SchedulerState`] (or the
//! [`Timers`] facade); exactly one owner thread drives the pump.

pub mod clock;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod promise;
pub mod scheduler;
pub mod timers;
pub mod wake;

pub use clock::{Clock, ManualClock, MonotonicClock, Tick};
pub use engine::Engine;
pub use error::{SchedulerError, WakeError};
pub use promise::{Promise, PromiseState};
pub use scheduler::{
    EventLoopPump, ImmediateHandle, IntervalHandle, SchedulerState, TimeoutHandle, WaitMode,
};
pub use timers::Timers;
pub use wake::{CondvarSignal, WakeSignal};
