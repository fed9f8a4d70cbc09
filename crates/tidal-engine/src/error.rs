//! Engine error types.

/// Errors returned by producer-side scheduling calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// The scheduler was closed because its runtime is shutting down
    #[error("scheduler is closed")]
    Closed,
}

/// A wake signal failed to notify its waiter.
///
/// Producers treat this as best-effort: the queue mutation that preceded the
/// signal is already applied, so the pump still observes it on its next
/// bounded wait.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("wake signal failed: {0}")]
pub struct WakeError(pub String);

/// Result alias for scheduling calls
pub type SchedulerResult<T> = Result<T, SchedulerError>;
