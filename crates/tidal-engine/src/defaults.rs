//! Default constants for scheduler and pump configuration.

use std::time::Duration;

/// Upper bound on callbacks run by a single drain of the next-tick queue, and on
/// microtasks run by a single checkpoint. Keeps a self-requeueing callback from
/// starving the rest of the iteration.
pub const DEFAULT_DRAIN_LIMIT: usize = 1024;

/// Upper bound on immediates run by one iteration's immediate phase.
pub const DEFAULT_IMMEDIATE_LIMIT: usize = 1024;

/// Pump iterations a runtime owner thread runs between checks for incoming
/// requests.
pub const DEFAULT_TURN_ITERATIONS: usize = 64;

/// Longest the owner thread blocks waiting for work when no timer is pending.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(50);

/// Smallest gap between two firings of a repeating timer.
pub const MIN_INTERVAL_RESCHEDULE: Duration = Duration::from_millis(1);

/// How long `dispose` waits for the owner thread before detaching it.
pub const DEFAULT_DISPOSE_TIMEOUT: Duration = Duration::from_secs(10);
