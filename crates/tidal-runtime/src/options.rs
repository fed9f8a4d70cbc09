//! Runtime instance options (TOML)

use crate::error::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tidal_engine::defaults::{
    DEFAULT_DISPOSE_TIMEOUT, DEFAULT_DRAIN_LIMIT, DEFAULT_MAX_WAIT, DEFAULT_TURN_ITERATIONS,
};

/// Options for a runtime instance.
///
/// Every field has a default, so a TOML document only needs the keys it
/// overrides:
///
/// ```toml
/// max_wait_ms = 20
/// thread_name = "worker-runtime"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Longest idle wait of the owner thread between loop turns
    pub max_wait_ms: u64,

    /// How long `dispose` waits for the owner thread before detaching it
    pub dispose_timeout_ms: u64,

    /// Per-drain bound for next-tick and microtask checkpoints
    pub drain_limit: usize,

    /// Loop iterations the owner thread runs before serving the next request
    pub turn_iterations: usize,

    /// Owner thread name; derived from the module id when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_name: Option<String>,

    /// Owner thread stack size in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_size: Option<usize>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            max_wait_ms: DEFAULT_MAX_WAIT.as_millis() as u64,
            dispose_timeout_ms: DEFAULT_DISPOSE_TIMEOUT.as_millis() as u64,
            drain_limit: DEFAULT_DRAIN_LIMIT,
            turn_iterations: DEFAULT_TURN_ITERATIONS,
            thread_name: None,
            stack_size: None,
        }
    }
}

impl RuntimeOptions {
    /// Load options from a TOML file
    pub fn from_file(path: &Path) -> RuntimeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse options from a TOML string
    pub fn from_toml_str(content: &str) -> RuntimeResult<Self> {
        let options: RuntimeOptions =
            toml::from_str(content).map_err(|e| RuntimeError::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> RuntimeResult<()> {
        if self.max_wait_ms == 0 {
            return Err(RuntimeError::Config(
                "max_wait_ms must be at least 1".to_string(),
            ));
        }
        if self.turn_iterations == 0 {
            return Err(RuntimeError::Config(
                "turn_iterations must be at least 1".to_string(),
            ));
        }
        if self.drain_limit == 0 {
            return Err(RuntimeError::Config(
                "drain_limit must be at least 1".to_string(),
            ));
        }
        if self.stack_size == Some(0) {
            return Err(RuntimeError::Config(
                "stack_size must be non-zero".to_string(),
            ));
        }
        if let Some(name) = &self.thread_name {
            if name.contains('\0') {
                return Err(RuntimeError::Config(
                    "thread_name must not contain NUL bytes".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn dispose_timeout(&self) -> Duration {
        Duration::from_millis(self.dispose_timeout_ms)
    }
}
