//! Module loading seam
//!
//! The compiler pipeline lives outside this crate. A runtime instance only
//! needs something that, on the owner thread, evaluates a module and hands back
//! its exports; that is [`ModuleLoader`].

use crate::error::{RuntimeError, RuntimeResult, ScriptError};
use std::sync::Arc;
use tidal_engine::{SchedulerState, Timers};

/// Context available to a module while it evaluates on the owner thread.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    module_id: String,
    timers: Timers,
}

impl ModuleContext {
    pub(crate) fn new(module_id: &str, scheduler: Arc<SchedulerState>) -> Self {
        Self {
            module_id: module_id.to_string(),
            timers: Timers::new(scheduler),
        }
    }

    /// Normalized specifier of the module being evaluated
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Timer primitives bound to this runtime's scheduler
    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    pub fn scheduler(&self) -> &Arc<SchedulerState> {
        self.timers.scheduler()
    }
}

/// Evaluates the entry module of a runtime instance.
///
/// Runs exactly once, on the owner thread. An `Err` aborts construction and is
/// reported to the caller of `spawn`.
pub trait ModuleLoader: Send + 'static {
    /// What the module exports
    type Exports: Send + Sync + 'static;

    fn load(self, ctx: &ModuleContext, specifier: &str) -> Result<Self::Exports, ScriptError>;
}

impl<F, E> ModuleLoader for F
where
    F: FnOnce(&ModuleContext, &str) -> Result<E, ScriptError> + Send + 'static,
    E: Send + Sync + 'static,
{
    type Exports = E;

    fn load(self, ctx: &ModuleContext, specifier: &str) -> Result<E, ScriptError> {
        self(ctx, specifier)
    }
}

/// Normalize an entry module id: trim it, keep explicit relative (`./`,
/// `../`) and absolute (`/`) specifiers, and treat anything else as local.
pub fn normalize_module_specifier(module_id: &str) -> RuntimeResult<String> {
    let trimmed = module_id.trim();
    if trimmed.is_empty() {
        return Err(RuntimeError::Config("module id must not be empty".to_string()));
    }
    if trimmed.starts_with("./") || trimmed.starts_with("../") || trimmed.starts_with('/') {
        return Ok(trimmed.to_string());
    }
    Ok(format!("./{}", trimmed))
}
