//! Tidal Runtime
//!
//! Hosts a loaded module on a dedicated owner thread that drives the engine's
//! event loop, and marshals calls onto that thread from any other thread.
//!
//! # Example
//!
//! ```rust,ignore
//! use tidal_runtime::{ModuleContext, RuntimeInstance, ScriptError};
//!
//! let runtime = RuntimeInstance::new(
//!     |ctx: &ModuleContext, _specifier: &str| -> Result<u32, ScriptError> {
//!         ctx.timers().set_timeout(|| println!("tick"), 10.0).ok();
//!         Ok(42)
//!     },
//!     "main",
//! )?;
//! let answer = runtime.invoke(|ctx| Ok(*ctx.exports() + 1))?;
//! runtime.dispose();
//! ```

pub mod error;
pub mod instance;
pub mod loader;
pub mod options;

pub use error::{RuntimeError, RuntimeResult, ScriptError};
pub use instance::{InstanceState, RuntimeBuilder, RuntimeContext, RuntimeInstance};
pub use loader::{normalize_module_specifier, ModuleContext, ModuleLoader};
pub use options::RuntimeOptions;
