//! Runtime error types.

/// A value thrown by script code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    /// A structured error object
    #[error("{}", format_error(name, message))]
    Error {
        name: String,
        message: String,
        stack: Option<String>,
    },

    /// A thrown non-error value, described as text
    #[error("Uncaught {0}")]
    Thrown(String),

    /// Generic wrapper added by the invocation layer around the real error
    #[error("Exception has been thrown by the target of an invocation: {0}")]
    Invocation(Box<ScriptError>),

    /// A Rust panic caught on the owner thread
    #[error("panic on owner thread: {0}")]
    Panic(String),
}

fn format_error(name: &str, message: &str) -> String {
    if message.is_empty() {
        name.to_string()
    } else {
        format!("{}: {}", name, message)
    }
}

impl ScriptError {
    /// `Error`-style error with no stack
    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        ScriptError::Error {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Wrap in an invocation layer
    pub fn wrapped(self) -> Self {
        ScriptError::Invocation(Box::new(self))
    }

    /// Strip every invocation wrapper and return the error that was actually thrown.
    pub fn into_root(self) -> Self {
        let mut error = self;
        while let ScriptError::Invocation(inner) = error {
            error = *inner;
        }
        error
    }

    /// Build a `Panic` from a `catch_unwind` payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        ScriptError::Panic(message)
    }
}

/// Errors surfaced by a runtime instance to its callers.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The module threw during evaluation; the instance never started
    #[error("failed to load module '{module_id}': {source}")]
    ModuleLoad {
        module_id: String,
        #[source]
        source: ScriptError,
    },

    /// A marshaled call threw
    #[error(transparent)]
    Invocation(ScriptError),

    /// The instance was disposed before or while the call was pending
    #[error("runtime instance has been disposed")]
    Disposed,

    /// The owner thread exited without completing the call
    #[error("runtime owner thread terminated")]
    Terminated,

    /// The owner thread could not be started
    #[error("failed to spawn runtime thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Invalid runtime options
    #[error("invalid runtime options: {0}")]
    Config(String),

    /// File I/O error
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// The script error behind a load or invocation failure
    pub fn script_error(&self) -> Option<&ScriptError> {
        match self {
            RuntimeError::ModuleLoad { source, .. } => Some(source),
            RuntimeError::Invocation(error) => Some(error),
            _ => None,
        }
    }
}

/// Result alias for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;
