//! Runtime instance
//!
//! One dedicated owner thread per loaded module. The owner thread evaluates the
//! module, then alternates between executing marshaled requests and pumping the
//! event loop, so timer- and IO-driven work makes progress even when no caller
//! is active.
//!
//! ```text
//! caller threads ──invoke──► request channel ──► owner thread
//!                                                  │  job(ctx)
//!                                                  │  pump.run_until_idle(NoTimers)
//!                ◄──────── completion channel ─────┘
//! ```

use crate::error::{RuntimeError, RuntimeResult, ScriptError};
use crate::loader::{normalize_module_specifier, ModuleContext, ModuleLoader};
use crate::options::RuntimeOptions;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tidal_engine::{
    Clock, CondvarSignal, EventLoopPump, MonotonicClock, SchedulerState, Timers, WakeSignal,
};

/// Lifecycle of a runtime instance
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InstanceState {
    Initializing,
    Running,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceState::Initializing => "initializing",
            InstanceState::Running => "running",
            InstanceState::ShuttingDown => "shutting down",
            InstanceState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// What a marshaled call sees on the owner thread.
pub struct RuntimeContext<E> {
    module_id: String,
    exports: Arc<E>,
    timers: Timers,
}

impl<E> RuntimeContext<E> {
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn exports(&self) -> &E {
        &self.exports
    }

    /// Timer primitives bound to this runtime's scheduler
    pub fn timers(&self) -> &Timers {
        &self.timers
    }
}

/// Unit of work sent to the owner thread. Carries its own completion sender.
type Job<E> = Box<dyn FnOnce(&RuntimeContext<E>) + Send + 'static>;

/// State shared between the instance handle and its owner thread
struct Shared {
    state: Mutex<InstanceState>,
    /// Set once by the first `dispose`
    shutdown: AtomicBool,
}

impl Shared {
    fn set_state(&self, next: InstanceState) {
        let mut state = self.state.lock();
        // Terminated is final
        if *state != InstanceState::Terminated {
            *state = next;
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Configures and starts a [`RuntimeInstance`].
pub struct RuntimeBuilder {
    options: RuntimeOptions,
    clock: Arc<dyn Clock>,
    wake: Arc<dyn WakeSignal>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            options: RuntimeOptions::default(),
            clock: Arc::new(MonotonicClock::new()),
            wake: Arc::new(CondvarSignal::new()),
        }
    }

    pub fn options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the tick source (tests use a manual clock)
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the wake signal used by the scheduler
    pub fn wake_signal(mut self, wake: Arc<dyn WakeSignal>) -> Self {
        self.wake = wake;
        self
    }

    /// Start the owner thread and evaluate `module_id` with `loader`.
    ///
    /// Blocks until the module has evaluated and the loop has drained its
    /// immediately runnable work (timers are not awaited). A module that
    /// throws is reported here as [`RuntimeError::ModuleLoad`].
    pub fn spawn<L>(self, loader: L, module_id: &str) -> RuntimeResult<RuntimeInstance<L::Exports>>
    where
        L: ModuleLoader,
    {
        let options = self.options;
        options.validate()?;
        let specifier = normalize_module_specifier(module_id)?;

        let scheduler = Arc::new(SchedulerState::new(self.clock, self.wake));
        let shared = Arc::new(Shared {
            state: Mutex::new(InstanceState::Initializing),
            shutdown: AtomicBool::new(false),
        });

        let (request_tx, request_rx) = channel::unbounded::<Job<L::Exports>>();
        let (init_tx, init_rx) = channel::bounded(1);
        let (terminated_tx, terminated_rx) = channel::bounded::<()>(0);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);

        let owner = Owner {
            loader: Some(loader),
            specifier: specifier.clone(),
            scheduler: scheduler.clone(),
            shared: shared.clone(),
            requests: request_rx,
            init: init_tx,
            _terminated: terminated_tx,
            max_wait: options.max_wait(),
            drain_limit: options.drain_limit,
            turn_iterations: options.turn_iterations,
        };

        let name = options
            .thread_name
            .clone()
            .unwrap_or_else(|| format!("tidal-runtime[{}]", specifier));
        let mut builder = thread::Builder::new().name(name);
        if let Some(size) = options.stack_size {
            builder = builder.stack_size(size);
        }
        let handle = builder
            .spawn(move || owner.run())
            .map_err(RuntimeError::Spawn)?;
        let owner_id = handle.thread().id();

        let context = match init_rx.recv() {
            Ok(Ok(context)) => context,
            Ok(Err(source)) => {
                let _ = handle.join();
                return Err(RuntimeError::ModuleLoad {
                    module_id: specifier,
                    source,
                });
            }
            Err(_) => {
                let _ = handle.join();
                return Err(RuntimeError::Terminated);
            }
        };

        Ok(RuntimeInstance {
            shared,
            context,
            scheduler,
            owner: owner_id,
            requests: RwLock::new(Some(request_tx)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            terminated: terminated_rx,
            handle: Mutex::new(Some(handle)),
            dispose_timeout: options.dispose_timeout(),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Instance handle
// ============================================================================

/// Handle to a module running on its own owner thread.
///
/// Shareable across threads. Dropping the last handle disposes the instance.
pub struct RuntimeInstance<E: Send + Sync + 'static> {
    shared: Arc<Shared>,
    context: Arc<RuntimeContext<E>>,
    scheduler: Arc<SchedulerState>,
    owner: ThreadId,

    /// `None` once disposed
    requests: RwLock<Option<Sender<Job<E>>>>,

    /// Dropped by `dispose` to release callers blocked in `invoke`
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,

    /// Disconnects when the owner thread exits
    terminated: Receiver<()>,

    handle: Mutex<Option<JoinHandle<()>>>,
    dispose_timeout: Duration,
}

impl<E: Send + Sync + 'static> RuntimeInstance<E> {
    /// Start `module_id` with default options
    pub fn new<L>(loader: L, module_id: &str) -> RuntimeResult<Self>
    where
        L: ModuleLoader<Exports = E>,
    {
        RuntimeBuilder::new().spawn(loader, module_id)
    }

    /// Run `f` on the owner thread and return its result.
    ///
    /// Called from the owner thread itself (from inside another marshaled
    /// call or a loop callback) `f` runs inline. Otherwise the calling thread
    /// blocks until the owner thread has run `f` or the instance is disposed.
    pub fn invoke<F, R>(&self, f: F) -> RuntimeResult<R>
    where
        F: FnOnce(&RuntimeContext<E>) -> Result<R, ScriptError> + Send + 'static,
        R: Send + 'static,
    {
        if self.shared.is_shutting_down() {
            return Err(RuntimeError::Disposed);
        }

        if thread::current().id() == self.owner {
            return run_guarded(|| f(&self.context)).map_err(RuntimeError::Invocation);
        }

        let (done_tx, done_rx) = channel::bounded(1);
        let job: Job<E> = Box::new(move |ctx: &RuntimeContext<E>| {
            let outcome = run_guarded(|| f(ctx));
            // The caller may have given up after a dispose
            let _ = done_tx.send(outcome);
        });

        {
            let requests = self.requests.read();
            let Some(tx) = requests.as_ref() else {
                return Err(RuntimeError::Disposed);
            };
            if tx.send(job).is_err() {
                return Err(self.closed_error());
            }
        }

        let outcome = channel::select! {
            recv(done_rx) -> outcome => outcome.ok(),
            recv(self.shutdown_rx) -> _ => done_rx.recv_timeout(self.dispose_timeout).ok(),
        };
        match outcome {
            Some(result) => result.map_err(RuntimeError::Invocation),
            None => Err(self.closed_error()),
        }
    }

    /// Shut the instance down. Idempotent and callable from any thread.
    ///
    /// Stops accepting requests, closes the scheduler, and waits up to the
    /// configured dispose timeout for the owner thread to exit. Called on the
    /// owner thread it only signals shutdown; the loop exits after the current
    /// callback returns.
    pub fn dispose(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(module = %self.context.module_id, "disposing runtime");

        self.shared.set_state(InstanceState::ShuttingDown);
        self.scheduler.close();
        self.requests.write().take();
        self.shutdown_tx.lock().take();

        self.join_owner();
    }

    /// Block until the owner thread has exited or `timeout` elapses.
    /// Returns false immediately on the owner thread.
    pub fn wait_for_shutdown(&self, timeout: Duration) -> bool {
        if thread::current().id() == self.owner {
            return false;
        }
        matches!(
            self.terminated.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// True once the owner thread has exited
    pub fn is_shutdown(&self) -> bool {
        matches!(self.terminated.try_recv(), Err(TryRecvError::Disconnected))
    }

    pub fn state(&self) -> InstanceState {
        *self.shared.state.lock()
    }

    pub fn module_id(&self) -> &str {
        &self.context.module_id
    }

    /// Module exports. Fails once the instance is disposed.
    pub fn exports(&self) -> RuntimeResult<&E> {
        if self.shared.is_shutting_down() {
            return Err(RuntimeError::Disposed);
        }
        Ok(&self.context.exports)
    }

    /// Scheduler of this runtime, for scheduling from other threads
    pub fn scheduler(&self) -> &Arc<SchedulerState> {
        &self.scheduler
    }

    pub fn timers(&self) -> &Timers {
        &self.context.timers
    }

    fn closed_error(&self) -> RuntimeError {
        if self.shared.is_shutting_down() {
            RuntimeError::Disposed
        } else {
            RuntimeError::Terminated
        }
    }

    /// Join the owner thread within the dispose timeout, detaching it if it
    /// does not stop. Never joins from the owner thread.
    fn join_owner(&self) {
        if thread::current().id() == self.owner {
            tracing::debug!("dispose called on owner thread, not joining");
            return;
        }
        let Some(handle) = self.handle.lock().take() else {
            return;
        };

        if self.wait_for_shutdown(self.dispose_timeout) {
            let _ = handle.join();
            tracing::debug!(module = %self.context.module_id, "owner thread joined");
        } else {
            tracing::warn!(
                module = %self.context.module_id,
                timeout_ms = self.dispose_timeout.as_millis() as u64,
                "owner thread did not exit in time, detaching"
            );
        }
    }
}

impl<E: Send + Sync + 'static> Drop for RuntimeInstance<E> {
    fn drop(&mut self) {
        self.dispose();
        // Covers a dispose that ran on the owner thread and skipped the join
        self.join_owner();
    }
}

impl<E: Send + Sync + 'static> fmt::Debug for RuntimeInstance<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeInstance")
            .field("module_id", &self.context.module_id)
            .field("state", &self.state())
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Run a script call, capturing panics and unwrapping invocation wrappers.
fn run_guarded<R>(f: impl FnOnce() -> Result<R, ScriptError>) -> Result<R, ScriptError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.map_err(ScriptError::into_root),
        Err(payload) => Err(ScriptError::from_panic(payload)),
    }
}

// ============================================================================
// Owner thread
// ============================================================================

/// Why the owner loop stopped
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum LoopExit {
    Shutdown,
    Disconnected,
    Panicked,
}

/// Everything the owner thread takes ownership of at spawn
struct Owner<L: ModuleLoader> {
    /// Consumed by module evaluation
    loader: Option<L>,
    specifier: String,
    scheduler: Arc<SchedulerState>,
    shared: Arc<Shared>,
    requests: Receiver<Job<L::Exports>>,
    init: Sender<Result<Arc<RuntimeContext<L::Exports>>, ScriptError>>,
    /// Held for the thread's lifetime; dropping it signals termination
    _terminated: Sender<()>,
    max_wait: Duration,
    drain_limit: usize,
    turn_iterations: usize,
}

impl<L: ModuleLoader> Owner<L> {
    fn run(mut self) {
        let span = tracing::debug_span!("tidal_runtime", module = %self.specifier);
        let _enter = span.enter();

        let mut pump =
            EventLoopPump::new(self.scheduler.clone()).with_drain_limit(self.drain_limit);

        let context = match self.initialize(&mut pump) {
            Ok(context) => context,
            Err(error) => {
                tracing::debug!(error = %error, "module evaluation failed");
                self.scheduler.close();
                self.shared.set_state(InstanceState::Terminated);
                let _ = self.init.send(Err(error));
                return;
            }
        };

        self.shared.set_state(InstanceState::Running);
        if self.init.send(Ok(context.clone())).is_err() {
            self.scheduler.close();
            self.shared.set_state(InstanceState::Terminated);
            return;
        }
        tracing::debug!("runtime running");

        let exit = self.serve(&mut pump, &context);
        tracing::debug!(reason = ?exit, "owner loop exited");
        // Nothing drains the scheduler past this point
        self.scheduler.close();
        self.shared.set_state(InstanceState::Terminated);
        // Dropping `self` drops queued requests (their callers see the
        // instance as disposed or terminated) and then the termination sender.
    }

    /// Evaluate the module and run one bounded turn of what it queued, without
    /// waiting for timers.
    fn initialize(
        &mut self,
        pump: &mut EventLoopPump,
    ) -> Result<Arc<RuntimeContext<L::Exports>>, ScriptError> {
        let loader = self
            .loader
            .take()
            .ok_or_else(|| ScriptError::error("Error", "module already evaluated"))?;
        let module_ctx = ModuleContext::new(&self.specifier, self.scheduler.clone());
        let exports = run_guarded(|| loader.load(&module_ctx, &self.specifier))?;

        run_guarded(|| {
            pump.run_ready(self.turn_iterations);
            Ok(())
        })?;

        Ok(Arc::new(RuntimeContext {
            module_id: self.specifier.clone(),
            exports: Arc::new(exports),
            timers: Timers::new(self.scheduler.clone()),
        }))
    }

    /// Alternate between requests and loop turns until shutdown.
    fn serve(&self, pump: &mut EventLoopPump, context: &RuntimeContext<L::Exports>) -> LoopExit {
        loop {
            if self.shared.is_shutting_down() {
                return LoopExit::Shutdown;
            }

            let wait = pump.wait_duration(self.max_wait);
            match self.requests.recv_timeout(wait) {
                Ok(job) => {
                    if self.shared.is_shutting_down() {
                        return LoopExit::Shutdown;
                    }
                    job(context);
                }
                // Nobody called in; still give due timers and settled IO a turn
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return LoopExit::Disconnected,
            }

            // Bounded so queued requests are served between turns of a busy loop
            let turn =
                panic::catch_unwind(AssertUnwindSafe(|| pump.run_ready(self.turn_iterations)));
            if let Err(payload) = turn {
                let error = ScriptError::from_panic(payload);
                tracing::error!(error = %error, "callback panicked on owner thread, stopping loop");
                return LoopExit::Panicked;
            }
        }
    }
}
