//! Minimal settle-once promise
//!
//! The settlement target for external IO. Reactions registered with
//! [`Promise::then`] never run synchronously; they are queued as microtasks on
//! the promise's scheduler, so they run on the pump's owner thread.

use crate::scheduler::SchedulerState;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Observable state of a [`Promise`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromiseState<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

type Reaction<T, E> = Box<dyn FnOnce(Result<T, E>) + Send + 'static>;

struct Inner<T, E> {
    state: PromiseState<T, E>,
    reactions: Vec<Reaction<T, E>>,
}

/// A value that settles exactly once. Cloning shares the same promise.
pub struct Promise<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
    scheduler: Arc<SchedulerState>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Create a pending promise whose reactions run on `scheduler`.
    pub fn new(scheduler: &Arc<SchedulerState>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: PromiseState::Pending,
                reactions: Vec::new(),
            })),
            scheduler: scheduler.clone(),
        }
    }

    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(&self, error: E) -> bool {
        self.settle(Err(error))
    }

    /// Settle with `outcome`. Returns false if already settled; the first
    /// settlement wins.
    pub fn settle(&self, outcome: Result<T, E>) -> bool {
        let reactions = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, PromiseState::Pending) {
                return false;
            }
            inner.state = match &outcome {
                Ok(value) => PromiseState::Fulfilled(value.clone()),
                Err(error) => PromiseState::Rejected(error.clone()),
            };
            std::mem::take(&mut inner.reactions)
        };

        for reaction in reactions {
            self.enqueue(reaction, outcome.clone());
        }
        true
    }

    /// Register a reaction. It runs as a microtask once the promise settles,
    /// or on the next checkpoint if it already has.
    pub fn then<F>(&self, reaction: F)
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        let outcome = {
            let mut inner = self.inner.lock();
            match &inner.state {
                PromiseState::Pending => {
                    inner.reactions.push(Box::new(reaction));
                    return;
                }
                PromiseState::Fulfilled(value) => Ok(value.clone()),
                PromiseState::Rejected(error) => Err(error.clone()),
            }
        };
        self.enqueue(Box::new(reaction), outcome);
    }

    pub fn state(&self) -> PromiseState<T, E> {
        self.inner.lock().state.clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.inner.lock().state, PromiseState::Pending)
    }

    fn enqueue(&self, reaction: Reaction<T, E>, outcome: Result<T, E>) {
        self.scheduler
            .push_reaction(Box::new(move || reaction(outcome)));
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Promise")
            .field("state", &inner.state)
            .field("reactions", &inner.reactions.len())
            .finish()
    }
}
