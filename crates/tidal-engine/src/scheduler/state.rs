//! Thread-safe scheduler state
//!
//! Holds the four ordered queues (next-tick, microtask, immediate, timer) and the
//! in-flight IO counter. Any thread may enqueue or cancel; only the owning
//! [`EventLoopPump`](super::EventLoopPump) drains. Each queue has its own lock so
//! producers on unrelated queues never contend.

use super::entry::{
    ImmediateEntry, ImmediateHandle, ImmediateSlot, IntervalHandle, Macrotask, Task,
    TimeoutHandle, TimerEntry,
};
use crate::clock::{Clock, Tick};
use crate::defaults::MIN_INTERVAL_RESCHEDULE;
use crate::error::{SchedulerError, SchedulerResult};
use crate::promise::Promise;
use crate::wake::WakeSignal;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Immediate FIFO with lazy cancellation
#[derive(Default)]
struct ImmediateQueue {
    queue: VecDeque<ImmediateEntry>,
    /// Ids currently in `queue`
    queued: FxHashSet<u64>,
    /// Ids to skip at dequeue time
    canceled: FxHashSet<u64>,
}

/// Timer min-heap with lazy interval cancellation
#[derive(Default)]
struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    /// Repeating timers that still have an entry in `heap`
    live_intervals: FxHashSet<u64>,
    /// Repeating timers canceled but not yet removed from `heap`
    canceled_intervals: FxHashSet<u64>,
}

impl TimerQueue {
    /// Drop canceled intervals sitting at the head, due or not.
    ///
    /// A canceled interval left at the head would keep `has_pending_work` true
    /// until its stale due time arrived and stall loop termination.
    fn prune_canceled_head(&mut self) {
        while let Some(head) = self.heap.peek() {
            if !(head.repeating && self.canceled_intervals.contains(&head.id)) {
                break;
            }
            let id = head.id;
            self.heap.pop();
            self.forget_interval(id);
        }
    }

    fn forget_interval(&mut self, id: u64) {
        self.canceled_intervals.remove(&id);
        self.live_intervals.remove(&id);
    }
}

/// Shared scheduler state for one runtime.
pub struct SchedulerState {
    next_tick: Mutex<VecDeque<Task>>,
    microtasks: Mutex<VecDeque<Task>>,
    immediates: Mutex<ImmediateQueue>,
    timers: Mutex<TimerQueue>,

    /// Outstanding external async operations (`begin_io` minus `end_io`)
    pending_io: AtomicUsize,

    next_timer_id: AtomicU64,
    next_immediate_id: AtomicU64,

    /// Set when the owning runtime shuts down; new work is refused
    closed: AtomicBool,

    clock: Arc<dyn Clock>,
    wake: Arc<dyn WakeSignal>,
}

impl SchedulerState {
    /// Create scheduler state reading time from `clock` and waking the pump through `wake`.
    pub fn new(clock: Arc<dyn Clock>, wake: Arc<dyn WakeSignal>) -> Self {
        Self {
            next_tick: Mutex::new(VecDeque::new()),
            microtasks: Mutex::new(VecDeque::new()),
            immediates: Mutex::new(ImmediateQueue::default()),
            timers: Mutex::new(TimerQueue::default()),
            pending_io: AtomicUsize::new(0),
            next_timer_id: AtomicU64::new(0),
            next_immediate_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            clock,
            wake,
        }
    }

    /// The clock this state schedules against
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The signal used to wake the pump
    pub fn wake_signal(&self) -> &Arc<dyn WakeSignal> {
        &self.wake
    }

    // ========================================================================
    // Producer API (any thread)
    // ========================================================================

    /// Schedule `callback` to run once, `delay` from now.
    pub fn schedule_timeout<F>(&self, callback: F, delay: Duration) -> SchedulerResult<TimeoutHandle>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let id = self.next_timer_id.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = TimerEntry {
            id,
            callback: Arc::new(callback),
            due: self.clock.now() + delay,
            repeating: false,
            interval: Duration::ZERO,
        };

        self.timers.lock().heap.push(entry);
        self.notify();
        Ok(TimeoutHandle(id))
    }

    /// Remove a one-shot timer. Unknown or already-fired handles are ignored.
    pub fn cancel_timeout(&self, handle: TimeoutHandle) {
        self.timers
            .lock()
            .heap
            .retain(|e| e.repeating || e.id != handle.0);
        self.notify();
    }

    /// Schedule `callback` to run every `interval`, first firing `interval` from now.
    pub fn schedule_interval<F>(
        &self,
        callback: F,
        interval: Duration,
    ) -> SchedulerResult<IntervalHandle>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let id = self.next_timer_id.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = TimerEntry {
            id,
            callback: Arc::new(callback),
            due: self.clock.now() + interval,
            repeating: true,
            interval,
        };

        {
            let mut timers = self.timers.lock();
            timers.live_intervals.insert(id);
            timers.heap.push(entry);
        }
        self.notify();
        Ok(IntervalHandle(id))
    }

    /// Cancel a repeating timer.
    ///
    /// The entry stays in the heap and is dropped when it reaches the head, so
    /// cancellation is safe even while the pump is promoting that very entry.
    pub fn cancel_interval(&self, handle: IntervalHandle) {
        {
            let mut timers = self.timers.lock();
            if timers.live_intervals.contains(&handle.0) {
                timers.canceled_intervals.insert(handle.0);
            }
        }
        self.notify();
    }

    /// Queue `callback` for the immediate phase of a coming iteration.
    pub fn schedule_immediate<F>(&self, callback: F) -> SchedulerResult<ImmediateHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_open()?;
        let id = self.next_immediate_id.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut immediates = self.immediates.lock();
            immediates.queue.push_back(ImmediateEntry {
                id,
                callback: Box::new(callback),
            });
            immediates.queued.insert(id);
        }
        self.notify();
        Ok(ImmediateHandle(id))
    }

    /// Cancel a queued immediate. It is skipped when its slot comes up.
    pub fn cancel_immediate(&self, handle: ImmediateHandle) {
        {
            let mut immediates = self.immediates.lock();
            if !immediates.queued.contains(&handle.0) {
                return;
            }
            immediates.canceled.insert(handle.0);
        }
        self.notify();
    }

    /// Queue a promise-reaction style microtask.
    pub fn queue_microtask<F>(&self, task: F) -> SchedulerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_open()?;
        self.microtasks.lock().push_back(Box::new(task));
        self.notify();
        Ok(())
    }

    /// Queue a next-tick callback. Next-tick callbacks outrank microtasks and
    /// always run once queued.
    pub fn queue_next_tick<F>(&self, task: F) -> SchedulerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_open()?;
        self.next_tick.lock().push_back(Box::new(task));
        self.notify();
        Ok(())
    }

    /// Mark an external async operation as outstanding.
    pub fn begin_io(&self) {
        self.pending_io.fetch_add(1, Ordering::AcqRel);
        self.notify();
    }

    /// Complete an external async operation and settle `promise` with `outcome`.
    ///
    /// The promise is settled before the counter drops and before the pump is
    /// woken. Its reactions are queued as microtasks and a failing wake signal is
    /// only logged, so the result is never lost, even if no pump drains again.
    pub fn end_io<T, E>(&self, promise: &Promise<T, E>, outcome: Result<T, E>)
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        if !promise.settle(outcome) {
            tracing::debug!("end_io on an already settled promise");
        }

        let previous = self
            .pending_io
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous.is_err() {
            tracing::warn!("end_io called without a matching begin_io");
        }

        self.notify();
    }

    /// Number of outstanding IO operations
    pub fn pending_io(&self) -> usize {
        self.pending_io.load(Ordering::Acquire)
    }

    // ========================================================================
    // Liveness queries
    // ========================================================================

    /// True if any queue holds work, IO is outstanding, or any timer is scheduled
    /// (due or not).
    pub fn has_pending_work(&self) -> bool {
        if self.has_queued_callbacks() || self.pending_io() > 0 {
            return true;
        }
        !self.timers.lock().heap.is_empty()
    }

    /// True if some work can run at `now`: a queued callback or a due timer.
    ///
    /// Unlike [`has_pending_work`](Self::has_pending_work), outstanding IO is
    /// never counted here. Callers may rely on this: a `NoTimers` drain returns
    /// while IO is still in flight, and `end_io` makes work runnable again by
    /// queueing the promise's reactions and signalling the pump.
    pub fn has_pending_work_now(&self, now: Tick) -> bool {
        if self.has_queued_callbacks() {
            return true;
        }
        let mut timers = self.timers.lock();
        timers.prune_canceled_head();
        timers.heap.peek().is_some_and(|head| head.due <= now)
    }

    /// Due tick of the earliest live timer
    pub fn next_timer_due(&self) -> Option<Tick> {
        let mut timers = self.timers.lock();
        timers.prune_canceled_head();
        timers.heap.peek().map(|head| head.due)
    }

    /// How long the owner thread may block at `now`: zero if work is runnable,
    /// otherwise the time until the next timer, capped at `max_wait`.
    pub fn wait_duration(&self, now: Tick, max_wait: Duration) -> Duration {
        if self.has_pending_work_now(now) {
            return Duration::ZERO;
        }
        match self.next_timer_due() {
            Some(due) => due.saturating_duration_since(now).min(max_wait),
            None => max_wait,
        }
    }

    /// Number of entries in the timer heap, including lazily-canceled ones
    pub fn timer_count(&self) -> usize {
        self.timers.lock().heap.len()
    }

    /// Number of entries in the immediate queue, including canceled ones
    pub fn immediate_count(&self) -> usize {
        self.immediates.lock().queue.len()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Refuse further scheduling. Already-queued work is left for the pump.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ========================================================================
    // Consumer API (owner thread, via the pump)
    // ========================================================================

    pub(crate) fn try_dequeue_next_tick(&self) -> Option<Task> {
        self.next_tick.lock().pop_front()
    }

    pub(crate) fn try_dequeue_microtask(&self) -> Option<Task> {
        self.microtasks.lock().pop_front()
    }

    pub(crate) fn immediate_count_snapshot(&self, max: usize) -> usize {
        self.immediates.lock().queue.len().min(max)
    }

    /// Take exactly one entry from the immediate FIFO.
    pub(crate) fn take_immediate_slot(&self) -> ImmediateSlot {
        let mut immediates = self.immediates.lock();
        let Some(entry) = immediates.queue.pop_front() else {
            return ImmediateSlot::Empty;
        };
        immediates.queued.remove(&entry.id);
        if immediates.canceled.remove(&entry.id) {
            return ImmediateSlot::Canceled;
        }
        ImmediateSlot::Ready(entry.callback)
    }

    /// Dequeue the head timer if it is due at `now`.
    ///
    /// A repeating timer is reinserted at `now + interval` before its callback
    /// runs, keeping its id; a late firing therefore shifts the series instead
    /// of bursting to catch up.
    pub(crate) fn promote_due_timer(&self, now: Tick) -> Option<Macrotask> {
        let mut timers = self.timers.lock();
        timers.prune_canceled_head();

        if timers.heap.peek().is_none_or(|head| head.due > now) {
            return None;
        }
        let entry = timers.heap.pop()?;

        if entry.repeating && timers.canceled_intervals.contains(&entry.id) {
            timers.forget_interval(entry.id);
            return None;
        }

        if entry.repeating {
            let next = TimerEntry {
                id: entry.id,
                callback: entry.callback.clone(),
                due: now + entry.interval.max(MIN_INTERVAL_RESCHEDULE),
                repeating: true,
                interval: entry.interval,
            };
            timers.heap.push(next);
        }

        Some(Macrotask {
            timer_id: entry.id,
            callback: entry.callback,
        })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Queue a promise reaction and wake the pump. Reactions bypass the closed
    /// flag.
    pub(crate) fn push_reaction(&self, task: Task) {
        self.microtasks.lock().push_back(task);
        self.notify();
    }

    fn has_queued_callbacks(&self) -> bool {
        !self.microtasks.lock().is_empty()
            || !self.next_tick.lock().is_empty()
            || !self.immediates.lock().queue.is_empty()
    }

    fn ensure_open(&self) -> SchedulerResult<()> {
        if self.is_closed() {
            return Err(SchedulerError::Closed);
        }
        Ok(())
    }

    /// Best-effort wake of the pump
    fn notify(&self) {
        if let Err(e) = self.wake.signal() {
            tracing::warn!(error = %e, "wake signal failed; pump will observe work on its next wait");
        }
    }
}

impl fmt::Debug for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerState")
            .field("next_tick", &self.next_tick.lock().len())
            .field("microtasks", &self.microtasks.lock().len())
            .field("immediates", &self.immediates.lock().queue.len())
            .field("timers", &self.timers.lock().heap.len())
            .field("pending_io", &self.pending_io())
            .field("closed", &self.is_closed())
            .finish()
    }
}
