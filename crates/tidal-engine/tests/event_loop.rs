//! Integration tests for the event-loop pump: ordering, fairness, liveness

mod common;

use common::{Harness, Log};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tidal_engine::{
    Clock, CondvarSignal, EventLoopPump, IntervalHandle, MonotonicClock, Promise, PromiseState,
    SchedulerState, Tick, WaitMode,
};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

// ============================================================================
// Liveness under cancellation
// ============================================================================

#[test]
fn test_intervals_canceled_before_first_fire_end_loop() {
    let mut h = Harness::new();
    let log = Log::new();
    let state = h.state();

    let handles: Vec<IntervalHandle> = [50, 100, 150]
        .into_iter()
        .map(|i| state.schedule_interval(log.recorder("fired"), ms(i)).unwrap())
        .collect();
    for handle in handles {
        state.cancel_interval(handle);
    }

    let iterations = h.run_to_completion(10);
    assert!(iterations < 10);
    assert_eq!(log.len(), 0);
    assert_eq!(state.timer_count(), 0);
}

#[test]
fn test_interval_canceling_itself_runs_once() {
    let mut h = Harness::new();
    let state = h.state();
    let count = Arc::new(Mutex::new(0));
    let slot: Arc<Mutex<Option<IntervalHandle>>> = Arc::new(Mutex::new(None));

    let handle = {
        let state = state.clone();
        let count = count.clone();
        let slot = slot.clone();
        h.state()
            .schedule_interval(
                move || {
                    *count.lock() += 1;
                    if let Some(handle) = *slot.lock() {
                        state.cancel_interval(handle);
                    }
                },
                ms(100),
            )
            .unwrap()
    };
    *slot.lock() = Some(handle);

    let iterations = h.run_to_completion(50);
    assert!(iterations < 50);
    assert_eq!(*count.lock(), 1);
}

#[test]
fn test_far_future_canceled_interval_pruned_in_one_iteration() {
    let mut h = Harness::new();
    let state = h.state();
    let handle = state
        .schedule_interval(|| {}, Duration::from_secs(3600))
        .unwrap();

    state.cancel_interval(handle);
    h.pump.run_one_iteration();

    assert!(!h.pump.has_pending_work());
    assert_eq!(h.now_ms(), 0);
}

#[test]
fn test_interval_canceled_after_several_fires() {
    let mut h = Harness::new();
    let state = h.state();
    let log = Log::new();
    let handle = state.schedule_interval(log.recorder("tick"), ms(10)).unwrap();

    let iterations_before = {
        let mut n = 0;
        while log.len() < 3 {
            h.pump.run_one_iteration();
            h.pump.wait_for_work_or_next_timer(ms(50));
            n += 1;
            assert!(n < 100);
        }
        n
    };
    assert!(iterations_before >= 3);

    state.cancel_interval(handle);
    h.run_to_completion(5);
    assert_eq!(log.len(), 3);
}

// ============================================================================
// Priority ordering
// ============================================================================

#[test]
fn test_next_ticks_from_microtask_run_before_next_microtask() {
    let mut h = Harness::new();
    let state = h.state();
    let log = Log::new();

    {
        let state = state.clone();
        let log = log.clone();
        h.state()
            .queue_microtask(move || {
                log.push("m1");
                state.queue_next_tick(log.recorder("t1")).unwrap();
                state.queue_next_tick(log.recorder("t2")).unwrap();
            })
            .unwrap();
    }
    state.queue_microtask(log.recorder("m2")).unwrap();

    h.pump.run_one_iteration();
    assert_eq!(log.entries(), vec!["m1", "t1", "t2", "m2"]);
}

#[test]
fn test_each_immediate_settles_before_the_next() {
    let mut h = Harness::new();
    let state = h.state();
    let log = Log::new();

    for name in ["a", "b"] {
        let state = state.clone();
        let log = log.clone();
        h.state()
            .schedule_immediate(move || {
                log.push(format!("imm-{}", name));
                state.queue_microtask(log.recorder(&format!("micro-{}", name))).unwrap();
                state.queue_next_tick(log.recorder(&format!("tick-{}", name))).unwrap();
            })
            .unwrap();
    }

    h.pump.run_one_iteration();
    assert_eq!(
        log.entries(),
        vec!["imm-a", "tick-a", "micro-a", "imm-b", "tick-b", "micro-b"]
    );
}

#[test]
fn test_priority_reapplied_every_iteration() {
    let mut h = Harness::new();
    let state = h.state();
    let log = Log::new();

    state.schedule_timeout(log.recorder("timer-1"), ms(0)).unwrap();
    {
        let state = state.clone();
        let log = log.clone();
        h.state()
            .schedule_timeout(
                move || {
                    log.push("timer-2");
                    state.queue_microtask(log.recorder("micro")).unwrap();
                    state.schedule_immediate(log.recorder("immediate")).unwrap();
                },
                ms(0),
            )
            .unwrap();
    }

    h.run_to_completion(10);
    assert_eq!(
        log.entries(),
        vec!["timer-1", "timer-2", "micro", "immediate"]
    );
}

// ============================================================================
// FIFO and immediate fairness
// ============================================================================

#[test]
fn test_immediates_run_in_enqueue_order() {
    let mut h = Harness::new();
    let state = h.state();
    let log = Log::new();

    for i in 0..20 {
        state.schedule_immediate(log.recorder(&i.to_string())).unwrap();
    }
    h.pump.run_one_iteration();

    let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
    assert_eq!(log.entries(), expected);
}

#[test]
fn test_immediates_queued_during_drain_wait_for_next_iteration() {
    let mut h = Harness::new();
    let state = h.state();
    let log = Log::new();

    {
        let state = state.clone();
        let log = log.clone();
        h.state()
            .schedule_immediate(move || {
                log.push("first");
                state.schedule_immediate(log.recorder("nested")).unwrap();
            })
            .unwrap();
    }
    state.schedule_immediate(log.recorder("second")).unwrap();

    h.pump.run_one_iteration();
    assert_eq!(log.entries(), vec!["first", "second"]);

    h.pump.run_one_iteration();
    assert_eq!(log.entries(), vec!["first", "second", "nested"]);
}

#[test]
fn test_canceled_immediate_never_runs() {
    let mut h = Harness::new();
    let state = h.state();
    let log = Log::new();

    state.schedule_immediate(log.recorder("a")).unwrap();
    let b = state.schedule_immediate(log.recorder("b")).unwrap();
    state.schedule_immediate(log.recorder("c")).unwrap();
    state.cancel_immediate(b);

    h.run_to_completion(5);
    assert_eq!(log.entries(), vec!["a", "c"]);
}

#[test]
fn test_equal_due_timers_fire_in_schedule_order() {
    let mut h = Harness::new();
    let state = h.state();
    let log = Log::new();

    for name in ["x", "y", "z"] {
        state.schedule_timeout(log.recorder(name), ms(25)).unwrap();
    }
    h.run_to_completion(20);
    assert_eq!(log.entries(), vec!["x", "y", "z"]);
}

// ============================================================================
// Drift-tolerant rescheduling
// ============================================================================

#[test]
fn test_late_interval_reschedules_from_execution_time() {
    let mut h = Harness::new();
    let state = h.state();
    let log = Log::new();
    state.schedule_interval(log.recorder("tick"), ms(100)).unwrap();

    // Due at 100, but the loop only gets to it at 370
    h.clock.set(Tick::ZERO + ms(370));
    h.pump.run_one_iteration();

    assert_eq!(log.len(), 1);
    assert_eq!(state.next_timer_due(), Some(Tick::ZERO + ms(470)));

    // One late firing, not a burst of catch-up firings
    h.pump.run_one_iteration();
    assert_eq!(log.len(), 1);
}

#[test]
fn test_one_shot_timer_waits_for_due_time() {
    let mut h = Harness::new();
    let state = h.state();
    let log = Log::new();
    state.schedule_timeout(log.recorder("late"), ms(120)).unwrap();

    h.pump.run_one_iteration();
    assert_eq!(log.len(), 0);

    h.run_to_completion(10);
    assert_eq!(log.entries(), vec!["late"]);
    assert!(h.clock.now() >= Tick::ZERO + ms(120));
}

// ============================================================================
// IO liveness
// ============================================================================

#[test]
fn test_io_keeps_loop_alive_until_end_io() {
    let mut h = Harness::new();
    let state = h.state();
    let promise: Promise<String, String> = Promise::new(&state);

    state.begin_io();
    assert!(h.pump.has_pending_work());
    assert!(!h.pump.has_pending_work_now());

    state.end_io(&promise, Ok("done".to_string()));
    h.run_to_completion(5);

    assert!(!h.pump.has_pending_work());
    assert_eq!(promise.state(), PromiseState::Fulfilled("done".to_string()));
}

#[test]
fn test_end_io_delivers_error() {
    let mut h = Harness::new();
    let state = h.state();
    let promise: Promise<String, String> = Promise::new(&state);
    let seen = Arc::new(Mutex::new(None));

    let s = seen.clone();
    promise.then(move |outcome| *s.lock() = Some(outcome));

    state.begin_io();
    state.end_io(&promise, Err("ENOENT".to_string()));
    h.run_to_completion(5);

    assert_eq!(*seen.lock(), Some(Err("ENOENT".to_string())));
}

#[test]
fn test_end_io_settles_even_when_wake_fails() {
    // Signal 1 is begin_io, signal 2 is end_io
    let mut h = Harness::failing_on(2);
    let state = h.state();
    let promise: Promise<String, String> = Promise::new(&state);

    state.begin_io();
    state.end_io(&promise, Ok("ok".to_string()));
    assert_eq!(h.wake.signal_count(), 2);
    assert_eq!(promise.state(), PromiseState::Fulfilled("ok".to_string()));

    h.run_to_completion(5);
    assert!(!h.pump.has_pending_work());
    assert_eq!(promise.state(), PromiseState::Fulfilled("ok".to_string()));
}

#[test]
fn test_io_completed_from_another_thread() {
    let mut h = Harness::new();
    let state = h.state();
    let promise: Promise<u32, String> = Promise::new(&state);

    state.begin_io();
    let worker = {
        let state = state.clone();
        let promise = promise.clone();
        thread::spawn(move || state.end_io(&promise, Ok(99)))
    };
    worker.join().unwrap();

    h.run_to_completion(5);
    assert_eq!(promise.state(), PromiseState::Fulfilled(99));
}

// ============================================================================
// Cross-thread producers
// ============================================================================

#[test]
fn test_concurrent_producers_all_run() {
    let mut h = Harness::new();
    let state = h.state();
    let log = Log::new();

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let state = state.clone();
            let log = log.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    let tag = format!("{}-{}", p, i);
                    let scheduled = match i % 3 {
                        0 => state.queue_microtask(log.recorder(&tag)),
                        1 => state.schedule_immediate(log.recorder(&tag)).map(|_| ()),
                        _ => state.schedule_timeout(log.recorder(&tag), ms(1)).map(|_| ()),
                    };
                    scheduled.unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    h.run_to_completion(1000);
    assert_eq!(log.len(), 200);
}

#[test]
fn test_producer_wakes_idle_pump() {
    let state = Arc::new(SchedulerState::new(
        Arc::new(MonotonicClock::new()),
        Arc::new(CondvarSignal::new()),
    ));
    let mut pump = EventLoopPump::new(state.clone());
    let log = Log::new();

    let producer = {
        let state = state.clone();
        let log = log.clone();
        thread::spawn(move || {
            thread::sleep(ms(20));
            state.queue_microtask(log.recorder("woken")).unwrap();
        })
    };

    let start = Instant::now();
    pump.wait_for_work_or_next_timer(Duration::from_secs(10));
    let waited = start.elapsed();
    producer.join().unwrap();

    assert!(waited < Duration::from_secs(5), "waited {:?}", waited);
    pump.run_until_idle(WaitMode::NoTimers, ms(50));
    assert_eq!(log.entries(), vec!["woken".to_string()]);
}
