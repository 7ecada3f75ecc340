use cortado::{DeadlineEngine, EventId, HandlerPanic};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

/// Synthetic clock origin; the engine never reads a real clock.
const NOW: i64 = 1_700_000_000;

fn engine_with(n: i64) -> DeadlineEngine {
    let engine = DeadlineEngine::new();
    for i in 1..=n {
        engine.schedule(NOW + i);
    }
    engine
}

/// One delivery counter per event id.
fn delivery_counters(n: usize) -> Arc<Vec<AtomicUsize>> {
    Arc::new((0..n).map(|_| AtomicUsize::new(0)).collect())
}

// ---------------------------------------------------------------------------
// schedule
// ---------------------------------------------------------------------------

#[test]
fn concurrent_schedules_get_unique_ids() {
    let engine = DeadlineEngine::new();
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4i64)
        .map(|t| {
            let engine = engine.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (1..10_000i64)
                    .filter(|i| i % 4 == t)
                    .map(|i| engine.schedule(NOW + i))
                    .collect::<Vec<EventId>>()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for h in handles {
        for id in h.join().unwrap() {
            assert!(ids.insert(id), "duplicate id {id}");
        }
    }
    assert_eq!(ids.len(), 9_999);
    assert_eq!(engine.size(), 9_999);
}

// ---------------------------------------------------------------------------
// poll
// ---------------------------------------------------------------------------

#[test]
fn poll_fires_at_most_max_fire() {
    let engine = engine_with(10_000);

    let mut first = Vec::new();
    let fired = engine.poll(NOW + 10_001, |id| first.push(id), 4_000).unwrap();
    assert_eq!(fired, 4_000);
    assert_eq!(first.len(), 4_000);

    let mut second = Vec::new();
    let fired_again = engine
        .poll(NOW + 10_002, |id| second.push(id), 10_000)
        .unwrap();
    assert_eq!(fired_again, 6_000);
    assert_eq!(second.len(), 6_000);

    let all: HashSet<EventId> = first.into_iter().chain(second).collect();
    assert_eq!(all.len(), 10_000, "every event fires exactly once");
}

#[test]
fn poll_only_fires_expired_deadlines() {
    let engine = engine_with(10_000);

    let mut fired_ids = Vec::new();
    // Deadline NOW + 4000 equals `now`, so it is not yet expired.
    let fired = engine
        .poll(NOW + 4_000, |id| fired_ids.push(id), 6_000)
        .unwrap();
    assert_eq!(fired, 3_999);
    assert_eq!(fired_ids.len(), 3_999);
    // Deadline NOW + i was given id i - 1.
    assert!(fired_ids.iter().all(|id| id.get() < 3_999));
}

#[test]
fn repeated_polls_deliver_each_event_once() {
    let engine = engine_with(1_000);
    let counters = delivery_counters(1_000);

    let mut total = 0;
    for step in 1..=12 {
        let now = NOW + step * 100;
        total += engine
            .poll(now, |id| {
                counters[id.get() as usize].fetch_add(1, Ordering::Relaxed);
            }, 50 * step)
            .unwrap();
    }
    total += engine
        .poll(NOW + 2_000, |id| {
            counters[id.get() as usize].fetch_add(1, Ordering::Relaxed);
        }, i64::MAX)
        .unwrap();

    assert_eq!(total, 1_000);
    assert!(counters.iter().all(|c| c.load(Ordering::Relaxed) == 1));
}

#[test]
fn concurrent_polls_deliver_each_event_exactly_once() {
    let engine = engine_with(100_000);
    let counters = delivery_counters(100_000);
    let total = Arc::new(AtomicUsize::new(0));
    let next_poll = Arc::new(AtomicUsize::new(0));

    // 500 polls of up to 1_000 each, spread over 4 threads.
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            let counters = Arc::clone(&counters);
            let total = Arc::clone(&total);
            let next_poll = Arc::clone(&next_poll);
            thread::spawn(move || {
                while next_poll.fetch_add(1, Ordering::Relaxed) < 500 {
                    let n = engine
                        .poll(NOW + 1_000_001, |id| {
                            counters[id.get() as usize].fetch_add(1, Ordering::Relaxed);
                        }, 1_000)
                        .unwrap();
                    total.fetch_add(n, Ordering::Relaxed);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(total.load(Ordering::Relaxed), 100_000);
    let duplicates = counters.iter().filter(|c| c.load(Ordering::Relaxed) > 1).count();
    let dropped = counters.iter().filter(|c| c.load(Ordering::Relaxed) == 0).count();
    assert_eq!((duplicates, dropped), (0, 0));
    assert_eq!(engine.stats().fired, 100_000);
}

#[test]
fn negative_max_fire_is_rejected() {
    let engine = engine_with(3);
    let err = engine.poll(NOW + 10, |_| {}, -1).unwrap_err();
    assert!(err.is_invalid_argument());
    assert_eq!(err.to_string(), "invalid argument: max_fire must not be negative");
    assert_eq!(engine.stats().fired, 0);
    assert_eq!(engine.poll(NOW + 10, |_| {}, 3).unwrap(), 3);
}

// ---------------------------------------------------------------------------
// cancel
// ---------------------------------------------------------------------------

#[test]
fn cancel_removes_from_size() {
    let engine = DeadlineEngine::new();
    let id = engine.schedule(NOW);
    assert_eq!(engine.size(), 1);

    assert!(engine.cancel(id));
    assert_eq!(engine.size(), 0);
}

#[test]
fn cancel_of_unknown_id_does_nothing() {
    let engine = DeadlineEngine::new();
    let id = engine.schedule(NOW);
    assert_eq!(engine.size(), 1);

    assert!(!engine.cancel(EventId::from(id.get() + 1)));
    assert_eq!(engine.size(), 1);
}

#[test]
fn cancelled_event_is_never_fired_and_is_swept() {
    let engine = engine_with(10);
    for raw in [2u64, 5, 7] {
        assert!(engine.cancel(EventId::from(raw)));
    }

    let mut fired = Vec::new();
    assert_eq!(engine.poll(NOW + 100, |id| fired.push(id.get()), 100).unwrap(), 7);
    assert!(!fired.iter().any(|id| [2, 5, 7].contains(id)));

    let stats = engine.stats();
    assert_eq!(stats.swept, 3);
    // Swept entries are gone for good.
    assert!(!engine.cancel(EventId::from(5)));
}

#[test]
fn cancel_racing_with_polls_never_double_fires() {
    let engine = engine_with(100_000);
    let counters = delivery_counters(100_000);
    let next_poll = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();

    for range in [25_000u64..50_000, 50_000..75_000, 75_000..100_000] {
        let engine = engine.clone();
        handles.push(thread::spawn(move || {
            for raw in range {
                assert!(engine.cancel(EventId::from(raw)));
            }
        }));
    }
    for _ in 0..4 {
        let engine = engine.clone();
        let counters = Arc::clone(&counters);
        let next_poll = Arc::clone(&next_poll);
        handles.push(thread::spawn(move || {
            while next_poll.fetch_add(1, Ordering::Relaxed) < 500 {
                engine
                    .poll(NOW + 1_000_001, |id| {
                        counters[id.get() as usize].fetch_add(1, Ordering::Relaxed);
                    }, 1_000)
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert!(counters.iter().all(|c| c.load(Ordering::Relaxed) <= 1));
    assert!(
        counters[..25_000].iter().all(|c| c.load(Ordering::Relaxed) == 1),
        "uncancelled events must all fire"
    );
    assert_eq!(engine.size(), 25_000);
    assert_eq!(engine.poll(NOW + 1_000_001, |_| {}, i64::MAX).unwrap(), 0);
}

#[test]
fn cancel_versus_poll_on_one_id_has_a_single_outcome() {
    for _ in 0..200 {
        let engine = DeadlineEngine::new();
        let id = engine.schedule(NOW);
        let barrier = Arc::new(Barrier::new(2));
        let delivered = Arc::new(AtomicUsize::new(0));

        let poller = {
            let engine = engine.clone();
            let barrier = Arc::clone(&barrier);
            let delivered = Arc::clone(&delivered);
            thread::spawn(move || {
                barrier.wait();
                engine
                    .poll(NOW + 1, |_| {
                        delivered.fetch_add(1, Ordering::SeqCst);
                    }, 1)
                    .unwrap()
            })
        };
        barrier.wait();
        assert!(engine.cancel(id));
        let n = poller.join().unwrap();

        assert_eq!(n, delivered.load(Ordering::SeqCst));
        assert!(n <= 1);
        // Whatever the race outcome, a cancelled id never fires afterwards.
        assert_eq!(engine.poll(NOW + 1, |_| panic!("fired after cancel"), 1).unwrap(), 0);
    }
}

// ---------------------------------------------------------------------------
// Handler panics
// ---------------------------------------------------------------------------

#[test]
fn propagated_panic_leaves_event_for_next_poll() {
    let engine = DeadlineEngine::new();
    let id = engine.schedule(NOW);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        engine.poll(NOW + 1, |_| panic!("handler failed"), 10)
    }));
    assert!(result.is_err());

    let mut fired = Vec::new();
    assert_eq!(engine.poll(NOW + 1, |id| fired.push(id), 10).unwrap(), 1);
    assert_eq!(fired, vec![id]);
}

#[test]
fn contained_panic_does_not_abort_the_batch() {
    let engine = DeadlineEngine::builder()
        .num_shards(1)
        .handler_panics(HandlerPanic::Contain)
        .build()
        .unwrap();
    let bad = engine.schedule(NOW);
    for _ in 0..4 {
        engine.schedule(NOW);
    }

    let seen = Mutex::new(Vec::new());
    let n = engine
        .poll(NOW + 1, |id| {
            if id == bad {
                panic!("bad event");
            }
            seen.lock().unwrap().push(id);
        }, 10)
        .unwrap();

    assert_eq!(n, 4);
    assert_eq!(seen.lock().unwrap().len(), 4);
    assert_eq!(engine.stats().handler_panics, 1);
    // The panicking event is retired, not redelivered.
    assert_eq!(engine.poll(NOW + 1, |_| {}, 10).unwrap(), 0);
}
