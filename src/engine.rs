use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{error, trace};

use crate::builder::{DeadlineEngineBuilder, DEFAULT_SHARDS};
use crate::error::{panic_message, Error, Result};
use crate::event::{EventId, ScheduledEvent};
use crate::metrics::stats::{EngineCounter, EngineStats};
use crate::store::sharded::ShardedStore;

// ---------------------------------------------------------------------------
// Handler panic policy
// ---------------------------------------------------------------------------

/// What [`DeadlineEngine::poll`] does when the handler panics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HandlerPanic {
    /// The panic unwinds out of `poll` and the rest of the batch is
    /// abandoned.  The event whose handler panicked is left unfired and is
    /// delivered again by a later poll.
    #[default]
    Propagate,
    /// The panic is caught and logged, and `poll` carries on with the batch.
    /// The offending event is marked fired so it is never redelivered, but it
    /// does not count towards `poll`'s return value.
    Contain,
}

// ---------------------------------------------------------------------------
// Engine interior
// ---------------------------------------------------------------------------

struct Inner {
    registry: ShardedStore<EventId, Arc<ScheduledEvent>>,
    next_id: AtomicU64,
    on_panic: HandlerPanic,
    metrics: EngineCounter,
}

// ---------------------------------------------------------------------------
// Engine handle
// ---------------------------------------------------------------------------

/// A poll-driven registry of timed events that fire exactly once.
///
/// Callers [`schedule`](Self::schedule) events against a caller-defined
/// clock, may [`cancel`](Self::cancel) them, and periodically
/// [`poll`](Self::poll) with the current time to deliver the expired ones.
/// Any number of threads may do all three concurrently: each event is handed
/// to a handler at most once, and never after a successful `cancel`.
///
/// Firing is serialized per event, never across the whole registry.
/// Cancelled events are only flagged by `cancel`; they are physically
/// removed by the next `poll` (or an explicit [`sweep`](Self::sweep)).
///
/// # Example
/// ```
/// use cortado::DeadlineEngine;
///
/// let engine = DeadlineEngine::new();
/// let a = engine.schedule(10);
/// let b = engine.schedule(20);
/// engine.cancel(b);
///
/// let mut fired = Vec::new();
/// let n = engine.poll(30, |id| fired.push(id), 100).unwrap();
/// assert_eq!(n, 1);
/// assert_eq!(fired, vec![a]);
/// ```
pub struct DeadlineEngine {
    inner: Arc<Inner>,
}

impl Clone for DeadlineEngine {
    fn clone(&self) -> Self {
        DeadlineEngine {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for DeadlineEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadlineEngine {
    /// Creates an engine with the default configuration.
    pub fn new() -> Self {
        Self::with_config(DEFAULT_SHARDS, HandlerPanic::default())
    }

    /// Returns a [`DeadlineEngineBuilder`] for constructing a new engine.
    pub fn builder() -> DeadlineEngineBuilder {
        DeadlineEngineBuilder::new()
    }

    pub(crate) fn with_config(num_shards: usize, on_panic: HandlerPanic) -> Self {
        DeadlineEngine {
            inner: Arc::new(Inner {
                registry: ShardedStore::new(num_shards),
                next_id: AtomicU64::new(0),
                on_panic,
                metrics: EngineCounter::default(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // schedule / cancel
    // -----------------------------------------------------------------------

    /// Registers an event due once the clock passes `deadline` and returns
    /// its fresh id.
    pub fn schedule(&self, deadline: i64) -> EventId {
        let id = EventId::from(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .registry
            .insert(id, Arc::new(ScheduledEvent::new(deadline)));
        self.inner.metrics.record_scheduled();
        trace!(event = %id, deadline, "scheduled deadline");
        id
    }

    /// Cancels the event `id`.
    ///
    /// Returns `false` if the engine holds no such event (never issued, or
    /// already cancelled and swept).  Once this returns `true` no later poll
    /// delivers `id`; a delivery already in progress on another thread
    /// completes.
    pub fn cancel(&self, id: EventId) -> bool {
        match self.inner.registry.get(&id) {
            Some(event) => {
                event.cancel();
                self.inner.metrics.record_cancelled();
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // poll
    // -----------------------------------------------------------------------

    /// Delivers up to `max_fire` events whose deadline is strictly before
    /// `now` to `handler`, one call per event, and returns how many were
    /// delivered.
    ///
    /// Cancelled events are swept from the registry first.  Delivery order
    /// is unspecified.  Events taken by a concurrent poll, or cancelled
    /// while this poll was scanning, are skipped and do not count against
    /// `max_fire`.
    ///
    /// The handler may call back into the engine, including a nested `poll`.
    /// An event whose delivery is already in progress, on this thread or
    /// another, is skipped rather than waited on.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] if `max_fire` is negative.  Nothing is
    /// swept or delivered in that case.
    pub fn poll<H>(&self, now: i64, mut handler: H, max_fire: i64) -> Result<usize>
    where
        H: FnMut(EventId),
    {
        if max_fire < 0 {
            return Err(Error::InvalidArgument("max_fire must not be negative"));
        }
        self.sweep();

        let limit = usize::try_from(max_fire).unwrap_or(usize::MAX);
        let mut delivered = 0usize;
        if limit == 0 || self.inner.registry.is_empty() {
            return Ok(0);
        }

        self.inner.registry.for_each_shard(
            |id, event| {
                (event.is_due(now) && event.is_pending()).then(|| (*id, Arc::clone(event)))
            },
            |due| {
                for (id, event) in due {
                    if delivered == limit {
                        break;
                    }
                    if self.fire(id, &event, &mut handler) {
                        delivered += 1;
                    }
                }
                delivered < limit
            },
        );

        trace!(now, delivered, "polled deadlines");
        Ok(delivered)
    }

    fn fire<H>(&self, id: EventId, event: &ScheduledEvent, handler: &mut H) -> bool
    where
        H: FnMut(EventId),
    {
        let fired = match self.inner.on_panic {
            HandlerPanic::Propagate => event.fire_once(|| handler(id)),
            HandlerPanic::Contain => {
                let mut caught = None;
                let fired = event.fire_once(|| {
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(id))) {
                        caught = Some(payload);
                    }
                });
                if let Some(payload) = caught {
                    self.inner.metrics.record_handler_panic();
                    error!(
                        event = %id,
                        panic = %panic_message(&*payload),
                        "deadline handler panicked"
                    );
                    return false;
                }
                fired
            }
        };
        if fired {
            self.inner.metrics.record_fired(1);
        }
        fired
    }

    // -----------------------------------------------------------------------
    // Maintenance and introspection
    // -----------------------------------------------------------------------

    /// Physically removes every cancelled event and returns how many were
    /// removed.
    ///
    /// `poll` does this on every call; calling it separately lets a caller
    /// reclaim memory on its own schedule.
    pub fn sweep(&self) -> usize {
        let removed = self.inner.registry.retain(|_, event| !event.is_cancelled());
        if removed > 0 {
            self.inner.metrics.record_swept(removed as u64);
            trace!(
                removed,
                remaining = self.inner.registry.len(),
                "swept cancelled deadlines"
            );
        }
        removed
    }

    /// Number of events not cancelled, fired ones included.
    ///
    /// This is a point-in-time approximation under concurrent mutation.
    pub fn size(&self) -> usize {
        self.inner.registry.count_where(|event| !event.is_cancelled())
    }

    /// Returns a snapshot of the engine's lifetime counters.
    pub fn stats(&self) -> EngineStats {
        self.inner.metrics.snapshot()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
