use std::sync::atomic::{AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// Deadline engine
// ---------------------------------------------------------------------------

/// Atomic counters updated by the deadline engine.
#[derive(Default)]
pub(crate) struct EngineCounter {
    scheduled: AtomicU64,
    cancelled: AtomicU64,
    fired: AtomicU64,
    swept: AtomicU64,
    handler_panics: AtomicU64,
}

impl EngineCounter {
    #[inline]
    pub(crate) fn record_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_fired(&self, count: u64) {
        self.fired.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_swept(&self, count: u64) {
        self.swept.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_handler_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of the statistics.
    pub(crate) fn snapshot(&self) -> EngineStats {
        EngineStats {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            fired: self.fired.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of deadline engine statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    /// Events ever scheduled.
    pub scheduled: u64,
    /// Successful `cancel` calls.  Repeated cancels of one id count each time.
    pub cancelled: u64,
    /// Events delivered to a handler.
    pub fired: u64,
    /// Cancelled entries physically removed from the registry.
    pub swept: u64,
    /// Handler panics caught under [`HandlerPanic::Contain`](crate::HandlerPanic::Contain).
    pub handler_panics: u64,
}

// ---------------------------------------------------------------------------
// Single-flight cache
// ---------------------------------------------------------------------------

/// Atomic counters updated on every single-flight cache lookup.
#[derive(Default)]
pub(crate) struct CacheCounter {
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    failures: AtomicU64,
}

impl CacheCounter {
    #[inline]
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_computation(&self) {
        self.computations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0_f64
        } else {
            hits as f64 / total as f64
        };
        CacheStats {
            hits,
            misses,
            computations: self.computations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            hit_rate,
        }
    }
}

/// A point-in-time snapshot of single-flight cache statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    /// Lookups answered from a stored value without taking the key's gate.
    pub hits: u64,
    /// Lookups that found no stored value and went to the key's gate,
    /// including coalesced waiters served by another caller's computation.
    pub misses: u64,
    /// Computations started (successful or not).
    pub computations: u64,
    /// Computations that returned an error or panicked.
    pub failures: u64,
    /// `hits / (hits + misses)`, or `0.0` if no requests have been made.
    pub hit_rate: f64,
}

impl CacheStats {
    pub fn request_count(&self) -> u64 {
        self.hits + self.misses
    }
}
