use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::debug;

use crate::builder::{SingleFlightBuilder, DEFAULT_SHARDS};
use crate::computation::{self, Computation};
use crate::error::{BoxError, ComputationPanicked, Error, Result};
use crate::metrics::stats::{CacheCounter, CacheStats};
use crate::store::sharded::ShardedStore;

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// Storage cell for one key.
///
/// The slot resident in the store for a key is the canonical lock target for
/// every caller asking for an equal key.  `value` is written at most once,
/// under `gate`, and read without it.  `Some(None)` is a computed "no value";
/// an unset `value` means nothing has been computed yet.
struct Slot<V> {
    gate: Mutex<()>,
    value: OnceLock<Option<Arc<V>>>,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Slot {
            gate: Mutex::new(()),
            value: OnceLock::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cache interior
// ---------------------------------------------------------------------------

struct Inner<K, V> {
    store: ShardedStore<K, Arc<Slot<V>>>,
    computation: Box<dyn Computation<K, V>>,
    metrics: CacheCounter,
}

// ---------------------------------------------------------------------------
// Cache handle
// ---------------------------------------------------------------------------

/// A memoizing cache that runs its computation at most once per key.
///
/// Concurrent [`get`](Self::get) calls for equal keys are coalesced: one
/// caller computes while the others wait on that key alone, then all of them
/// receive the same stored value.  Callers asking for other keys are never
/// blocked by it.
///
/// Successful results (including `None`) are kept forever.  Failures are
/// never cached, so the next `get` for that key computes again.
///
/// # Example
/// ```
/// use cortado::SingleFlightCache;
/// use std::convert::Infallible;
///
/// let cache = SingleFlightCache::new(|n: &u64| Ok::<_, Infallible>(Some(n * n)));
/// assert_eq!(cache.get(&12).unwrap().as_deref(), Some(&144));
/// assert_eq!(cache.len(), 1);
/// ```
pub struct SingleFlightCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for SingleFlightCache<K, V> {
    fn clone(&self) -> Self {
        SingleFlightCache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a cache permanently bound to `f`, with default settings.
    pub fn new<F, E>(f: F) -> Self
    where
        F: Fn(&K) -> std::result::Result<Option<V>, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::with_config(DEFAULT_SHARDS, computation::boxed(f))
    }

    /// Returns a [`SingleFlightBuilder`] for constructing a new cache.
    pub fn builder() -> SingleFlightBuilder<K, V> {
        SingleFlightBuilder::new()
    }

    pub(crate) fn with_config(num_shards: usize, computation: Box<dyn Computation<K, V>>) -> Self {
        SingleFlightCache {
            inner: Arc::new(Inner {
                store: ShardedStore::new(num_shards),
                computation,
                metrics: CacheCounter::default(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // get
    // -----------------------------------------------------------------------

    /// Returns the value for `key`, computing it first if needed.
    ///
    /// `Ok(None)` is a cached "no value" result.
    ///
    /// # Errors
    /// [`Error::ComputationFailed`] if the computation returned an error or
    /// panicked.  The original error (or a
    /// [`ComputationPanicked`]) is the error's `source()`.
    pub fn get(&self, key: &K) -> Result<Option<Arc<V>>> {
        // Fast path: only the shard's read lock.
        if let Some(slot) = self.inner.store.get(key) {
            if let Some(value) = slot.value.get() {
                self.inner.metrics.record_hit();
                return Ok(value.clone());
            }
        }

        self.inner.metrics.record_miss();
        loop {
            let slot = self
                .inner
                .store
                .get_or_insert_with(key.clone(), || Arc::new(Slot::new()));
            let _gate = slot.gate.lock();

            // Another caller may have finished while we waited on the gate.
            if let Some(value) = slot.value.get() {
                return Ok(value.clone());
            }

            // A failed computation detaches its slot.  Slots are only removed
            // under their own gate, so residency checked here holds until we
            // release it.
            let resident = self
                .inner
                .store
                .get(key)
                .is_some_and(|s| Arc::ptr_eq(&s, &slot));
            if !resident {
                continue;
            }

            return self.compute(key, &slot);
        }
    }

    /// Runs the computation for `key` and stores the result in `slot`.
    ///
    /// Must be called with `slot`'s gate held.
    fn compute(&self, key: &K, slot: &Arc<Slot<V>>) -> Result<Option<Arc<V>>> {
        self.inner.metrics.record_computation();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.inner.computation.compute(key)));
        let cause: BoxError = match outcome {
            Ok(Ok(value)) => {
                let value = value.map(Arc::new);
                // Cannot already be set: writes only happen under the gate.
                let _ = slot.value.set(value.clone());
                return Ok(value);
            }
            Ok(Err(cause)) => cause,
            Err(payload) => Box::new(ComputationPanicked::from_payload(&*payload)),
        };

        self.inner.metrics.record_failure();
        debug!(error = %cause, "memoized computation failed");
        self.inner
            .store
            .remove_if(key, |resident| Arc::ptr_eq(resident, slot));
        Err(Error::computation_failed(cause))
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Returns `true` if a computed value (possibly `None`) is stored for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.inner
            .store
            .get(key)
            .is_some_and(|slot| slot.value.get().is_some())
    }

    /// Number of keys with a stored value.
    pub fn len(&self) -> usize {
        self.inner.store.count_where(|slot| slot.value.get().is_some())
    }

    /// Returns `true` if no computed value is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of the cache's lifetime counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.metrics.snapshot()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
