use std::hash::Hash;

use crate::computation::{self, Computation};
use crate::engine::{DeadlineEngine, HandlerPanic};
use crate::error::{BoxError, Error, Result};
use crate::flight::SingleFlightCache;

/// Default number of internal shards for both primitives.
pub(crate) const DEFAULT_SHARDS: usize = 64;

fn check_shards(n: usize) -> Result<()> {
    if n > 0 && n.is_power_of_two() {
        Ok(())
    } else {
        Err(Error::InvalidArgument("num_shards must be a power of two"))
    }
}

// ---------------------------------------------------------------------------
// DeadlineEngineBuilder
// ---------------------------------------------------------------------------

/// Builder for configuring and constructing a [`DeadlineEngine`].
///
/// # Example
/// ```
/// use cortado::{DeadlineEngine, HandlerPanic};
///
/// let engine = DeadlineEngine::builder()
///     .num_shards(16)
///     .handler_panics(HandlerPanic::Contain)
///     .build()
///     .unwrap();
/// # let _ = engine;
/// ```
#[derive(Clone, Debug)]
pub struct DeadlineEngineBuilder {
    num_shards: usize,
    on_panic: HandlerPanic,
}

impl Default for DeadlineEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadlineEngineBuilder {
    pub fn new() -> Self {
        DeadlineEngineBuilder {
            num_shards: DEFAULT_SHARDS,
            on_panic: HandlerPanic::default(),
        }
    }

    /// Set the number of registry shards (must be a power of two; default: 64).
    pub fn num_shards(mut self, n: usize) -> Self {
        self.num_shards = n;
        self
    }

    /// Choose what `poll` does when a handler panics (default:
    /// [`HandlerPanic::Propagate`]).
    pub fn handler_panics(mut self, policy: HandlerPanic) -> Self {
        self.on_panic = policy;
        self
    }

    /// # Errors
    /// [`Error::InvalidArgument`] if the shard count is not a power of two.
    pub fn build(self) -> Result<DeadlineEngine> {
        check_shards(self.num_shards)?;
        Ok(DeadlineEngine::with_config(self.num_shards, self.on_panic))
    }
}

// ---------------------------------------------------------------------------
// SingleFlightBuilder
// ---------------------------------------------------------------------------

/// Builder for configuring and constructing a [`SingleFlightCache`].
///
/// The computation is required; [`build`](Self::build) fails without one.
///
/// # Example
/// ```
/// use cortado::SingleFlightCache;
///
/// let cache = SingleFlightCache::builder()
///     .num_shards(8)
///     .computation(|k: &u32| Ok::<_, std::num::TryFromIntError>(Some(u8::try_from(*k)?)))
///     .build()
///     .unwrap();
/// assert_eq!(cache.get(&7).unwrap().as_deref(), Some(&7u8));
/// assert!(cache.get(&700).is_err());
/// ```
pub struct SingleFlightBuilder<K, V> {
    num_shards: usize,
    computation: Option<Box<dyn Computation<K, V>>>,
}

impl<K: 'static, V: 'static> Default for SingleFlightBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: 'static, V: 'static> SingleFlightBuilder<K, V> {
    pub fn new() -> Self {
        SingleFlightBuilder {
            num_shards: DEFAULT_SHARDS,
            computation: None,
        }
    }

    /// Set the number of internal shards (must be a power of two; default: 64).
    pub fn num_shards(mut self, n: usize) -> Self {
        self.num_shards = n;
        self
    }

    /// Bind the cache to a closure.
    ///
    /// `Ok(None)` is a legitimate result and is cached like any other value.
    pub fn computation<F, E>(mut self, f: F) -> Self
    where
        F: Fn(&K) -> std::result::Result<Option<V>, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.computation = Some(computation::boxed(f));
        self
    }

    /// Bind the cache to any type implementing [`Computation`].
    pub fn computation_impl<C: Computation<K, V>>(mut self, c: C) -> Self {
        self.computation = Some(Box::new(c));
        self
    }
}

impl<K, V> SingleFlightBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// # Errors
    /// [`Error::InvalidArgument`] if no computation was supplied or the
    /// shard count is not a power of two.
    pub fn build(self) -> Result<SingleFlightCache<K, V>> {
        check_shards(self.num_shards)?;
        let computation = self
            .computation
            .ok_or(Error::InvalidArgument("a computation is required"))?;
        Ok(SingleFlightCache::with_config(self.num_shards, computation))
    }
}
