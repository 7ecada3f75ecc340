//! The computation a [`SingleFlightCache`](crate::SingleFlightCache) memoizes.
//!
//! # Example
//! ```
//! use cortado::computation::Computation;
//! use cortado::{BoxError, SingleFlightCache};
//!
//! struct Lengths;
//!
//! impl Computation<String, usize> for Lengths {
//!     fn compute(&self, key: &String) -> Result<Option<usize>, BoxError> {
//!         if key.is_empty() {
//!             return Ok(None);
//!         }
//!         Ok(Some(key.len()))
//!     }
//! }
//!
//! let cache: SingleFlightCache<String, usize> = SingleFlightCache::builder()
//!     .computation_impl(Lengths)
//!     .build()
//!     .unwrap();
//! assert_eq!(cache.get(&"four".to_string()).unwrap().as_deref(), Some(&4));
//! assert_eq!(cache.get(&String::new()).unwrap(), None);
//! ```

use crate::error::BoxError;

/// Produces the value for a key.
///
/// Returning `Ok(None)` means "computed, no value"; it is cached and served
/// as a hit exactly like `Ok(Some(_))`.  Returning `Err` caches nothing.
///
/// Implementations must be `Send + Sync + 'static` because one instance is
/// shared by every thread using the cache.  Computations for different keys
/// may run concurrently.
pub trait Computation<K, V>: Send + Sync + 'static {
    fn compute(&self, key: &K) -> Result<Option<V>, BoxError>;
}

/// A [`Computation`] backed by a closure.
///
/// Created via [`SingleFlightCache::new`](crate::SingleFlightCache::new) or
/// [`SingleFlightBuilder::computation`](crate::SingleFlightBuilder::computation).
pub struct FnComputation<F>(F);

impl<F> FnComputation<F> {
    pub fn new(f: F) -> Self {
        FnComputation(f)
    }
}

impl<K, V, F> Computation<K, V> for FnComputation<F>
where
    F: Fn(&K) -> Result<Option<V>, BoxError> + Send + Sync + 'static,
{
    #[inline]
    fn compute(&self, key: &K) -> Result<Option<V>, BoxError> {
        (self.0)(key)
    }
}

/// Wraps a closure with any convertible error type into a boxed
/// [`Computation`].
pub(crate) fn boxed<K, V, E, F>(f: F) -> Box<dyn Computation<K, V>>
where
    K: 'static,
    V: 'static,
    F: Fn(&K) -> Result<Option<V>, E> + Send + Sync + 'static,
    E: Into<BoxError>,
{
    Box::new(FnComputation::new(
        move |key: &K| -> Result<Option<V>, BoxError> { f(key).map_err(Into::into) },
    ))
}
