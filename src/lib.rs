//! Two in-process coordination primitives:
//!
//! - [`DeadlineEngine`]: schedule, cancel and poll timed events, each
//!   delivered to a handler at most once under any number of concurrent
//!   pollers.
//! - [`SingleFlightCache`]: memoize a fallible keyed computation so it runs
//!   at most once per key, coalescing concurrent requests for the same key.
//!
//! Both are built on a sharded map and lock at the granularity of a single
//! event or key, never the whole collection.

mod builder;
mod engine;
mod error;
mod event;
mod flight;
mod metrics;
mod store;
pub mod computation;

pub use builder::{DeadlineEngineBuilder, SingleFlightBuilder};
pub use engine::{DeadlineEngine, HandlerPanic};
pub use error::{BoxError, ComputationPanicked, Error, Result};
pub use event::EventId;
pub use flight::SingleFlightCache;
pub use metrics::stats::{CacheStats, EngineStats};
