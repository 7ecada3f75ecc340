//! Error taxonomy shared by both primitives.
//!
//! Cancelling an unknown event id is deliberately *not* an error; see
//! [`DeadlineEngine::cancel`](crate::DeadlineEngine::cancel).

use std::any::Any;
use std::fmt;

/// A type-erased error that can cross threads.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A parameter was out of range, or a builder was missing a required part.
    ///
    /// The failing operation has no side effect.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The memoized computation failed.  Nothing was cached for the key.
    #[error("computation failed")]
    ComputationFailed {
        #[source]
        source: BoxError,
    },
}

impl Error {
    pub(crate) fn computation_failed(source: BoxError) -> Self {
        Error::ComputationFailed { source }
    }

    /// Returns `true` for [`Error::InvalidArgument`].
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }

    /// Returns `true` for [`Error::ComputationFailed`].
    pub fn is_computation_failed(&self) -> bool {
        matches!(self, Error::ComputationFailed { .. })
    }
}

/// Cause attached to [`Error::ComputationFailed`] when the computation
/// panicked instead of returning an error.
#[derive(Debug)]
pub struct ComputationPanicked {
    message: String,
}

impl ComputationPanicked {
    pub(crate) fn from_payload(payload: &(dyn Any + Send)) -> Self {
        ComputationPanicked {
            message: panic_message(payload),
        }
    }

    /// The panic message, or a placeholder for non-string payloads.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ComputationPanicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "computation panicked: {}", self.message)
    }
}

impl std::error::Error for ComputationPanicked {}

/// Extracts the message from a `catch_unwind` payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}
