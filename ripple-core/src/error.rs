//! Error types for ripple-core
//!
//! Every fallible engine operation returns [`Result`]. Errors are `Clone`
//! because a computed node caches the error of its last run and hands the
//! same error back on every read until a dependency really changes.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Result type for ripple-core operations
pub type Result<T> = std::result::Result<T, SignalError>;

/// Errors that can occur while reading, writing or subscribing to signals
#[derive(Debug, Clone, Error)]
pub enum SignalError {
    /// A signal was read, written or subscribed to while consumers were
    /// being marked dirty.
    #[error("reading or writing a signal is not permitted during the notification phase")]
    Reentrancy,

    /// A computed signal was read while it was already computing.
    #[error("circular dependency detected: a computed signal read itself")]
    CircularDependency,

    /// Resolving one change kept invalidating the same computed signal.
    #[error("reached maximum number of store changes in one shot ({limit})")]
    MaxChangeRounds {
        /// The configured cap that was exceeded
        limit: usize,
    },

    /// `flush_unused` was called from inside a running flush.
    #[error("recursive flush of unused stores")]
    RecursiveFlush,

    /// A compute function failed.
    #[error("{0}")]
    Compute(ComputeError),
}

impl SignalError {
    /// Wrap an arbitrary error raised by a compute function.
    pub fn compute<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        SignalError::Compute(ComputeError(Arc::new(err)))
    }

    /// Build a compute failure from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        let boxed: Box<dyn StdError + Send + Sync> = message.into().into();
        SignalError::Compute(ComputeError(Arc::from(boxed)))
    }

    /// Get the user error if this is a compute failure
    pub fn compute_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            SignalError::Compute(err) => Some(&*err.0),
            _ => None,
        }
    }
}

/// Shared handle to the error returned by a compute function.
///
/// Clones point at the same underlying error, so a cached failure is
/// reported verbatim to every reader.
#[derive(Clone)]
pub struct ComputeError(Arc<dyn StdError + Send + Sync>);

impl ComputeError {
    /// Check whether two handles refer to the same failure.
    pub fn ptr_eq(&self, other: &ComputeError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ComputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for ComputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

// SignalError must stay Send + Sync even though the engine is single-threaded.
const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<SignalError>();
};
