//! Runtime Configuration
//!
//! Tunables for the propagation engine. The configuration lives in the
//! thread-local runtime (see [`crate::configure`]), so every thread running
//! its own signal graph can be tuned independently.

use serde::{Deserialize, Serialize};

/// Default cap on verify/recompute rounds for a single computed update.
pub const DEFAULT_MAX_CHANGE_ROUNDS: usize = 1000;

/// Configuration for the signal runtime
///
/// # Example
///
/// ```
/// use ripple_core::RuntimeConfig;
///
/// let config = RuntimeConfig::default()
///     .with_max_change_rounds(50)
///     .with_flush_on_batch_exit(false);
/// assert_eq!(config.max_change_rounds(), 50);
/// assert!(!config.flush_on_batch_exit());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on verify/recompute rounds when a computed signal is
    /// brought up to date. Exceeding it caches a
    /// [`SignalError::MaxChangeRounds`](crate::SignalError::MaxChangeRounds)
    /// on that computed.
    ///
    /// Clamped to at least 1.
    max_change_rounds: usize,

    /// Run the deferred-unuse flush when an outermost [`crate::batch`]
    /// exits.
    ///
    /// Plain writes, reads and subscribes never flush. When disabled,
    /// planned teardowns only happen on an explicit
    /// [`crate::flush_unused`] call.
    flush_on_batch_exit: bool,
}

impl RuntimeConfig {
    /// Set the verify/recompute round cap.
    pub fn with_max_change_rounds(mut self, rounds: usize) -> Self {
        self.max_change_rounds = rounds.max(1);
        self
    }

    /// Enable or disable the flush at the end of outermost user batches.
    pub fn with_flush_on_batch_exit(mut self, enabled: bool) -> Self {
        self.flush_on_batch_exit = enabled;
        self
    }

    /// Get the verify/recompute round cap
    pub fn max_change_rounds(&self) -> usize {
        self.max_change_rounds.max(1)
    }

    /// Check whether batches flush planned teardowns on exit
    pub fn flush_on_batch_exit(&self) -> bool {
        self.flush_on_batch_exit
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_change_rounds: DEFAULT_MAX_CHANGE_ROUNDS,
            flush_on_batch_exit: true,
        }
    }
}
