//! Ripple Core
//!
//! This crate provides a glitch-free, lazy and synchronous signal
//! propagation engine. It implements:
//!
//! - Writable cells and computed values with automatic dependency tracking
//! - Pull-based re-verification, so diamonds never recompute redundantly
//! - Subscriptions with two-phase pause/resume notification
//! - Batching of writes into a single notification pass
//! - Deferred teardown of unused nodes with visible start/stop effects
//! - A watcher protocol for composing with other reactive runtimes
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `graph`: node flags, producer/consumer links and the store substrate
//! - `reactive`: node kinds, tracking context, batching and the runtime
//!
//! Everything is single-threaded. Each thread has its own runtime and its
//! handles are neither `Send` nor `Sync`.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use ripple_core::{batch, computed, writable};
//!
//! let first = writable(String::from("Ada"));
//! let last = writable(String::from("Lovelace"));
//! let full = computed({
//!     let (first, last) = (first.clone(), last.clone());
//!     move || Ok(format!("{} {}", first.get()?, last.get()?))
//! });
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = seen.clone();
//! let _unsub = full.subscribe(move |name: &String| sink.borrow_mut().push(name.clone()))?;
//!
//! batch(|| {
//!     first.set(String::from("Grace"))?;
//!     last.set(String::from("Hopper"))
//! })?;
//!
//! assert_eq!(*seen.borrow(), vec!["Ada Lovelace", "Grace Hopper"]);
//! # Ok::<(), ripple_core::SignalError>(())
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{Result, SignalError};
pub use reactive::{
    is_tracking, untrack, Cleanup, Computed, InteropSignal, SignalOptions, StoreEq, Subscriber,
    Unsubscriber, Watched, Watcher, Writable,
};

use reactive::Runtime;

/// Create a writable cell with default equality.
pub fn writable<T: StoreEq + Clone + 'static>(value: T) -> Writable<T> {
    Writable::new(value)
}

/// Create a computed value with default equality.
pub fn computed<T, F>(compute: F) -> Computed<T>
where
    T: StoreEq + Clone + 'static,
    F: Fn() -> Result<T> + 'static,
{
    Computed::new(compute)
}

/// Run `f` with subscriber notifications deferred until the outermost
/// batch exits, then flush planned teardowns if configured to.
pub fn batch<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    Runtime::batch(f)
}

/// Check whether a batch is currently open on this thread.
pub fn is_batching() -> bool {
    Runtime::is_batching()
}

/// Tear down nodes planned for deferred teardown that are still unused.
pub fn flush_unused() -> Result<()> {
    Runtime::flush_unused()
}

/// Replace this thread's runtime configuration.
pub fn configure(config: RuntimeConfig) {
    Runtime::configure(config)
}

/// Get a copy of this thread's runtime configuration.
pub fn config() -> RuntimeConfig {
    Runtime::config()
}
