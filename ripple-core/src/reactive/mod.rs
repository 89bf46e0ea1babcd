//! Reactive Primitives
//!
//! This module implements the node kinds of the engine and the machinery
//! that drives them: writable cells, computeds, subscriptions, batching and
//! the interop watcher protocol.
//!
//! # Concepts
//!
//! ## Writables
//!
//! A [`Writable`] is a container for mutable state. Reading it inside a
//! computation registers a dependency; writing a different value marks
//! every dependent dirty.
//!
//! ## Computeds
//!
//! A [`Computed`] is a derived value that caches its result. It is lazy:
//! it only runs when read, and only when one of its dependencies really
//! changed since its last run.
//!
//! ## Subscriptions
//!
//! [`Subscriber`]s are the terminal observers. They receive the current
//! value on subscribe and every distinct value after that, once per batch.
//!
//! # Implementation Notes
//!
//! Dependency tracking uses a thread-local stack of active consumers. When
//! a signal is read we check for an active consumer and, if there is one,
//! give it a link to the signal instead of a bare value.

mod computed;
mod context;
mod equal;
mod interop;
pub(crate) mod runtime;
mod signal;
mod subscriber;
mod tracking;

pub use computed::Computed;
pub use context::{is_tracking, untrack};
pub use equal::{default_equal, StoreEq};
pub use interop::{InteropSignal, Watched, Watcher};
pub use runtime::Runtime;
pub use signal::{Cleanup, OnUse, SignalOptions, Writable};
pub use subscriber::{Subscriber, Unsubscriber};
