//! Dependency Graph
//!
//! The structural substrate of the engine: node identity and flags, the
//! producer/consumer [`Link`] edge, the [`StoreCore`] every value-holding
//! node is built on, and the notification queue drained at the end of a
//! batch.
//!
//! # Overview
//!
//! The graph is not stored centrally. Each node owns the edges to its
//! producers (a computed keeps an ordered list, a subscription keeps one),
//! and each producer keeps a back-reference list of the links pointing at
//! it so a write can walk its consumers:
//!
//! ```text
//!   Writable ──link──▶ Computed ──link──▶ Subscription
//!      ▲  consumers[]      ▲  consumers[]
//!      └── back-refs ──────┘
//! ```
//!
//! A write bumps the producer's version and marks consumers dirty. Dirty
//! computeds propagate further without running; subscriptions enqueue
//! themselves into the [`NotifyQueue`] and resolve when the batch ends.

mod link;
mod node;
mod queue;
mod store;

pub use link::{ErasedLink, Link};
pub use node::{NodeFlags, NodeHeader, NodeId};
pub use queue::{Notify, NotifyQueue};
pub use store::{Consumer, EqualFn, NodeValue, Producer, StoreCore};
