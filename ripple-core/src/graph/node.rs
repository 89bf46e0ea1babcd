//! Graph Nodes
//!
//! Identity and state bits shared by every node in the dependency graph,
//! whatever kind of value it holds.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Set of state bits carried by a node.
///
/// | Flag | Meaning |
/// |---|---|
/// | `DIRTY` | cached value may be stale, verify before the next read |
/// | `COMPUTING` | the node is resolving its value right now |
/// | `START_USE_CALLED` | start-of-use ran and end-of-use has not |
/// | `FLUSH_PLANNED` | node sits in the deferred-unuse queue |
/// | `HAS_VISIBLE_ONUSE` | start/stop has side effects observable outside the graph |
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct NodeFlags(u8);

impl NodeFlags {
    pub const NONE: NodeFlags = NodeFlags(0);
    pub const DIRTY: NodeFlags = NodeFlags(1 << 0);
    pub const COMPUTING: NodeFlags = NodeFlags(1 << 1);
    pub const START_USE_CALLED: NodeFlags = NodeFlags(1 << 2);
    pub const FLUSH_PLANNED: NodeFlags = NodeFlags(1 << 3);
    pub const HAS_VISIBLE_ONUSE: NodeFlags = NodeFlags(1 << 4);

    /// Check whether every bit of `other` is set.
    pub fn contains(self, other: NodeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether any bit of `other` is set.
    pub fn intersects(self, other: NodeFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(self, other: NodeFlags) -> NodeFlags {
        NodeFlags(self.0 | other.0)
    }

    pub fn difference(self, other: NodeFlags) -> NodeFlags {
        NodeFlags(self.0 & !other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for NodeFlags {
    type Output = NodeFlags;

    fn bitor(self, rhs: NodeFlags) -> NodeFlags {
        self.union(rhs)
    }
}

impl fmt::Debug for NodeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(NodeFlags, &str); 5] = [
            (NodeFlags::DIRTY, "DIRTY"),
            (NodeFlags::COMPUTING, "COMPUTING"),
            (NodeFlags::START_USE_CALLED, "START_USE_CALLED"),
            (NodeFlags::FLUSH_PLANNED, "FLUSH_PLANNED"),
            (NodeFlags::HAS_VISIBLE_ONUSE, "HAS_VISIBLE_ONUSE"),
        ];
        let mut set = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

/// Type-independent part of a node: identity, flags and the count of
/// transient direct reads currently keeping it in use.
#[derive(Debug)]
pub struct NodeHeader {
    id: NodeId,
    flags: Cell<NodeFlags>,
    extra_usages: Cell<u32>,
}

impl NodeHeader {
    pub fn new(flags: NodeFlags) -> Self {
        Self {
            id: NodeId::new(),
            flags: Cell::new(flags),
            extra_usages: Cell::new(0),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags.get()
    }

    pub fn has(&self, flag: NodeFlags) -> bool {
        self.flags.get().contains(flag)
    }

    pub fn insert(&self, flag: NodeFlags) {
        self.flags.set(self.flags.get().union(flag));
    }

    pub fn remove(&self, flag: NodeFlags) {
        self.flags.set(self.flags.get().difference(flag));
    }

    pub fn extra_usages(&self) -> u32 {
        self.extra_usages.get()
    }

    pub fn acquire_extra_usage(&self) {
        self.extra_usages.set(self.extra_usages.get() + 1);
    }

    /// Returns the remaining count.
    pub fn release_extra_usage(&self) -> u32 {
        let remaining = self.extra_usages.get().saturating_sub(1);
        self.extra_usages.set(remaining);
        remaining
    }
}
