//! Producer/Consumer Links
//!
//! A [`Link`] is the edge between exactly one producer and one consumer. The
//! consumer creates and owns it; while registered, the producer keeps a
//! back-reference in its consumer list so it can propagate dirtiness.
//!
//! Besides the two endpoints, a link remembers what the consumer last saw:
//! the producer's version at that moment and a copy of the value. This is
//! what lets a consumer ask "did this producer really change since I last
//! looked?" without recomputing anything.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::node::{NodeFlags, NodeId};
use super::store::{Consumer, NodeValue, Producer};
use crate::error::Result;

/// Edge from a producer of `T` to one consumer.
pub struct Link<T>
where
    T: Clone + 'static,
{
    producer: Rc<dyn Producer<T>>,
    consumer: Weak<dyn Consumer>,
    /// Value observed at `version`.
    pub(crate) value: RefCell<NodeValue<T>>,
    /// Producer version at the last observation; `None` until first pulled.
    pub(crate) version: Cell<Option<u64>>,
    /// Slot in the producer's consumer list, for O(1) swap-removal.
    pub(crate) index_in_producer: Cell<usize>,
    /// Set while the consumer itself is pulling the producer.
    skip_mark_dirty: Cell<bool>,
}

impl<T: Clone + 'static> Link<T> {
    /// Create an unregistered link.
    pub fn new(producer: Rc<dyn Producer<T>>, consumer: Weak<dyn Consumer>) -> Rc<Self> {
        Rc::new(Self {
            producer,
            consumer,
            value: RefCell::new(NodeValue::Unset),
            version: Cell::new(None),
            index_in_producer: Cell::new(0),
            skip_mark_dirty: Cell::new(false),
        })
    }

    pub fn producer(&self) -> &Rc<dyn Producer<T>> {
        &self.producer
    }

    pub fn consumer(&self) -> Option<Rc<dyn Consumer>> {
        self.consumer.upgrade()
    }

    pub fn skips_mark_dirty(&self) -> bool {
        self.skip_mark_dirty.get()
    }

    /// Add this link to the producer's consumer list.
    pub fn register(self: &Rc<Self>) {
        self.producer.register_consumer(self);
    }

    /// Remove this link from the producer's consumer list.
    pub fn unregister(&self) {
        self.producer.unregister_consumer(self);
    }

    /// Bring the producer up to date without letting that pull mark this
    /// link's own consumer dirty.
    pub fn update_producer_value(&self) -> Result<()> {
        let _skip = SkipMarkDirty::engage(&self.skip_mark_dirty);
        self.producer.update_value()
    }

    /// Check whether the producer's current value is equal to the one this
    /// link last observed.
    pub fn is_up_to_date(&self) -> bool {
        self.producer.is_link_up_to_date(self)
    }

    /// Record the producer's current value on this link and return it.
    pub fn pull(&self) -> Result<T> {
        self.producer.update_link(self)
    }
}

impl<T: Clone + 'static> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("producer", &self.producer.node_id())
            .field("version", &self.version.get())
            .field("index_in_producer", &self.index_in_producer.get())
            .field("skip_mark_dirty", &self.skip_mark_dirty.get())
            .finish()
    }
}

/// Resets `skip_mark_dirty` even when the pull fails or unwinds.
struct SkipMarkDirty<'a>(&'a Cell<bool>);

impl<'a> SkipMarkDirty<'a> {
    fn engage(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for SkipMarkDirty<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// A link seen from the consumer side without knowing the producer's value
/// type. Computed nodes keep their heterogeneous producer list as
/// `Rc<dyn ErasedLink>`.
pub trait ErasedLink {
    fn producer_id(&self) -> NodeId;

    fn producer_flags(&self) -> NodeFlags;

    fn register(self: Rc<Self>);

    fn unregister(&self);

    /// Pull the producer and report whether this link is still up to date.
    fn refresh(&self) -> Result<bool>;

    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<T: Clone + 'static> ErasedLink for Link<T> {
    fn producer_id(&self) -> NodeId {
        self.producer.node_id()
    }

    fn producer_flags(&self) -> NodeFlags {
        self.producer.core().header().flags()
    }

    fn register(self: Rc<Self>) {
        self.producer.register_consumer(&self);
    }

    fn unregister(&self) {
        Link::unregister(self);
    }

    fn refresh(&self) -> Result<bool> {
        self.update_producer_value()?;
        Ok(self.is_up_to_date())
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}
