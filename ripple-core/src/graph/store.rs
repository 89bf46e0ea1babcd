//! Store Core
//!
//! [`StoreCore`] is the substrate every signal node is built on: the cached
//! value, a version counter, the equality check, and the list of consumer
//! links. The node kinds (writable cell, computed, watched foreign signal)
//! compose a core and add their own behaviour through the [`Producer`]
//! trait.
//!
//! # Versions and the equality memo
//!
//! The version is bumped only when a write is rejected by the equality
//! check, i.e. when the value really changed. A link that observed version
//! `v` is therefore:
//!
//! - up to date when `v` is the current version,
//! - stale when `v` is exactly one behind (a real change happened since),
//! - otherwise unknown: several changes happened and the value may have
//!   come back. That case compares the link's recorded value with the
//!   current one, and memoizes the answer per observed version so that many
//!   stale consumers reconciling against the same new value cost one
//!   comparison each version rather than one each consumer.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use smallvec::SmallVec;

use super::link::Link;
use super::node::{NodeFlags, NodeHeader, NodeId};
use crate::error::{Result, SignalError};
use crate::reactive::runtime::{NotificationPhase, Runtime};

/// Equality check used to decide whether a write is a real change.
pub type EqualFn<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// The value slot of a node.
///
/// `Unset` and `Errored` never compare equal to anything, themselves
/// included, so a node holding either is always considered changed.
#[derive(Debug, Clone)]
pub enum NodeValue<T> {
    /// Never computed.
    Unset,
    /// The last computation failed with this error.
    Errored(SignalError),
    Ready(T),
}

impl<T> NodeValue<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, NodeValue::Unset)
    }
}

impl<T> From<Result<T>> for NodeValue<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => NodeValue::Ready(value),
            Err(err) => NodeValue::Errored(err),
        }
    }
}

/// Anything that can be marked dirty by a producer.
pub trait Consumer {
    fn mark_dirty(&self);
}

/// A node that other nodes can depend on.
///
/// The provided methods implement plain writable-cell behaviour on top of
/// [`Producer::core`]; node kinds override what they need.
pub trait Producer<T>: 'static
where
    T: Clone + 'static,
{
    fn core(&self) -> &StoreCore<T>;

    /// Read the value outside of any tracking context.
    fn read_untracked(&self) -> Result<T>;

    fn node_id(&self) -> NodeId {
        self.core().header().id()
    }

    /// Bring the cached value up to date.
    fn update_value(&self) -> Result<()> {
        Ok(())
    }

    /// Called when the last consumer link is removed.
    fn check_unused(&self) {}

    fn register_consumer(&self, link: &Rc<Link<T>>) {
        self.core().add_consumer(link);
    }

    fn unregister_consumer(&self, link: &Link<T>) {
        if self.core().remove_consumer(link) {
            self.check_unused();
        }
    }

    fn is_link_up_to_date(&self, link: &Link<T>) -> bool {
        self.core().is_link_up_to_date(link)
    }

    fn update_link(&self, link: &Link<T>) -> Result<T> {
        self.core().update_link(link)
    }
}

/// Value, version, equality and consumer list of one node.
pub struct StoreCore<T>
where
    T: Clone + 'static,
{
    header: NodeHeader,
    value: RefCell<NodeValue<T>>,
    version: Cell<u64>,
    equal: EqualFn<T>,
    /// Observed version -> "was that version's value equal to the current one".
    equal_cache: RefCell<HashMap<u64, bool>>,
    consumers: RefCell<Vec<Rc<Link<T>>>>,
}

impl<T: Clone + 'static> StoreCore<T> {
    pub fn new(value: NodeValue<T>, equal: EqualFn<T>, flags: NodeFlags) -> Self {
        Self {
            header: NodeHeader::new(flags),
            value: RefCell::new(value),
            version: Cell::new(0),
            equal,
            equal_cache: RefCell::new(HashMap::new()),
            consumers: RefCell::new(Vec::new()),
        }
    }

    pub fn header(&self) -> &NodeHeader {
        &self.header
    }

    pub fn version(&self) -> u64 {
        self.version.get()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.borrow().len()
    }

    pub fn is_unset(&self) -> bool {
        self.value.borrow().is_unset()
    }

    /// Clone the cached value out, surfacing a cached error.
    pub fn read(&self) -> Result<T> {
        match &*self.value.borrow() {
            NodeValue::Ready(value) => Ok(value.clone()),
            NodeValue::Errored(err) => Err(err.clone()),
            NodeValue::Unset => panic!("assert failed: store value read before it was set"),
        }
    }

    pub fn equal(&self, a: &NodeValue<T>, b: &NodeValue<T>) -> bool {
        match (a, b) {
            (NodeValue::Ready(a), NodeValue::Ready(b)) => (self.equal)(a, b),
            _ => false,
        }
    }

    /// Store `value` if it differs from the current one, then propagate
    /// dirtiness to consumers inside a batch.
    ///
    /// Returns whether the value changed.
    pub fn set(&self, value: NodeValue<T>) -> Result<bool> {
        if self.equal(&self.value.borrow(), &value) {
            return Ok(false);
        }
        Runtime::propagate(|| {
            self.replace(value);
            self.mark_consumers_dirty();
            Ok(())
        })?;
        Ok(true)
    }

    fn replace(&self, value: NodeValue<T>) {
        *self.value.borrow_mut() = value;
        self.version.set(self.version.get() + 1);
        self.equal_cache.borrow_mut().clear();
    }

    /// Mark every registered consumer dirty, except those currently pulling
    /// this node.
    pub fn mark_consumers_dirty(&self) {
        // Snapshot first: a consumer reacting to `mark_dirty` may unregister
        // itself.
        let links: SmallVec<[Rc<Link<T>>; 8]> = self.consumers.borrow().iter().cloned().collect();
        if links.is_empty() {
            return;
        }
        let _phase = NotificationPhase::enter();
        for link in links {
            if link.skips_mark_dirty() {
                continue;
            }
            if let Some(consumer) = link.consumer() {
                consumer.mark_dirty();
            }
        }
    }

    pub fn add_consumer(&self, link: &Rc<Link<T>>) {
        let mut consumers = self.consumers.borrow_mut();
        link.index_in_producer.set(consumers.len());
        consumers.push(Rc::clone(link));
        drop(consumers);

        if self.header.has(NodeFlags::FLUSH_PLANNED) {
            Runtime::cancel_flush(self.header.id());
            self.header.remove(NodeFlags::FLUSH_PLANNED);
        }
    }

    /// Swap-remove `link`. Returns true when no consumer is left.
    pub fn remove_consumer(&self, link: &Link<T>) -> bool {
        let mut consumers = self.consumers.borrow_mut();
        let index = link.index_in_producer.get();
        assert!(
            consumers
                .get(index)
                .is_some_and(|registered| std::ptr::eq(Rc::as_ptr(registered), link)),
            "assert failed: invalid index_in_producer"
        );
        consumers.swap_remove(index);
        if let Some(moved) = consumers.get(index) {
            moved.index_in_producer.set(index);
        }
        consumers.is_empty()
    }

    pub fn is_link_up_to_date(&self, link: &Link<T>) -> bool {
        let version = self.version.get();
        let observed = match link.version.get() {
            None => return false,
            Some(observed) if observed == version => return true,
            Some(observed) if observed + 1 == version => return false,
            Some(observed) => observed,
        };

        if let Some(&same) = self.equal_cache.borrow().get(&observed) {
            return same;
        }
        let same = self.equal(&link.value.borrow(), &self.value.borrow());
        self.equal_cache.borrow_mut().insert(observed, same);
        same
    }

    pub fn update_link(&self, link: &Link<T>) -> Result<T> {
        link.version.set(Some(self.version.get()));
        *link.value.borrow_mut() = self.value.borrow().clone();
        self.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(value: i32) -> StoreCore<i32> {
        StoreCore::new(NodeValue::Ready(value), Rc::new(|a, b| a == b), NodeFlags::NONE)
    }

    #[test]
    fn set_bumps_version_only_on_change() {
        let core = core(1);
        assert!(!core.set(NodeValue::Ready(1)).unwrap());
        assert_eq!(core.version(), 0);

        assert!(core.set(NodeValue::Ready(2)).unwrap());
        assert_eq!(core.version(), 1);
        assert_eq!(core.read().unwrap(), 2);
    }

    #[test]
    fn special_values_never_compare_equal() {
        let core = core(1);
        assert!(!core.equal(&NodeValue::Unset, &NodeValue::Unset));
        let err = SignalError::msg("x");
        assert!(!core.equal(&NodeValue::Errored(err.clone()), &NodeValue::Errored(err)));
        assert!(core.equal(&NodeValue::Ready(1), &NodeValue::Ready(1)));
    }

    #[test]
    fn errored_value_is_returned_on_read() {
        let core = core(1);
        core.set(NodeValue::Errored(SignalError::msg("bad"))).unwrap();
        assert_eq!(core.read().unwrap_err().to_string(), "bad");
    }

    #[test]
    fn result_converts_into_node_value() {
        let ok: NodeValue<i32> = Ok(4).into();
        assert!(matches!(ok, NodeValue::Ready(4)));
        let err: NodeValue<i32> = Err(SignalError::CircularDependency).into();
        assert!(matches!(err, NodeValue::Errored(SignalError::CircularDependency)));
    }
}
