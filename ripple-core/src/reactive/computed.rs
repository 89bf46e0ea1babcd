//! Computed Signals
//!
//! A [`Computed`] is a cached derived value. Its dependencies are whatever
//! signals the compute function reads, rediscovered on every run.
//!
//! # How Computeds Work
//!
//! 1. A computed is inert until something observes it: creating one runs
//!    nothing, and it never runs while unobserved, whatever its inputs do.
//!
//! 2. When a producer changes, the computed is marked dirty and passes the
//!    mark on to its own consumers without running.
//!
//! 3. On the next read it walks its producer links in the order they were
//!    recorded, bringing each producer up to date. If every producer turns
//!    out unchanged, the computed is clean again without running. This is
//!    what keeps a diamond from recomputing its join twice, or at all when
//!    both branches end up with their previous values.
//!
//! 4. Otherwise the function runs under a fresh tracking context. Links the
//!    run did not touch are dropped, so a branch that stops reading a
//!    signal also stops depending on it.
//!
//! A failing compute function caches the error. Readers get it back until
//! a producer really changes.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::{trace, warn};

use super::context::{self, untrack, ActiveConsumer, ReactiveContext};
use super::equal::{default_equal, StoreEq};
use super::interop::{watch_producer, InteropSignal, Watcher};
use super::runtime::Runtime;
use super::subscriber::{self, Subscriber, Unsubscriber};
use super::tracking::{self, read_in_use, UsageTracked};
use crate::error::{Result, SignalError};
use crate::graph::{
    Consumer, EqualFn, ErasedLink, NodeFlags, NodeHeader, NodeId, NodeValue, Producer, StoreCore,
};

type ProducerLinks = SmallVec<[Rc<dyn ErasedLink>; 4]>;

struct ComputedNode<T>
where
    T: Clone + 'static,
{
    core: StoreCore<T>,
    compute: Box<dyn Fn() -> Result<T>>,
    /// Producers read by the last run, in read order.
    producer_links: RefCell<ProducerLinks>,
    /// Cursor into `producer_links` while the function runs.
    producer_index: Cell<usize>,
    this: Weak<ComputedNode<T>>,
}

impl<T: Clone + 'static> ComputedNode<T> {
    fn is_started(&self) -> bool {
        self.core.header().has(NodeFlags::START_USE_CALLED)
    }

    fn are_producers_up_to_date(&self) -> Result<bool> {
        if self.core.is_unset() {
            return Ok(false);
        }
        let links: ProducerLinks = self.producer_links.borrow().clone();
        for link in &links {
            if !link.refresh()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn recompute(&self) -> Result<()> {
        let header = self.core.header();
        self.producer_index.set(0);
        header.remove(NodeFlags::HAS_VISIBLE_ONUSE);

        let value = {
            let consumer: Weak<dyn ActiveConsumer> = self.this.clone();
            let _ctx = ReactiveContext::enter(Some(consumer));
            (self.compute)()
        };
        self.prune_links();
        self.core.set(value.into())?;
        Ok(())
    }

    /// Drop links past the cursor: producers the last run did not read.
    fn prune_links(&self) {
        let stale: ProducerLinks = {
            let mut links = self.producer_links.borrow_mut();
            let keep = self.producer_index.get();
            if links.len() <= keep {
                return;
            }
            links.drain(keep..).collect()
        };
        trace!(
            node = self.core.header().id().raw(),
            dropped = stale.len(),
            "pruning stale producer links"
        );
        if self.is_started() {
            for link in &stale {
                link.unregister();
            }
        }
    }
}

impl<T: Clone + 'static> Producer<T> for ComputedNode<T> {
    fn core(&self) -> &StoreCore<T> {
        &self.core
    }

    fn read_untracked(&self) -> Result<T> {
        read_in_use(self, self)
    }

    fn update_value(&self) -> Result<()> {
        let header = self.core.header();
        if header.has(NodeFlags::COMPUTING) {
            return Err(SignalError::CircularDependency);
        }
        tracking::ensure_started(self);
        if !header.has(NodeFlags::DIRTY) {
            return Ok(());
        }

        header.insert(NodeFlags::COMPUTING);
        let _computing = Computing(header);
        let limit = Runtime::max_change_rounds();
        untrack(|| -> Result<()> {
            let mut rounds = 0usize;
            while !self.are_producers_up_to_date()? {
                rounds += 1;
                if rounds > limit {
                    warn!(
                        node = header.id().raw(),
                        limit, "computed signal still dirty after maximum change rounds"
                    );
                    self.core
                        .set(NodeValue::Errored(SignalError::MaxChangeRounds { limit }))?;
                    break;
                }
                self.recompute()?;
            }
            if rounds > 1 {
                trace!(node = header.id().raw(), rounds, "computed settled");
            }
            Ok(())
        })?;
        header.remove(NodeFlags::DIRTY);
        Ok(())
    }

    fn check_unused(&self) {
        tracking::check_unused(self);
    }
}

/// Clears COMPUTING when the update ends, including by unwinding.
struct Computing<'a>(&'a NodeHeader);

impl Drop for Computing<'_> {
    fn drop(&mut self) {
        self.0.remove(NodeFlags::COMPUTING);
    }
}

impl<T: Clone + 'static> Consumer for ComputedNode<T> {
    fn mark_dirty(&self) {
        let header = self.core.header();
        if header.has(NodeFlags::DIRTY) {
            return;
        }
        header.insert(NodeFlags::DIRTY);
        self.core.mark_consumers_dirty();
    }
}

impl<T: Clone + 'static> ActiveConsumer for ComputedNode<T> {
    fn link_at_cursor(&self) -> Option<Rc<dyn ErasedLink>> {
        self.producer_links
            .borrow()
            .get(self.producer_index.get())
            .cloned()
    }

    fn advance_cursor(&self) {
        self.producer_index.set(self.producer_index.get() + 1);
    }

    fn install_link(&self, link: Rc<dyn ErasedLink>) {
        let mut links = self.producer_links.borrow_mut();
        let index = self.producer_index.get();
        if index < links.len() {
            let displaced = std::mem::replace(&mut links[index], link);
            links.push(displaced);
        } else {
            links.push(link);
        }
        self.producer_index.set(index + 1);
    }

    fn consumer_weak(&self) -> Weak<dyn Consumer> {
        self.this.clone()
    }

    fn is_started(&self) -> bool {
        ComputedNode::is_started(self)
    }

    fn mark_visible_on_use(&self) {
        self.core.header().insert(NodeFlags::HAS_VISIBLE_ONUSE);
    }

    fn discard_last_link(&self) {
        let index = self.producer_index.get();
        if index == 0 {
            return;
        }
        let link = self.producer_links.borrow_mut().remove(index - 1);
        self.producer_index.set(index - 1);
        if self.is_started() {
            link.unregister();
        }
    }
}

impl<T: Clone + 'static> UsageTracked for ComputedNode<T> {
    fn header(&self) -> &NodeHeader {
        self.core.header()
    }

    fn consumer_count(&self) -> usize {
        self.core.consumer_count()
    }

    fn start_use(&self) {
        let links: ProducerLinks = self.producer_links.borrow().clone();
        for link in links {
            link.register();
        }
        // Notifications were missed while stopped.
        self.core.header().insert(NodeFlags::DIRTY);
    }

    fn end_use(&self) {
        let links: ProducerLinks = self.producer_links.borrow().clone();
        for link in &links {
            link.unregister();
        }
    }

    fn as_rc(&self) -> Option<Rc<dyn UsageTracked>> {
        let node: Rc<ComputedNode<T>> = self.this.upgrade()?;
        Some(node)
    }
}

/// A derived value recomputed from the signals its function reads.
///
/// # Example
///
/// ```
/// use ripple_core::{Computed, Writable};
///
/// let count = Writable::new(2);
/// let doubled = Computed::new({
///     let count = count.clone();
///     move || Ok(count.get()? * 2)
/// });
///
/// assert_eq!(doubled.get().unwrap(), 4);
/// count.set(5).unwrap();
/// assert_eq!(doubled.get().unwrap(), 10);
/// ```
pub struct Computed<T>
where
    T: Clone + 'static,
{
    node: Rc<ComputedNode<T>>,
}

impl<T: StoreEq + Clone + 'static> Computed<T> {
    pub fn new(compute: impl Fn() -> Result<T> + 'static) -> Self {
        Self::with_equal_fn(compute, default_equal())
    }
}

impl<T: Clone + 'static> Computed<T> {
    /// Computed with a custom equality deciding whether a new result is a
    /// change.
    pub fn with_equal(
        compute: impl Fn() -> Result<T> + 'static,
        equal: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        Self::with_equal_fn(compute, Rc::new(equal))
    }

    fn with_equal_fn(compute: impl Fn() -> Result<T> + 'static, equal: EqualFn<T>) -> Self {
        let node = Rc::new_cyclic(|this| ComputedNode {
            core: StoreCore::new(NodeValue::Unset, equal, NodeFlags::DIRTY),
            compute: Box::new(compute),
            producer_links: RefCell::new(SmallVec::new()),
            producer_index: Cell::new(0),
            this: this.clone(),
        });
        Self { node }
    }

    pub fn id(&self) -> NodeId {
        self.node.core.header().id()
    }

    /// Read the value, recomputing if needed. Inside another computation
    /// this registers a dependency.
    pub fn get(&self) -> Result<T> {
        context::read(&self.producer())
    }

    pub fn get_untracked(&self) -> Result<T> {
        untrack(|| self.get())
    }

    pub fn subscribe(&self, subscriber: impl Subscriber<T> + 'static) -> Result<Unsubscriber> {
        subscriber::subscribe(self.producer(), Box::new(subscriber))
    }

    /// Number of producers recorded by the last run.
    pub fn dependency_count(&self) -> usize {
        self.node.producer_links.borrow().len()
    }

    pub fn is_dirty(&self) -> bool {
        self.node.core.header().has(NodeFlags::DIRTY)
    }

    pub fn is_started(&self) -> bool {
        self.node.is_started()
    }

    pub(crate) fn producer(&self) -> Rc<dyn Producer<T>> {
        self.node.clone()
    }
}

impl<T: Clone + 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<T: Clone + 'static> InteropSignal<T> for Computed<T> {
    fn watch_signal(&self, notify: Rc<dyn Fn()>) -> Box<dyn Watcher> {
        watch_producer(self.producer(), notify)
    }

    fn get_untracked(&self) -> Result<T> {
        Computed::get_untracked(self)
    }
}

impl<T: Clone + 'static> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.id())
            .field("flags", &self.node.core.header().flags())
            .field("dependency_count", &self.dependency_count())
            .field("consumers", &self.node.core.consumer_count())
            .finish()
    }
}
