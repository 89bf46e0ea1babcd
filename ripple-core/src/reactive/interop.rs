//! Interop Watcher Protocol
//!
//! A minimal contract for composing this engine with other reactive
//! runtimes. A foreign signal exposes [`InteropSignal::watch_signal`],
//! returning a [`Watcher`] that calls `notify` whenever the signal may
//! have changed. Neither side needs to know the other's internals:
//!
//! - every engine handle implements [`InteropSignal`], so foreign code can
//!   watch a [`Writable`](super::Writable) or [`Computed`](super::Computed),
//! - [`Watched`] turns any foreign [`InteropSignal`] into a producer that
//!   computeds and subscriptions can depend on.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::warn;

use super::context::{self, untrack};
use super::equal::{default_equal, StoreEq};
use super::runtime::Runtime;
use super::subscriber::{self, Subscriber, Unsubscriber};
use super::tracking::{self, read_in_use, UsageTracked};
use crate::error::Result;
use crate::graph::{Consumer, EqualFn, Link, NodeFlags, NodeHeader, NodeId, NodeValue, Producer, StoreCore};

/// Handle on a watched signal.
pub trait Watcher {
    /// Started and not notified since the last `update`.
    fn is_up_to_date(&self) -> bool;

    fn is_started(&self) -> bool;

    /// Pull the signal's value. Returns whether it changed since the last
    /// update, or since the watcher started for the first one. Calling it
    /// again without a notification in between returns false.
    fn update(&self) -> Result<bool>;

    /// Begin delivering notifications.
    fn start(&self);

    fn stop(&self);
}

/// A signal that can be watched through the [`Watcher`] protocol.
pub trait InteropSignal<T> {
    fn watch_signal(&self, notify: Rc<dyn Fn()>) -> Box<dyn Watcher>;

    /// Current value, without registering any dependency.
    fn get_untracked(&self) -> Result<T>;
}

struct WatcherNode<T>
where
    T: Clone + 'static,
{
    link: Rc<Link<T>>,
    notify: Rc<dyn Fn()>,
    started: Cell<bool>,
    dirty: Cell<bool>,
}

impl<T: Clone + 'static> WatcherNode<T> {
    fn refresh(&self) -> Result<bool> {
        self.link.update_producer_value()?;
        self.dirty.set(false);
        if self.link.is_up_to_date() {
            return Ok(false);
        }
        // Value errors stay cached on the producer and surface on read.
        self.link.pull().ok();
        Ok(true)
    }
}

impl<T: Clone + 'static> Consumer for WatcherNode<T> {
    fn mark_dirty(&self) {
        if self.dirty.replace(true) {
            return;
        }
        (self.notify)();
    }
}

/// [`Watcher`] over one of this engine's producers.
struct ProducerWatcher<T>
where
    T: Clone + 'static,
{
    node: Rc<WatcherNode<T>>,
}

impl<T: Clone + 'static> Watcher for ProducerWatcher<T> {
    fn is_up_to_date(&self) -> bool {
        self.node.started.get() && !self.node.dirty.get()
    }

    fn is_started(&self) -> bool {
        self.node.started.get()
    }

    fn update(&self) -> Result<bool> {
        let temporary = !self.is_started();
        if temporary {
            self.start();
        }
        let changed = self.node.refresh();
        if temporary {
            self.stop();
        }
        changed
    }

    fn start(&self) {
        if self.node.started.replace(true) {
            return;
        }
        self.node.dirty.set(true);
        Link::register(&self.node.link);
    }

    fn stop(&self) {
        if !self.node.started.replace(false) {
            return;
        }
        self.node.link.unregister();
    }
}

impl<T: Clone + 'static> Drop for ProducerWatcher<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) fn watch_producer<T: Clone + 'static>(
    producer: Rc<dyn Producer<T>>,
    notify: Rc<dyn Fn()>,
) -> Box<dyn Watcher> {
    let node = Rc::new_cyclic(|this: &Weak<WatcherNode<T>>| {
        let consumer: Weak<dyn Consumer> = this.clone();
        WatcherNode {
            link: Link::new(producer, consumer),
            notify,
            started: Cell::new(false),
            dirty: Cell::new(true),
        }
    });
    Box::new(ProducerWatcher { node })
}

struct WatchedNode<T>
where
    T: Clone + 'static,
{
    core: StoreCore<T>,
    source: Box<dyn InteropSignal<T>>,
    watcher: Box<dyn Watcher>,
    this: Weak<WatchedNode<T>>,
}

impl<T: Clone + 'static> WatchedNode<T> {
    fn mark_dirty(&self) {
        let header = self.core.header();
        if header.has(NodeFlags::DIRTY) {
            return;
        }
        header.insert(NodeFlags::DIRTY);
        self.core.mark_consumers_dirty();
    }
}

impl<T: Clone + 'static> Producer<T> for WatchedNode<T> {
    fn core(&self) -> &StoreCore<T> {
        &self.core
    }

    fn read_untracked(&self) -> Result<T> {
        read_in_use(self, self)
    }

    fn update_value(&self) -> Result<()> {
        tracking::ensure_started(self);
        let header = self.core.header();
        if !header.has(NodeFlags::DIRTY) && self.watcher.is_up_to_date() {
            return Ok(());
        }
        header.remove(NodeFlags::DIRTY);
        let changed = self.watcher.update()?;
        if changed || self.core.is_unset() {
            let value = untrack(|| self.source.get_untracked());
            self.core.set(value.into())?;
        }
        Ok(())
    }

    fn check_unused(&self) {
        tracking::check_unused(self);
    }
}

impl<T: Clone + 'static> UsageTracked for WatchedNode<T> {
    fn header(&self) -> &NodeHeader {
        self.core.header()
    }

    fn consumer_count(&self) -> usize {
        self.core.consumer_count()
    }

    fn start_use(&self) {
        self.watcher.start();
        self.core.header().insert(NodeFlags::DIRTY);
    }

    fn end_use(&self) {
        self.watcher.stop();
    }

    fn as_rc(&self) -> Option<Rc<dyn UsageTracked>> {
        let node: Rc<WatchedNode<T>> = self.this.upgrade()?;
        Some(node)
    }
}

/// A foreign signal wrapped as a producer of this engine.
///
/// The foreign watcher is started while the wrapper is observed and
/// stopped through the flush of unused stores afterwards.
pub struct Watched<T>
where
    T: Clone + 'static,
{
    node: Rc<WatchedNode<T>>,
}

impl<T: StoreEq + Clone + 'static> Watched<T> {
    pub fn new(source: impl InteropSignal<T> + 'static) -> Self {
        Self::with_equal_fn(Box::new(source), default_equal())
    }
}

impl<T: Clone + 'static> Watched<T> {
    pub fn with_equal(
        source: impl InteropSignal<T> + 'static,
        equal: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        Self::with_equal_fn(Box::new(source), Rc::new(equal))
    }

    fn with_equal_fn(source: Box<dyn InteropSignal<T>>, equal: EqualFn<T>) -> Self {
        let node = Rc::new_cyclic(|this: &Weak<WatchedNode<T>>| {
            let weak = this.clone();
            let notify: Rc<dyn Fn()> = Rc::new(move || {
                let Some(node) = weak.upgrade() else {
                    return;
                };
                let marked = Runtime::propagate(|| {
                    node.mark_dirty();
                    Ok(())
                });
                if let Err(err) = marked {
                    warn!(%err, "propagating a foreign signal change failed");
                }
            });
            let watcher = source.watch_signal(notify);
            WatchedNode {
                core: StoreCore::new(
                    NodeValue::Unset,
                    equal,
                    NodeFlags::DIRTY | NodeFlags::HAS_VISIBLE_ONUSE,
                ),
                source,
                watcher,
                this: this.clone(),
            }
        });
        Self { node }
    }

    pub fn id(&self) -> NodeId {
        self.node.core.header().id()
    }

    pub fn get(&self) -> Result<T> {
        context::read(&self.producer())
    }

    pub fn get_untracked(&self) -> Result<T> {
        untrack(|| self.get())
    }

    pub fn subscribe(&self, subscriber: impl Subscriber<T> + 'static) -> Result<Unsubscriber> {
        subscriber::subscribe(self.producer(), Box::new(subscriber))
    }

    pub fn is_watching(&self) -> bool {
        self.node.watcher.is_started()
    }

    pub(crate) fn producer(&self) -> Rc<dyn Producer<T>> {
        self.node.clone()
    }
}

impl<T: Clone + 'static> Clone for Watched<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<T: Clone + 'static> InteropSignal<T> for Watched<T> {
    fn watch_signal(&self, notify: Rc<dyn Fn()>) -> Box<dyn Watcher> {
        watch_producer(self.producer(), notify)
    }

    fn get_untracked(&self) -> Result<T> {
        Watched::get_untracked(self)
    }
}

impl<T: Clone + 'static> fmt::Debug for Watched<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watched")
            .field("id", &self.id())
            .field("flags", &self.node.core.header().flags())
            .field("watching", &self.is_watching())
            .finish()
    }
}
