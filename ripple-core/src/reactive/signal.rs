//! Writable Signals
//!
//! A [`Writable`] is the fundamental reactive primitive: a mutable cell
//! holding a value that computeds and subscriptions depend on.
//!
//! # How Writables Work
//!
//! 1. Reading inside a computation gives the computation a link to the cell
//!    instead of a plain value.
//!
//! 2. A write that the cell's equality rejects as "no change" is ignored.
//!
//! 3. Any other write bumps the version and marks every consumer dirty.
//!    Subscriptions are told after the enclosing batch ends.
//!
//! # Start/Stop Hook
//!
//! A cell can be given an `on_use` hook through [`SignalOptions`]. It runs
//! when the cell gets its first observer and may return a cleanup closure
//! that runs once the last observer is gone. Hooks are treated as visible
//! side effects, so the cleanup waits for the next flush of unused stores.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::context::{self, untrack};
use super::equal::{default_equal, StoreEq};
use super::interop::{watch_producer, InteropSignal, Watcher};
use super::runtime::Runtime;
use super::subscriber::{self, Subscriber, Unsubscriber};
use super::tracking::{self, read_in_use, UsageTracked};
use crate::error::Result;
use crate::graph::{EqualFn, NodeFlags, NodeHeader, NodeId, NodeValue, Producer, StoreCore};

/// Cleanup returned by an on-use hook.
pub type Cleanup = Box<dyn FnOnce()>;

/// Hook run when a cell gets its first observer.
pub type OnUse<T> = Rc<dyn Fn(&Writable<T>) -> Option<Cleanup>>;

/// Options for [`Writable::with_options`].
pub struct SignalOptions<T>
where
    T: Clone + 'static,
{
    equal: EqualFn<T>,
    on_use: Option<OnUse<T>>,
}

impl<T: StoreEq + Clone + 'static> SignalOptions<T> {
    /// Default equality, no hook.
    pub fn new() -> Self {
        Self {
            equal: default_equal(),
            on_use: None,
        }
    }
}

impl<T: StoreEq + Clone + 'static> Default for SignalOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> SignalOptions<T> {
    /// Options with a custom equality, for types without [`StoreEq`].
    pub fn with_equal(equal: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            equal: Rc::new(equal),
            on_use: None,
        }
    }

    pub fn equal(mut self, equal: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.equal = Rc::new(equal);
        self
    }

    /// Run `hook` on the first observer; its cleanup runs once the cell is
    /// unused again.
    pub fn on_use(mut self, hook: impl Fn(&Writable<T>) -> Option<Cleanup> + 'static) -> Self {
        self.on_use = Some(Rc::new(hook));
        self
    }
}

struct WritableNode<T>
where
    T: Clone + 'static,
{
    core: StoreCore<T>,
    on_use: Option<OnUse<T>>,
    cleanup: RefCell<Option<Cleanup>>,
    this: Weak<WritableNode<T>>,
}

impl<T: Clone + 'static> WritableNode<T> {
    fn is_tracked(&self) -> bool {
        self.on_use.is_some()
    }
}

impl<T: Clone + 'static> Producer<T> for WritableNode<T> {
    fn core(&self) -> &StoreCore<T> {
        &self.core
    }

    fn read_untracked(&self) -> Result<T> {
        if self.is_tracked() {
            read_in_use(self, self)
        } else {
            self.core.read()
        }
    }

    fn update_value(&self) -> Result<()> {
        if self.is_tracked() {
            tracking::ensure_started(self);
        }
        Ok(())
    }

    fn check_unused(&self) {
        if self.is_tracked() {
            tracking::check_unused(self);
        }
    }
}

impl<T: Clone + 'static> UsageTracked for WritableNode<T> {
    fn header(&self) -> &NodeHeader {
        self.core.header()
    }

    fn consumer_count(&self) -> usize {
        self.core.consumer_count()
    }

    fn start_use(&self) {
        let (Some(hook), Some(node)) = (self.on_use.clone(), self.this.upgrade()) else {
            return;
        };
        let cleanup = hook(&Writable { node });
        *self.cleanup.borrow_mut() = cleanup;
    }

    fn end_use(&self) {
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }

    fn as_rc(&self) -> Option<Rc<dyn UsageTracked>> {
        let node: Rc<WritableNode<T>> = self.this.upgrade()?;
        Some(node)
    }
}

/// A mutable reactive cell.
///
/// # Example
///
/// ```
/// use ripple_core::Writable;
///
/// let count = Writable::new(0);
/// count.set(5).unwrap();
/// count.update(|n| n + 1).unwrap();
/// assert_eq!(count.get().unwrap(), 6);
/// ```
pub struct Writable<T>
where
    T: Clone + 'static,
{
    node: Rc<WritableNode<T>>,
}

impl<T: StoreEq + Clone + 'static> Writable<T> {
    pub fn new(value: T) -> Self {
        Self::with_options(value, SignalOptions::new())
    }
}

impl<T: Clone + 'static> Writable<T> {
    pub fn with_options(value: T, options: SignalOptions<T>) -> Self {
        let flags = if options.on_use.is_some() {
            NodeFlags::HAS_VISIBLE_ONUSE
        } else {
            NodeFlags::NONE
        };
        let node = Rc::new_cyclic(|this| WritableNode {
            core: StoreCore::new(NodeValue::Ready(value), options.equal, flags),
            on_use: options.on_use,
            cleanup: RefCell::new(None),
            this: this.clone(),
        });
        Self { node }
    }

    pub fn id(&self) -> NodeId {
        self.node.core.header().id()
    }

    /// Number of real changes so far.
    pub fn version(&self) -> u64 {
        self.node.core.version()
    }

    /// Read the value, registering a dependency inside a computation.
    pub fn get(&self) -> Result<T> {
        context::read(&self.producer())
    }

    pub fn get_untracked(&self) -> Result<T> {
        untrack(|| self.get())
    }

    /// Store `value` unless it equals the current one.
    pub fn set(&self, value: T) -> Result<()> {
        Runtime::check_not_in_notification_phase()?;
        self.node.core.set(NodeValue::Ready(value))?;
        Ok(())
    }

    /// Set the value computed from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let current = self.get_untracked()?;
        self.set(f(&current))
    }

    pub fn subscribe(&self, subscriber: impl Subscriber<T> + 'static) -> Result<Unsubscriber> {
        subscriber::subscribe(self.producer(), Box::new(subscriber))
    }

    pub(crate) fn producer(&self) -> Rc<dyn Producer<T>> {
        self.node.clone()
    }
}

impl<T: Clone + 'static> Clone for Writable<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<T: Clone + 'static> InteropSignal<T> for Writable<T> {
    fn watch_signal(&self, notify: Rc<dyn Fn()>) -> Box<dyn Watcher> {
        watch_producer(self.producer(), notify)
    }

    fn get_untracked(&self) -> Result<T> {
        Writable::get_untracked(self)
    }
}

impl<T: Clone + 'static> fmt::Debug for Writable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writable")
            .field("id", &self.id())
            .field("version", &self.version())
            .field("consumers", &self.node.core.consumer_count())
            .field("flags", &self.node.core.header().flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SignalError;
    use std::cell::Cell;

    #[test]
    fn equal_write_does_not_bump_version() {
        let signal = Writable::new(1);
        signal.set(1).unwrap();
        assert_eq!(signal.version(), 0);
        signal.set(2).unwrap();
        assert_eq!(signal.version(), 1);
    }

    #[test]
    fn nan_write_is_ignored() {
        let signal = Writable::new(f64::NAN);
        signal.set(f64::NAN).unwrap();
        assert_eq!(signal.version(), 0);
    }

    #[test]
    fn vec_write_always_changes() {
        let signal = Writable::new(vec![1]);
        signal.set(vec![1]).unwrap();
        assert_eq!(signal.version(), 1);
    }

    #[test]
    fn custom_equality() {
        #[derive(Clone)]
        struct Point {
            x: i32,
            _label: &'static str,
        }

        let signal = Writable::with_options(
            Point { x: 1, _label: "a" },
            SignalOptions::with_equal(|a: &Point, b: &Point| a.x == b.x),
        );
        signal.set(Point { x: 1, _label: "b" }).unwrap();
        assert_eq!(signal.version(), 0);
        signal.set(Point { x: 2, _label: "b" }).unwrap();
        assert_eq!(signal.version(), 1);
    }

    #[test]
    fn update_applies_to_current_value() {
        let signal = Writable::new(String::from("a"));
        signal.update(|s| format!("{s}b")).unwrap();
        assert_eq!(signal.get().unwrap(), "ab");
    }

    #[test]
    fn on_use_hook_runs_for_first_observer_and_cleans_up_on_flush() {
        let started = Rc::new(Cell::new(0));
        let stopped = Rc::new(Cell::new(0));
        let (s, t) = (started.clone(), stopped.clone());

        let signal = Writable::with_options(
            0,
            SignalOptions::new().on_use(move |_: &Writable<i32>| {
                s.set(s.get() + 1);
                let t = t.clone();
                Some(Box::new(move || t.set(t.get() + 1)) as Cleanup)
            }),
        );
        assert_eq!(started.get(), 0);

        let first = signal.subscribe(|_: &i32| {}).unwrap();
        let second = signal.subscribe(|_: &i32| {}).unwrap();
        assert_eq!(started.get(), 1);

        drop(first);
        drop(second);
        assert_eq!(stopped.get(), 0);

        crate::flush_unused().unwrap();
        assert_eq!(stopped.get(), 1);
    }

    #[test]
    fn on_use_hook_may_write_initial_value() {
        let signal = Writable::with_options(
            0,
            SignalOptions::new().on_use(|cell: &Writable<i32>| {
                cell.set(42).ok();
                None
            }),
        );
        assert_eq!(signal.get().unwrap(), 42);
    }

    #[test]
    fn set_during_pause_is_rejected() {
        struct Writer {
            target: Writable<i32>,
            error: Rc<RefCell<Option<SignalError>>>,
        }

        impl Subscriber<i32> for Writer {
            fn next(&mut self, _: &i32) {}

            fn pause(&mut self) {
                *self.error.borrow_mut() = self.target.set(9).err();
            }
        }

        let source = Writable::new(0);
        let error = Rc::new(RefCell::new(None));
        let _unsub = source
            .subscribe(Writer {
                target: Writable::new(0),
                error: error.clone(),
            })
            .unwrap();

        source.set(1).unwrap();
        assert!(matches!(*error.borrow(), Some(SignalError::Reentrancy)));
    }
}
