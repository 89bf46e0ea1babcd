//! Subscriber types for the reactive system.
//!
//! A subscription is the terminal consumer of the graph: it holds a single
//! link to a producer and forwards changes to a user [`Subscriber`].
//!
//! Notification is two-phase. The first invalidation reaching the
//! subscription calls [`Subscriber::pause`]; when the batch ends the
//! subscription pulls its producer and calls exactly one of
//! [`Subscriber::next`] (the value really changed) or
//! [`Subscriber::resume`] (it didn't, e.g. a diamond whose branches
//! cancelled out).

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::context::untrack;
use super::runtime::Runtime;
use crate::error::Result;
use crate::graph::{Consumer, Link, Notify, Producer};

/// Receiver of value changes.
///
/// Any `FnMut(&T)` closure is a subscriber that only cares about `next`.
pub trait Subscriber<T> {
    /// A new value. Also called once with the current value on subscribe.
    fn next(&mut self, value: &T);

    /// The value might be about to change.
    fn pause(&mut self) {}

    /// The pending change turned out not to change the value.
    fn resume(&mut self) {}
}

impl<T, F> Subscriber<T> for F
where
    F: FnMut(&T),
{
    fn next(&mut self, value: &T) {
        self(value)
    }
}

struct SubscriptionNode<T>
where
    T: Clone + 'static,
{
    link: RefCell<Option<Rc<Link<T>>>>,
    /// Taken out while a callback runs.
    subscriber: RefCell<Option<Box<dyn Subscriber<T>>>>,
    dirty_count: Cell<u32>,
    queued: Cell<bool>,
    this: Weak<SubscriptionNode<T>>,
}

impl<T: Clone + 'static> SubscriptionNode<T> {
    fn with_subscriber(&self, f: impl FnOnce(&mut dyn Subscriber<T>)) {
        let Some(subscriber) = self.subscriber.borrow_mut().take() else {
            return;
        };
        let mut slot = SubscriberSlot {
            node: self,
            subscriber: Some(subscriber),
        };
        if let Some(subscriber) = slot.subscriber.as_mut() {
            f(&mut **subscriber);
        }
    }

    /// Resolve one pending invalidation. `first` is the initial delivery on
    /// subscribe, which always calls `next`.
    fn resolve(&self, first: bool) -> Result<()> {
        let remaining = self.dirty_count.get().saturating_sub(1);
        self.dirty_count.set(remaining);
        if remaining > 0 {
            return Ok(());
        }
        let Some(link) = self.link.borrow().clone() else {
            return Ok(());
        };

        link.update_producer_value()?;
        if !first && link.is_up_to_date() {
            self.with_subscriber(|subscriber| subscriber.resume());
            return Ok(());
        }
        match link.pull() {
            Ok(value) => {
                untrack(|| self.with_subscriber(|subscriber| subscriber.next(&value)));
                Ok(())
            }
            Err(err) => {
                if !first {
                    self.with_subscriber(|subscriber| subscriber.resume());
                }
                Err(err)
            }
        }
    }
}

/// Puts the subscriber back after a callback, unless it unsubscribed
/// meanwhile. Also runs when the callback panics.
struct SubscriberSlot<'a, T>
where
    T: Clone + 'static,
{
    node: &'a SubscriptionNode<T>,
    subscriber: Option<Box<dyn Subscriber<T>>>,
}

impl<T: Clone + 'static> Drop for SubscriberSlot<'_, T> {
    fn drop(&mut self) {
        if self.node.link.borrow().is_some() {
            *self.node.subscriber.borrow_mut() = self.subscriber.take();
        }
    }
}

impl<T: Clone + 'static> Consumer for SubscriptionNode<T> {
    fn mark_dirty(&self) {
        if self.queued.get() {
            return;
        }
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let count = self.dirty_count.get() + 1;
        self.dirty_count.set(count);
        Runtime::enqueue(this);
        if count == 1 {
            self.with_subscriber(|subscriber| subscriber.pause());
        }
    }
}

impl<T: Clone + 'static> Notify for SubscriptionNode<T> {
    fn is_queued(&self) -> bool {
        self.queued.get()
    }

    fn set_queued(&self, queued: bool) {
        self.queued.set(queued);
    }

    fn notify(&self) -> Result<()> {
        self.resolve(false)
    }

    fn reset(&self) {
        self.dirty_count.set(0);
    }
}

trait Unsubscribe {
    fn unsubscribe(&self);
}

impl<T: Clone + 'static> Unsubscribe for SubscriptionNode<T> {
    fn unsubscribe(&self) {
        let link = self.link.borrow_mut().take();
        if let Some(link) = link {
            link.unregister();
            let subscriber = self.subscriber.borrow_mut().take();
            drop(subscriber);
        }
    }
}

/// Handle returned by `subscribe`.
///
/// Unsubscribing is idempotent. Dropping the handle unsubscribes; call
/// [`Unsubscriber::detach`] to keep the subscription for the rest of the
/// thread's life instead.
#[must_use = "dropping an Unsubscriber ends the subscription"]
pub struct Unsubscriber {
    node: Option<Rc<dyn Unsubscribe>>,
}

impl Unsubscriber {
    pub fn unsubscribe(&mut self) {
        if let Some(node) = self.node.take() {
            node.unsubscribe();
        }
    }

    /// A plain callable that unsubscribes, for APIs expecting a teardown
    /// closure.
    pub fn as_fn(&self) -> impl Fn() + 'static {
        let node = self.node.clone();
        move || {
            if let Some(node) = &node {
                node.unsubscribe();
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.node.is_some()
    }

    /// Give up the handle without unsubscribing.
    pub fn detach(mut self) {
        if let Some(node) = self.node.take() {
            std::mem::forget(node);
        }
    }
}

impl Drop for Unsubscriber {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Unsubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscriber")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Subscribe `subscriber` to `producer`, delivering the current value
/// right away.
pub(crate) fn subscribe<T: Clone + 'static>(
    producer: Rc<dyn Producer<T>>,
    subscriber: Box<dyn Subscriber<T>>,
) -> Result<Unsubscriber> {
    Runtime::check_not_in_notification_phase()?;

    let node = Rc::new_cyclic(|this: &Weak<SubscriptionNode<T>>| {
        let consumer: Weak<dyn Consumer> = this.clone();
        SubscriptionNode {
            link: RefCell::new(Some(Link::new(producer, consumer))),
            subscriber: RefCell::new(Some(subscriber)),
            dirty_count: Cell::new(1),
            queued: Cell::new(false),
            this: this.clone(),
        }
    });
    if let Some(link) = node.link.borrow().as_ref() {
        Link::register(link);
    }

    let unsubscriber = Unsubscriber {
        node: Some(node.clone()),
    };
    Runtime::propagate(|| node.resolve(true))?;
    Ok(unsubscriber)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Writable;

    #[derive(Default)]
    struct Log(Rc<RefCell<Vec<String>>>);

    impl Subscriber<i32> for Log {
        fn next(&mut self, value: &i32) {
            self.0.borrow_mut().push(format!("next {value}"));
        }

        fn pause(&mut self) {
            self.0.borrow_mut().push("pause".into());
        }

        fn resume(&mut self) {
            self.0.borrow_mut().push("resume".into());
        }
    }

    #[test]
    fn closure_receives_current_value_on_subscribe() {
        let signal = Writable::new(1);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();

        let _unsub = signal.subscribe(move |v: &i32| sink.borrow_mut().push(*v)).unwrap();
        signal.set(2).unwrap();

        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn pause_precedes_next() {
        let signal = Writable::new(1);
        let log = Log::default();
        let entries = log.0.clone();

        let _unsub = signal.subscribe(log).unwrap();
        signal.set(5).unwrap();

        assert_eq!(*entries.borrow(), vec!["next 1", "pause", "next 5"]);
    }

    #[test]
    fn write_back_to_same_value_resumes() {
        let signal = Writable::new(1);
        let log = Log::default();
        let entries = log.0.clone();

        let _unsub = signal.subscribe(log).unwrap();
        crate::batch(|| {
            signal.set(2)?;
            signal.set(1)
        })
        .unwrap();

        assert_eq!(*entries.borrow(), vec!["next 1", "pause", "resume"]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let signal = Writable::new(1);
        let count = Rc::new(Cell::new(0));
        let (c1, c2) = (count.clone(), count.clone());

        let mut first = signal.subscribe(move |_: &i32| c1.set(c1.get() + 1)).unwrap();
        let _second = signal.subscribe(move |_: &i32| c2.set(c2.get() + 1)).unwrap();
        assert_eq!(count.get(), 2);

        first.unsubscribe();
        first.unsubscribe();
        signal.set(2).unwrap();
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn as_fn_unsubscribes() {
        let signal = Writable::new(1);
        let count = Rc::new(Cell::new(0));
        let c = count.clone();

        let unsub = signal.subscribe(move |_: &i32| c.set(c.get() + 1)).unwrap();
        let stop = unsub.as_fn();
        stop();
        stop();
        signal.set(2).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn detached_subscription_stays_active() {
        let signal = Writable::new(1);
        let count = Rc::new(Cell::new(0));
        let c = count.clone();

        signal.subscribe(move |_: &i32| c.set(c.get() + 1)).unwrap().detach();
        signal.set(2).unwrap();
        assert_eq!(count.get(), 2);
    }
}
