//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read, the
//! running computation gets a link to it instead of a plain value.
//!
//! # Implementation
//!
//! We use a thread-local stack of active consumers. Running a computed
//! pushes it; [`untrack`] pushes an empty entry that hides every consumer
//! below it. Entries are popped by guards, so the stack stays balanced even
//! when a computation panics.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::runtime::Runtime;
use crate::error::{Result, SignalError};
use crate::graph::{Consumer, ErasedLink, Link, NodeFlags, Producer};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Option<Weak<dyn ActiveConsumer>>>> = RefCell::new(Vec::new());
}

/// A consumer that records its producers while it runs.
///
/// Producer links are kept in the order they were first read. A cursor
/// walks that list during a run so that a run reading the same producers
/// in the same order reuses every link.
pub(crate) trait ActiveConsumer {
    fn link_at_cursor(&self) -> Option<Rc<dyn ErasedLink>>;

    fn advance_cursor(&self);

    /// Insert `link` at the cursor, moving any link already there to the
    /// end of the list, and advance.
    fn install_link(&self, link: Rc<dyn ErasedLink>);

    fn consumer_weak(&self) -> Weak<dyn Consumer>;

    /// Whether links should be registered with their producer right away.
    fn is_started(&self) -> bool;

    /// Record that one of the producers has observable start/stop effects.
    fn mark_visible_on_use(&self);

    /// Remove the link just before the cursor and step back over it.
    fn discard_last_link(&self);
}

/// Guard that pops the context when dropped.
pub(crate) struct ReactiveContext {
    depth: usize,
}

impl ReactiveContext {
    /// Make `consumer` the active consumer, or hide the current one when
    /// `None`.
    pub(crate) fn enter(consumer: Option<Weak<dyn ActiveConsumer>>) -> Self {
        let depth = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(consumer);
            stack.len()
        });
        Self { depth }
    }

    pub(crate) fn current() -> Option<Rc<dyn ActiveConsumer>> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().cloned().flatten())?.upgrade()
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(stack.len(), self.depth, "ReactiveContext mismatch");
            stack.pop();
        });
    }
}

/// Check whether reads currently register dependencies.
pub fn is_tracking() -> bool {
    ReactiveContext::current().is_some()
}

/// Run `f` without registering any dependency for the signals it reads.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::enter(None);
    f()
}

/// Read `producer`, registering it with the active consumer if any.
pub(crate) fn read<T: Clone + 'static>(producer: &Rc<dyn Producer<T>>) -> Result<T> {
    Runtime::check_not_in_notification_phase()?;
    match ReactiveContext::current() {
        Some(consumer) => track(&*consumer, producer),
        None => producer.read_untracked(),
    }
}

fn track<T: Clone + 'static>(consumer: &dyn ActiveConsumer, producer: &Rc<dyn Producer<T>>) -> Result<T> {
    let reused = match consumer.link_at_cursor() {
        Some(existing) if existing.producer_id() == producer.node_id() => {
            existing.into_any().downcast::<Link<T>>().ok()
        }
        _ => None,
    };

    let link = match reused {
        Some(link) => {
            consumer.advance_cursor();
            link
        }
        None => {
            let link = Link::new(Rc::clone(producer), consumer.consumer_weak());
            if consumer.is_started() {
                Link::register(&link);
            }
            consumer.install_link(link.clone());
            link
        }
    };

    if let Err(err) = link.update_producer_value() {
        // A link closing a cycle holds its producer strongly and would keep
        // the whole cycle alive.
        if matches!(err, SignalError::CircularDependency) {
            consumer.discard_last_link();
        }
        return Err(err);
    }
    if producer.core().header().has(NodeFlags::HAS_VISIBLE_ONUSE) {
        consumer.mark_visible_on_use();
    }
    link.pull()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Probe {
        visible: Cell<bool>,
    }

    impl ActiveConsumer for Probe {
        fn link_at_cursor(&self) -> Option<Rc<dyn ErasedLink>> {
            None
        }

        fn advance_cursor(&self) {}

        fn install_link(&self, _link: Rc<dyn ErasedLink>) {}

        fn consumer_weak(&self) -> Weak<dyn Consumer> {
            Weak::<Noop>::new()
        }

        fn is_started(&self) -> bool {
            false
        }

        fn mark_visible_on_use(&self) {
            self.visible.set(true);
        }

        fn discard_last_link(&self) {}
    }

    struct Noop;

    impl Consumer for Noop {
        fn mark_dirty(&self) {}
    }

    fn as_active(probe: &Rc<Probe>) -> Weak<dyn ActiveConsumer> {
        let weak: Weak<Probe> = Rc::downgrade(probe);
        weak
    }

    fn probe() -> Rc<Probe> {
        Rc::new(Probe {
            visible: Cell::new(false),
        })
    }

    #[test]
    fn context_tracks_active_consumer() {
        let consumer = probe();
        let weak = as_active(&consumer);

        assert!(!is_tracking());
        {
            let _ctx = ReactiveContext::enter(Some(weak));
            assert!(is_tracking());
        }
        assert!(!is_tracking());
    }

    #[test]
    fn untrack_hides_outer_consumer() {
        let consumer = probe();
        let weak = as_active(&consumer);

        let _ctx = ReactiveContext::enter(Some(weak));
        assert!(is_tracking());
        assert!(!untrack(is_tracking));
        assert!(is_tracking());
    }

    #[test]
    fn dropped_consumer_is_not_tracking() {
        let consumer = probe();
        let weak = as_active(&consumer);
        drop(consumer);

        let _ctx = ReactiveContext::enter(Some(weak));
        assert!(!is_tracking());
    }
}
