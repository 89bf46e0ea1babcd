//! Notification Queue
//!
//! FIFO of terminal consumers waiting for the end of the current batch.
//! Enqueueing is idempotent: every item carries its own `queued` flag, so
//! an item invalidated several times in one batch sits in the queue once.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::Result;

/// A terminal consumer that can be queued for end-of-batch resolution.
pub trait Notify {
    /// Whether the item currently sits in a queue.
    fn is_queued(&self) -> bool;

    fn set_queued(&self, queued: bool);

    /// Resolve the pending invalidation.
    fn notify(&self) -> Result<()>;

    /// Forget the pending invalidation without resolving it.
    fn reset(&self) {}
}

/// Deduplicating FIFO of [`Notify`] items.
#[derive(Default)]
pub struct NotifyQueue {
    items: VecDeque<Rc<dyn Notify>>,
}

impl NotifyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `item` unless it is already queued.
    ///
    /// Returns true when the item was added.
    pub fn push(&mut self, item: Rc<dyn Notify>) -> bool {
        if item.is_queued() {
            return false;
        }
        item.set_queued(true);
        self.items.push_back(item);
        true
    }

    /// Take the oldest item and clear its queued flag.
    pub fn pop(&mut self) -> Option<Rc<dyn Notify>> {
        let item = self.items.pop_front()?;
        item.set_queued(false);
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every pending item, resetting their flags and pending state.
    pub fn clear(&mut self) {
        for item in self.items.drain(..) {
            item.set_queued(false);
            item.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct Item {
        queued: Cell<bool>,
        notified: Cell<u32>,
        resets: Cell<u32>,
    }

    impl Notify for Item {
        fn is_queued(&self) -> bool {
            self.queued.get()
        }

        fn set_queued(&self, queued: bool) {
            self.queued.set(queued);
        }

        fn notify(&self) -> Result<()> {
            self.notified.set(self.notified.get() + 1);
            Ok(())
        }

        fn reset(&self) {
            self.resets.set(self.resets.get() + 1);
        }
    }

    #[test]
    fn push_is_idempotent() {
        let mut queue = NotifyQueue::new();
        let item = Rc::new(Item::default());

        assert!(queue.push(item.clone()));
        assert!(!queue.push(item.clone()));
        assert_eq!(queue.len(), 1);
        assert!(item.is_queued());
    }

    #[test]
    fn pop_is_fifo_and_clears_flag() {
        let mut queue = NotifyQueue::new();
        let first = Rc::new(Item::default());
        let second = Rc::new(Item::default());
        queue.push(first.clone());
        queue.push(second.clone());

        let popped = queue.pop().unwrap();
        assert!(Rc::ptr_eq(&popped, &(first.clone() as Rc<dyn Notify>)));
        assert!(!first.is_queued());
        assert!(second.is_queued());

        // A popped item can be queued again.
        assert!(queue.push(first));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn clear_resets_flags() {
        let mut queue = NotifyQueue::new();
        let item = Rc::new(Item::default());
        queue.push(item.clone());
        queue.clear();

        assert!(queue.is_empty());
        assert!(!item.is_queued());
        assert_eq!(item.notified.get(), 0);
        assert_eq!(item.resets.get(), 1);
    }
}
