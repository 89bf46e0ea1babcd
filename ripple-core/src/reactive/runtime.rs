//! Reactive Runtime
//!
//! The runtime is the per-thread coordinator behind every signal. It owns
//! the cross-cutting state that no single node owns:
//!
//! - the batch depth and the queue of terminal consumers waiting for the
//!   outermost batch to end,
//! - the notification-phase flag that forbids reads and writes while
//!   consumers are being marked dirty,
//! - the set of nodes whose teardown is planned for the next flush,
//! - the [`RuntimeConfig`].
//!
//! # How a Write Propagates
//!
//! 1. `set` stores the value and opens a batch (or joins the current one).
//!
//! 2. Consumers are marked dirty inside the notification phase. Computeds
//!    propagate further without running; subscriptions enqueue themselves.
//!
//! 3. When the outermost batch exits, the queue is drained in FIFO order.
//!    Each subscription pulls its producer and notifies or resumes.
//!
//! 4. If the outermost batch came from [`Runtime::batch`] and the flush is
//!    enabled, the deferred-unuse flush runs right after the drain. Batches
//!    the engine opens on its own (a bare `set`, `subscribe`) never flush.
//!
//! # Thread Safety
//!
//! All state is thread-local. Each thread runs an independent graph and
//! handles cannot cross threads.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, trace};

use super::tracking::{self, UsageTracked};
use crate::config::RuntimeConfig;
use crate::error::{Result, SignalError};
use crate::graph::{NodeFlags, NodeId, Notify, NotifyQueue};

struct RuntimeState {
    notification_phase: Cell<bool>,
    batch_depth: Cell<u32>,
    queue: RefCell<NotifyQueue>,
    planned_flush: RefCell<IndexMap<NodeId, Rc<dyn UsageTracked>>>,
    in_flush_unused: Cell<bool>,
    config: RefCell<RuntimeConfig>,
}

impl RuntimeState {
    fn new() -> Self {
        Self {
            notification_phase: Cell::new(false),
            batch_depth: Cell::new(0),
            queue: RefCell::new(NotifyQueue::new()),
            planned_flush: RefCell::new(IndexMap::new()),
            in_flush_unused: Cell::new(false),
            config: RefCell::new(RuntimeConfig::default()),
        }
    }
}

thread_local! {
    static RUNTIME: RuntimeState = RuntimeState::new();
}

/// The per-thread reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Run `f` with terminal notifications deferred until the outermost
    /// batch exits.
    ///
    /// Nested calls are transparent. On the outermost exit the queue is
    /// drained; an error from one item does not stop the others and the
    /// first one is returned afterwards. An error returned by `f` takes
    /// precedence over drain errors.
    ///
    /// When this is the outermost batch and
    /// [`RuntimeConfig::flush_on_batch_exit`] is set, planned teardowns are
    /// flushed after the drain.
    pub fn batch<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
        if Self::is_batching() {
            return f();
        }

        let result = Self::propagate(f);
        let flush = RUNTIME.with(|rt| rt.config.borrow().flush_on_batch_exit());
        if flush && !Self::in_flush_unused() {
            Self::flush_unused()?;
        }
        result
    }

    /// Batch used by the engine itself around writes, subscribes and
    /// foreign notifications. Same drain as [`Runtime::batch`], never
    /// flushes planned teardowns.
    pub(crate) fn propagate<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
        if Self::is_batching() {
            return f();
        }

        let _scope = BatchScope::enter();
        let result = f();
        let drained = Self::drain_queue();
        result.and_then(|value| drained.map(|()| value))
    }

    /// Check whether a batch is open on this thread.
    pub fn is_batching() -> bool {
        RUNTIME.with(|rt| rt.batch_depth.get() > 0)
    }

    fn drain_queue() -> Result<()> {
        let mut first_error = None;
        let mut drained = 0usize;
        loop {
            let next = RUNTIME.with(|rt| rt.queue.borrow_mut().pop());
            let Some(item) = next else { break };
            drained += 1;
            if let Err(err) = item.notify() {
                first_error.get_or_insert(err);
            }
        }
        if drained > 0 {
            trace!(drained, "drained notification queue");
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Queue a terminal consumer for the end of the current batch.
    pub(crate) fn enqueue(item: Rc<dyn Notify>) {
        RUNTIME.with(|rt| {
            rt.queue.borrow_mut().push(item);
        });
    }

    pub fn is_notification_phase() -> bool {
        RUNTIME.with(|rt| rt.notification_phase.get())
    }

    /// Fail with [`SignalError::Reentrancy`] while consumers are being
    /// marked dirty.
    pub fn check_not_in_notification_phase() -> Result<()> {
        if Self::is_notification_phase() {
            Err(SignalError::Reentrancy)
        } else {
            Ok(())
        }
    }

    /// Plan the teardown of `node` for the next flush.
    pub(crate) fn plan_flush(id: NodeId, node: Rc<dyn UsageTracked>) {
        RUNTIME.with(|rt| {
            rt.planned_flush.borrow_mut().insert(id, node);
        });
    }

    /// Drop a planned teardown because the node got a new observer.
    pub(crate) fn cancel_flush(id: NodeId) {
        RUNTIME.with(|rt| {
            rt.planned_flush.borrow_mut().shift_remove(&id);
        });
    }

    pub fn in_flush_unused() -> bool {
        RUNTIME.with(|rt| rt.in_flush_unused.get())
    }

    /// Number of nodes waiting for the next flush.
    pub fn planned_flush_len() -> usize {
        RUNTIME.with(|rt| rt.planned_flush.borrow().len())
    }

    /// Tear down every planned node that is still unused.
    pub fn flush_unused() -> Result<()> {
        if Self::in_flush_unused() {
            return Err(SignalError::RecursiveFlush);
        }
        let _scope = FlushScope::enter();
        loop {
            let planned = RUNTIME.with(|rt| std::mem::take(&mut *rt.planned_flush.borrow_mut()));
            if planned.is_empty() {
                break;
            }
            debug!(count = planned.len(), "flushing unused stores");
            for (_, node) in planned {
                node.header().remove(NodeFlags::FLUSH_PLANNED);
                tracking::check_unused(&*node);
            }
        }
        Ok(())
    }

    /// Replace the configuration of this thread's runtime.
    pub fn configure(config: RuntimeConfig) {
        RUNTIME.with(|rt| *rt.config.borrow_mut() = config);
    }

    /// Get a copy of this thread's configuration.
    pub fn config() -> RuntimeConfig {
        RUNTIME.with(|rt| rt.config.borrow().clone())
    }

    pub(crate) fn max_change_rounds() -> usize {
        RUNTIME.with(|rt| rt.config.borrow().max_change_rounds())
    }
}

/// Marks the notification phase for as long as it lives.
pub(crate) struct NotificationPhase {
    previous: bool,
}

impl NotificationPhase {
    pub(crate) fn enter() -> Self {
        let previous = RUNTIME.with(|rt| rt.notification_phase.replace(true));
        Self { previous }
    }
}

impl Drop for NotificationPhase {
    fn drop(&mut self) {
        let previous = self.previous;
        RUNTIME.with(|rt| rt.notification_phase.set(previous));
    }
}

struct BatchScope;

impl BatchScope {
    fn enter() -> Self {
        RUNTIME.with(|rt| rt.batch_depth.set(rt.batch_depth.get() + 1));
        BatchScope
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        RUNTIME.with(|rt| {
            let depth = rt.batch_depth.get().saturating_sub(1);
            rt.batch_depth.set(depth);
            // Unwinding leaves items behind; forget them and their pending
            // state so they can be queued again.
            if depth == 0 && std::thread::panicking() {
                rt.queue.borrow_mut().clear();
            }
        });
    }
}

struct FlushScope;

impl FlushScope {
    fn enter() -> Self {
        RUNTIME.with(|rt| rt.in_flush_unused.set(true));
        FlushScope
    }
}

impl Drop for FlushScope {
    fn drop(&mut self) {
        RUNTIME.with(|rt| rt.in_flush_unused.set(false));
    }
}
