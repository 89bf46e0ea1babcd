//! Usage Tracking
//!
//! Nodes with lazy start/stop semantics (computeds, cells with an on-use
//! hook, wrapped foreign signals) only do work while something observes
//! them. An observer is either a registered consumer link or a transient
//! direct read ("extra usage").
//!
//! `start_use` runs on the first observer and `end_use` after the last one
//! leaves, each exactly once per transition. When stopping has effects
//! visible outside the graph, the teardown is planned for the next flush so
//! that an immediate re-subscribe cancels it instead of paying for a full
//! stop/start cycle.

use std::rc::Rc;

use tracing::debug;

use super::context::untrack;
use super::runtime::Runtime;
use crate::error::Result;
use crate::graph::{NodeFlags, NodeHeader, Producer};

pub(crate) trait UsageTracked {
    fn header(&self) -> &NodeHeader;

    fn consumer_count(&self) -> usize;

    fn start_use(&self);

    fn end_use(&self);

    /// Strong handle used to keep the node alive while a flush is planned.
    fn as_rc(&self) -> Option<Rc<dyn UsageTracked>>;
}

/// Run `start_use` if the node is not started yet.
pub(crate) fn ensure_started(node: &dyn UsageTracked) {
    let header = node.header();
    if header.has(NodeFlags::START_USE_CALLED) {
        return;
    }
    header.insert(NodeFlags::START_USE_CALLED);
    debug!(node = header.id().raw(), "start use");
    untrack(|| node.start_use());
}

/// Stop the node if nothing observes it anymore, immediately or through
/// the next flush.
pub(crate) fn check_unused(node: &dyn UsageTracked) {
    let header = node.header();
    if !header.has(NodeFlags::START_USE_CALLED)
        || header.extra_usages() > 0
        || node.consumer_count() > 0
    {
        return;
    }

    if Runtime::in_flush_unused() || !header.has(NodeFlags::HAS_VISIBLE_ONUSE) {
        stop(node);
        return;
    }
    if header.has(NodeFlags::FLUSH_PLANNED) {
        return;
    }
    match node.as_rc() {
        Some(rc) => {
            header.insert(NodeFlags::FLUSH_PLANNED);
            Runtime::plan_flush(header.id(), rc);
        }
        // The node is being dropped, nothing can observe it again.
        None => stop(node),
    }
}

fn stop(node: &dyn UsageTracked) {
    let header = node.header();
    header.remove(NodeFlags::START_USE_CALLED);
    debug!(node = header.id().raw(), "end use");
    untrack(|| node.end_use());
}

/// A transient direct read keeping `node` in use.
pub(crate) struct ExtraUsage<'a> {
    node: &'a dyn UsageTracked,
}

impl<'a> ExtraUsage<'a> {
    pub(crate) fn acquire(node: &'a dyn UsageTracked) -> Self {
        node.header().acquire_extra_usage();
        ensure_started(node);
        Self { node }
    }
}

impl Drop for ExtraUsage<'_> {
    fn drop(&mut self) {
        if self.node.header().release_extra_usage() == 0 {
            check_unused(self.node);
        }
    }
}

/// Untracked read of a usage-tracked producer.
pub(crate) fn read_in_use<T: Clone + 'static>(
    node: &dyn UsageTracked,
    producer: &dyn Producer<T>,
) -> Result<T> {
    let _usage = ExtraUsage::acquire(node);
    producer.update_value()?;
    producer.core().read()
}
