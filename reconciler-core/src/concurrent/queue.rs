//! The concurrent update staging buffer.
//!
//! Event handlers can run while a render is paused. Their updates are
//! staged here and only spliced into the tree by
//! [`ConcurrentQueues::finish_queueing_concurrent_updates`], which the work
//! loop calls at a point where no render is reading update lists.

use tracing::trace;

use super::guard::NestedUpdateGuard;
use super::propagate::{mark_update_lane_from_fiber_to_root, root_for_updated_fiber};
use crate::error::Result;
use crate::fiber::{FiberId, FiberTree, QueueId, RootId, UpdateId};
use crate::lane::{Lane, Lanes, NO_LANE, NO_LANES};

/// One staged `(fiber, queue, update, lane)` entry.
#[derive(Debug, Clone, Copy)]
struct StagedUpdate {
    fiber: FiberId,
    queue: Option<QueueId>,
    update: Option<UpdateId>,
    lane: Lane,
}

/// Staging buffer for updates scheduled outside the render window.
///
/// One instance belongs to one reconciler, so independent renderers in the
/// same process never share staged work.
#[derive(Debug)]
pub struct ConcurrentQueues {
    staged: Vec<StagedUpdate>,
    /// Union of lanes staged since the last flush.
    updated_lanes: Lanes,
    nested_updates: NestedUpdateGuard,
    diagnostics: bool,
}

impl ConcurrentQueues {
    pub fn new(nested_update_limit: u32, diagnostics: bool) -> Self {
        Self {
            staged: Vec::new(),
            updated_lanes: NO_LANES,
            nested_updates: NestedUpdateGuard::new(nested_update_limit),
            diagnostics,
        }
    }

    /// Number of entries waiting for the next flush.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Lanes staged since the last flush. A render that sees this change
    /// while in progress has to restart.
    pub fn concurrently_updated_lanes(&self) -> Lanes {
        self.updated_lanes
    }

    pub fn nested_updates(&self) -> &NestedUpdateGuard {
        &self.nested_updates
    }

    pub fn nested_updates_mut(&mut self) -> &mut NestedUpdateGuard {
        &mut self.nested_updates
    }

    /// Stage an update and eagerly merge its lane into the fiber.
    ///
    /// The fiber (and its alternate) see the lane right away so bailout
    /// checks stay accurate before the flush. Ancestors only learn about it
    /// when the buffer is drained.
    pub fn enqueue_update(
        &mut self,
        tree: &mut FiberTree,
        fiber: FiberId,
        queue: Option<QueueId>,
        update: Option<UpdateId>,
        lane: Lane,
    ) {
        self.staged.push(StagedUpdate {
            fiber,
            queue,
            update,
            lane,
        });
        self.updated_lanes |= lane;
        tree.merge_fiber_lanes(fiber, lane);
    }

    /// Stage a hook state update and return the fiber's root.
    pub fn enqueue_concurrent_hook_update(
        &mut self,
        tree: &mut FiberTree,
        fiber: FiberId,
        queue: QueueId,
        update: UpdateId,
        lane: Lane,
    ) -> Result<Option<RootId>> {
        self.enqueue_update(tree, fiber, Some(queue), Some(update), lane);
        self.root_for_updated_fiber(tree, fiber)
    }

    /// Stage a class component update and return the fiber's root.
    pub fn enqueue_concurrent_class_update(
        &mut self,
        tree: &mut FiberTree,
        fiber: FiberId,
        queue: QueueId,
        update: UpdateId,
        lane: Lane,
    ) -> Result<Option<RootId>> {
        self.enqueue_update(tree, fiber, Some(queue), Some(update), lane);
        self.root_for_updated_fiber(tree, fiber)
    }

    /// Schedule a re-render of `fiber` at `lane` with no update object, as
    /// a forced refresh does.
    pub fn enqueue_concurrent_render_for_lane(
        &mut self,
        tree: &mut FiberTree,
        fiber: FiberId,
        lane: Lane,
    ) -> Result<Option<RootId>> {
        self.enqueue_update(tree, fiber, None, None, lane);
        self.root_for_updated_fiber(tree, fiber)
    }

    /// Stage an update that needs no render of its own.
    ///
    /// The update still has to land in its queue so the next render rebases
    /// on it. When nothing is rendering there may be no next flush any time
    /// soon, so the buffer is drained right away.
    pub fn enqueue_and_eagerly_bailout(
        &mut self,
        tree: &mut FiberTree,
        fiber: FiberId,
        queue: QueueId,
        update: UpdateId,
        is_rendering: bool,
    ) -> Result<()> {
        self.enqueue_update(tree, fiber, Some(queue), Some(update), NO_LANE);
        if !is_rendering {
            self.finish_queueing_concurrent_updates(tree)?;
        }
        Ok(())
    }

    /// Drain the staging buffer in FIFO order.
    ///
    /// Each update is spliced into its queue's ring so `pending` points at
    /// the newest entry, then its lane (if any) is propagated to the root.
    pub fn finish_queueing_concurrent_updates(&mut self, tree: &mut FiberTree) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        self.updated_lanes = NO_LANES;
        if staged.is_empty() {
            return Ok(());
        }
        trace!(count = staged.len(), "flushing concurrent updates");

        for entry in staged {
            if let (Some(queue), Some(update)) = (entry.queue, entry.update) {
                tree.append_pending(queue, update);
            }
            if !entry.lane.is_empty() {
                mark_update_lane_from_fiber_to_root(tree, entry.fiber, entry.update, entry.lane)?;
            }
        }
        Ok(())
    }

    /// Propagate a lane immediately, bypassing the buffer. Only safe when no
    /// render can be observing the tree, as with legacy synchronous roots.
    pub fn mark_update_lane_immediately(
        &mut self,
        tree: &mut FiberTree,
        fiber: FiberId,
        lane: Lane,
    ) -> Result<Option<RootId>> {
        let root = self.root_for_updated_fiber(tree, fiber)?;
        mark_update_lane_from_fiber_to_root(tree, fiber, None, lane)?;
        Ok(root)
    }

    /// Root discovery, with the infinite update loop check.
    pub fn root_for_updated_fiber(
        &mut self,
        tree: &FiberTree,
        fiber: FiberId,
    ) -> Result<Option<RootId>> {
        self.nested_updates.check()?;
        Ok(root_for_updated_fiber(tree, fiber, self.diagnostics))
    }
}
