//! Fiber Tree
//!
//! An arena holding fibers, roots, update queues, updates and offscreen
//! instances. Everything is addressed by a stable index, so the
//! `return`/`alternate` back links are plain ids with no ownership attached.
//!
//! # Structure
//!
//! - `child` and `sibling` are the forward links: a parent's children are
//!   its `child` followed by that child's `sibling` chain.
//! - `return_` points from a child to its parent.
//! - `alternate` links the current fiber and its work-in-progress twin.

use std::ops::{Index, IndexMut};
use std::sync::Arc;

use indexmap::IndexMap;

use super::node::{Fiber, FiberFlags, FiberId, FiberMode, OffscreenId, RootId, StateNode, WorkTag};
use super::update::{QueueId, Update, UpdateId, UpdatePayload, UpdateQueue};
use crate::cache::Cache;
use crate::context::ContextValue;
use crate::lane::{Lane, Lanes, RootLanes, NO_LANES, OFFSCREEN_LANE};

/// Root bookkeeping for one mounted tree.
#[derive(Debug)]
pub struct FiberRoot {
    pub(crate) id: RootId,
    pub(crate) current: FiberId,
    pub(crate) lanes: RootLanes,
    pub(crate) pooled_cache: Option<Arc<Cache>>,
    pub(crate) pooled_cache_lanes: Lanes,
}

impl FiberRoot {
    /// Identifier of this root.
    pub fn id(&self) -> RootId {
        self.id
    }

    /// The committed HostRoot fiber.
    pub fn current(&self) -> FiberId {
        self.current
    }

    /// Lane bookkeeping for this root.
    pub fn lanes(&self) -> &RootLanes {
        &self.lanes
    }

    /// Mutable lane bookkeeping, for suspension and entanglement.
    pub fn lanes_mut(&mut self) -> &mut RootLanes {
        &mut self.lanes
    }

    /// Lanes with work still to render.
    pub fn pending_lanes(&self) -> Lanes {
        self.lanes.pending
    }

    /// Cache shared by renders that have not committed yet.
    pub fn pooled_cache(&self) -> Option<&Arc<Cache>> {
        self.pooled_cache.as_ref()
    }
}

/// Instance state of an offscreen boundary.
#[derive(Debug, Default)]
pub struct OffscreenInstance {
    pub(crate) visible: bool,
    /// Updates scheduled while hidden, keyed by the lane they were made on.
    pub(crate) hidden_updates: IndexMap<Lane, Vec<UpdateId>>,
}

impl OffscreenInstance {
    /// Whether the boundary currently shows its children.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Updates parked on `lane` while the boundary was hidden.
    pub fn hidden_updates(&self, lane: Lane) -> &[UpdateId] {
        self.hidden_updates
            .get(&lane)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// The arena of fibers and everything hanging off them.
#[derive(Debug, Default)]
pub struct FiberTree {
    fibers: Vec<Fiber>,
    roots: Vec<FiberRoot>,
    queues: Vec<UpdateQueue>,
    updates: Vec<Update>,
    offscreens: Vec<OffscreenInstance>,
}

impl FiberTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a root and its HostRoot sentinel fiber.
    pub fn create_root(&mut self, mode: FiberMode) -> (RootId, FiberId) {
        let root_id = RootId(self.roots.len() as u32);
        let fiber = self.create_fiber(WorkTag::HostRoot, mode);
        self.fibers[fiber.index()].state_node = Some(StateNode::Root(root_id));
        self.roots.push(FiberRoot {
            id: root_id,
            current: fiber,
            lanes: RootLanes::new(),
            pooled_cache: None,
            pooled_cache_lanes: NO_LANES,
        });
        (root_id, fiber)
    }

    /// Allocate a detached fiber.
    pub fn create_fiber(&mut self, tag: WorkTag, mode: FiberMode) -> FiberId {
        let id = FiberId::from(self.fibers.len() as u32);
        self.fibers.push(Fiber::new(id, tag, mode));
        id
    }

    /// Allocate a fiber and append it as the last child of `parent`. It
    /// inherits the parent's mode.
    pub fn create_child(&mut self, parent: FiberId, tag: WorkTag) -> FiberId {
        let mode = self[parent].mode;
        let child = self.create_fiber(tag, mode);
        self.append_child(parent, child);
        child
    }

    /// Link `child` as the last child of `parent`.
    pub fn append_child(&mut self, parent: FiberId, child: FiberId) {
        self[child].return_ = Some(parent);
        self[child].sibling = None;

        match self[parent].child {
            None => self[parent].child = Some(child),
            Some(first) => {
                let mut last = first;
                while let Some(next) = self[last].sibling {
                    last = next;
                }
                self[last].sibling = Some(child);
            }
        }
    }

    /// Create (or reset) the work-in-progress twin of `current`.
    ///
    /// The twin shares the child list, queue and instance of `current` and
    /// starts with its lanes. `pending_props` is the provider value for the
    /// render in progress, if any.
    pub fn create_work_in_progress(
        &mut self,
        current: FiberId,
        pending_props: Option<ContextValue>,
    ) -> FiberId {
        let source = self[current].clone();
        let wip = match source.alternate {
            Some(existing) => existing,
            None => {
                let wip = self.create_fiber(source.tag, source.mode);
                self[wip].alternate = Some(current);
                self[current].alternate = Some(wip);
                wip
            }
        };

        let fiber = &mut self[wip];
        fiber.flags = FiberFlags::empty();
        fiber.lanes = source.lanes;
        fiber.child_lanes = source.child_lanes;
        fiber.return_ = source.return_;
        fiber.child = source.child;
        fiber.sibling = source.sibling;
        fiber.dependencies = source.dependencies.clone();
        fiber.memoized_props = source.memoized_props.clone();
        fiber.memoized_state = source.memoized_state.clone();
        fiber.pending_props = pending_props;
        fiber.update_queue = source.update_queue;
        fiber.state_node = source.state_node;
        wip
    }

    /// Unlink a fiber (and its alternate) from its parent and mark it
    /// detached. Updates that later reach it are dropped with a warning.
    pub fn detach(&mut self, fiber: FiberId) {
        let alternate = self[fiber].alternate;
        for node in std::iter::once(fiber).chain(alternate) {
            if let Some(parent) = self[node].return_ {
                self.unlink_child(parent, node);
            }
            let fiber = &mut self[node];
            fiber.return_ = None;
            fiber.sibling = None;
            fiber.flags |= FiberFlags::DETACHED;
        }
    }

    fn unlink_child(&mut self, parent: FiberId, child: FiberId) {
        let next = self[child].sibling;
        if self[parent].child == Some(child) {
            self[parent].child = next;
            return;
        }
        let mut cursor = self[parent].child;
        while let Some(node) = cursor {
            if self[node].sibling == Some(child) {
                self[node].sibling = next;
                return;
            }
            cursor = self[node].sibling;
        }
    }

    /// Look up a fiber, or `None` if the id is not in this tree.
    pub fn get(&self, id: FiberId) -> Option<&Fiber> {
        self.fibers.get(id.index())
    }

    /// Number of fibers allocated, including alternates.
    pub fn fiber_count(&self) -> usize {
        self.fibers.len()
    }

    /// Children of `parent` in sibling order.
    pub fn children(&self, parent: FiberId) -> Vec<FiberId> {
        let mut children = Vec::new();
        let mut cursor = self[parent].child;
        while let Some(child) = cursor {
            children.push(child);
            cursor = self[child].sibling;
        }
        children
    }

    /// Add `flags` to a fiber.
    pub fn set_flags(&mut self, fiber: FiberId, flags: FiberFlags) {
        self[fiber].flags |= flags;
    }

    /// Remove `flags` from a fiber.
    pub fn clear_flags(&mut self, fiber: FiberId, flags: FiberFlags) {
        self[fiber].flags.remove(flags);
    }

    /// Set the committed provider value (the `value` prop of the last render).
    pub fn set_memoized_props(&mut self, fiber: FiberId, value: ContextValue) {
        self[fiber].memoized_props = Some(value);
    }

    /// Set the provider value of the render in progress.
    pub fn set_pending_props(&mut self, fiber: FiberId, value: ContextValue) {
        self[fiber].pending_props = Some(value);
    }

    /// Set the committed state, e.g. a host transition provider's form status.
    pub fn set_memoized_state(&mut self, fiber: FiberId, value: ContextValue) {
        self[fiber].memoized_state = Some(value);
    }

    /// Merge lanes into a fiber and its alternate.
    pub(crate) fn merge_fiber_lanes(&mut self, fiber: FiberId, lanes: Lanes) {
        self[fiber].lanes |= lanes;
        if let Some(alternate) = self[fiber].alternate {
            self[alternate].lanes |= lanes;
        }
    }

    /// Clear a fiber's own lanes once its updates were processed.
    pub fn clear_fiber_lanes(&mut self, fiber: FiberId) {
        self[fiber].lanes = NO_LANES;
    }

    // ------------------------------------------------------------------
    // Roots
    // ------------------------------------------------------------------

    /// The root with the given id.
    pub fn root(&self, id: RootId) -> &FiberRoot {
        &self.roots[id.0 as usize]
    }

    /// Mutable access to a root.
    pub fn root_mut(&mut self, id: RootId) -> &mut FiberRoot {
        &mut self.roots[id.0 as usize]
    }

    /// Every root, in creation order.
    pub fn roots(&self) -> impl Iterator<Item = &FiberRoot> {
        self.roots.iter()
    }

    /// Root of a HostRoot fiber.
    pub fn root_of(&self, host_root: FiberId) -> Option<RootId> {
        match self[host_root].state_node {
            Some(StateNode::Root(root)) if self[host_root].tag == WorkTag::HostRoot => Some(root),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Update queues
    // ------------------------------------------------------------------

    /// Create an update queue owned by `owner`. The first queue created for
    /// a fiber becomes its `update_queue`.
    pub fn create_queue(&mut self, owner: FiberId) -> QueueId {
        let id = QueueId(self.queues.len() as u32);
        self.queues.push(UpdateQueue::new(owner));
        if self[owner].update_queue.is_none() {
            self[owner].update_queue = Some(id);
        }
        id
    }

    /// The update queue with the given id.
    pub fn queue(&self, id: QueueId) -> &UpdateQueue {
        &self.queues[id.0 as usize]
    }

    pub(crate) fn queue_mut(&mut self, id: QueueId) -> &mut UpdateQueue {
        &mut self.queues[id.0 as usize]
    }

    /// Allocate an unlinked update.
    pub fn create_update(&mut self, lane: Lane, payload: UpdatePayload) -> UpdateId {
        let id = UpdateId(self.updates.len() as u32);
        self.updates.push(Update {
            lane,
            payload,
            next: None,
        });
        id
    }

    /// The update with the given id.
    pub fn update(&self, id: UpdateId) -> &Update {
        &self.updates[id.0 as usize]
    }

    pub(crate) fn update_mut(&mut self, id: UpdateId) -> &mut Update {
        &mut self.updates[id.0 as usize]
    }

    /// Splice `update` into the queue's ring and make it the newest entry.
    pub(crate) fn append_pending(&mut self, queue: QueueId, update: UpdateId) {
        match self.queue(queue).pending {
            None => self.update_mut(update).next = Some(update),
            Some(pending) => {
                let oldest = self.update(pending).next;
                self.update_mut(update).next = oldest;
                self.update_mut(pending).next = Some(update);
            }
        }
        self.queue_mut(queue).pending = Some(update);
    }

    /// Pending updates of a queue, oldest first.
    pub fn pending_updates(&self, queue: QueueId) -> Vec<UpdateId> {
        let Some(last) = self.queue(queue).pending else {
            return Vec::new();
        };
        let mut ordered = Vec::new();
        let mut cursor = self.update(last).next;
        while let Some(id) = cursor {
            ordered.push(id);
            if id == last {
                break;
            }
            cursor = self.update(id).next;
        }
        ordered
    }

    /// Detach the pending ring from a queue and return it oldest first.
    pub fn take_pending_updates(&mut self, queue: QueueId) -> Vec<UpdateId> {
        let ordered = self.pending_updates(queue);
        self.queue_mut(queue).pending = None;
        ordered
    }

    // ------------------------------------------------------------------
    // Offscreen boundaries
    // ------------------------------------------------------------------

    /// Attach offscreen instance state to an `Offscreen` fiber.
    pub fn create_offscreen(&mut self, fiber: FiberId, visible: bool) -> OffscreenId {
        let id = OffscreenId(self.offscreens.len() as u32);
        self.offscreens.push(OffscreenInstance {
            visible,
            hidden_updates: IndexMap::new(),
        });
        self[fiber].state_node = Some(StateNode::Offscreen(id));
        if let Some(alternate) = self[fiber].alternate {
            self[alternate].state_node = Some(StateNode::Offscreen(id));
        }
        id
    }

    /// Instance state of an offscreen boundary.
    pub fn offscreen(&self, id: OffscreenId) -> &OffscreenInstance {
        &self.offscreens[id.0 as usize]
    }

    pub(crate) fn offscreen_mut(&mut self, id: OffscreenId) -> &mut OffscreenInstance {
        &mut self.offscreens[id.0 as usize]
    }

    /// Instance of an `Offscreen` fiber, if it has one.
    pub fn offscreen_of(&self, fiber: FiberId) -> Option<OffscreenId> {
        match self[fiber].state_node {
            Some(StateNode::Offscreen(id)) if self[fiber].tag == WorkTag::Offscreen => Some(id),
            _ => None,
        }
    }

    /// Show or hide a boundary without touching its parked updates.
    pub fn set_offscreen_visible(&mut self, id: OffscreenId, visible: bool) {
        self.offscreen_mut(id).visible = visible;
    }

    /// Record an update that was scheduled inside a hidden boundary. The
    /// update is tagged with the offscreen lane so it is skipped until the
    /// boundary is revealed.
    pub(crate) fn mark_hidden_update(&mut self, boundary: OffscreenId, update: UpdateId, lane: Lane) {
        self.offscreen_mut(boundary)
            .hidden_updates
            .entry(lane)
            .or_default()
            .push(update);
        let update = self.update_mut(update);
        update.lane = lane | OFFSCREEN_LANE;
    }

    /// The boundary became visible: restore the original lanes of the
    /// updates recorded for `lanes` and return them.
    pub fn reveal_hidden_updates(&mut self, boundary: OffscreenId, lanes: Lanes) -> Vec<UpdateId> {
        let mut revealed = Vec::new();
        let instance = self.offscreen_mut(boundary);
        instance.visible = true;
        let taken: Vec<_> = lanes
            .iter()
            .filter_map(|lane| instance.hidden_updates.shift_remove(&lane))
            .collect();
        for updates in taken {
            for id in updates {
                let update = self.update_mut(id);
                update.lane = update.lane.remove(OFFSCREEN_LANE);
                revealed.push(id);
            }
        }
        revealed
    }
}

impl Index<FiberId> for FiberTree {
    type Output = Fiber;

    fn index(&self, id: FiberId) -> &Fiber {
        &self.fibers[id.index()]
    }
}

impl IndexMut<FiberId> for FiberTree {
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber {
        &mut self.fibers[id.index()]
    }
}
