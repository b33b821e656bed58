//! Reconciler Runtime
//!
//! [`Reconciler`] is the contract between this crate and a work loop. It owns
//! one fiber tree together with everything scheduling needs: the staging
//! buffer, the lane allocator, the context stack, the async action scope and
//! the injected task scheduler.
//!
//! # Lifecycle
//!
//! ```text
//! dispatch_update ──► staged ──► prepare_fresh_stack ──► render ──► commit_root
//!        ▲                         (flushes staging)                    │
//!        └──────────────── nested sync updates (guarded) ◄──────────────┘
//! ```
//!
//! Nothing here renders components. The work loop walks the tree and calls
//! back into the reconciler for context reads, provider pushes and
//! propagation on bailout.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bitflags::bitflags;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::action::{ActionEntangler, EntangledThenable};
use crate::cache::{release_pooled_cache, request_cache_from_pool, Cache};
use crate::concurrent::{ConcurrentQueues, RerenderGuard};
use crate::config::ReconcilerConfig;
use crate::context::{
    lazily_propagate_parent_context_changes, propagate_context_change,
    propagate_parent_context_changes_to_deferred_tree, ContextEngine, ContextId, ContextRegistry,
    ContextValue, CACHE_CONTEXT,
};
use crate::error::{ConfigError, Result};
use crate::fiber::{FiberId, FiberTree, QueueId, RootId, UpdateId, UpdatePayload};
use crate::lane::{
    EventPriority, Lane, LaneAllocator, Lanes, RequestContext, NO_LANE, NO_LANES, SYNC_LANE,
    SYNC_UPDATE_LANES,
};
use crate::scheduler::TaskScheduler;

bitflags! {
    /// What the reconciler is doing right now.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExecutionContext: u8 {
        const BATCHED = 1 << 0;
        const RENDER = 1 << 1;
        const COMMIT = 1 << 2;
    }
}

/// Result of dispatching an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    pub update: UpdateId,
    pub lane: Lane,
    /// `None` if the fiber is not mounted.
    pub root: Option<RootId>,
}

/// The concurrency core of one renderer instance.
pub struct Reconciler {
    tree: FiberTree,
    queues: ConcurrentQueues,
    lanes: LaneAllocator,
    contexts: ContextEngine,
    actions: ActionEntangler,
    scheduler: Arc<dyn TaskScheduler>,
    config: ReconcilerConfig,
    execution_context: ExecutionContext,
    transition_depth: u32,
    event_priority: EventPriority,
    update_priority: Option<EventPriority>,
    wip_root: Option<RootId>,
    render_lanes: Lanes,
    rerenders: RerenderGuard,
}

impl Reconciler {
    /// Create a reconciler with its own context registry.
    pub fn new(
        config: ReconcilerConfig,
        scheduler: Arc<dyn TaskScheduler>,
    ) -> std::result::Result<Self, ConfigError> {
        Self::with_registry(config, scheduler, ContextRegistry::new())
    }

    /// Create a reconciler sharing `registry` with other renderers. Each
    /// renderer should use a different [`RendererSlot`](crate::context::RendererSlot).
    pub fn with_registry(
        config: ReconcilerConfig,
        scheduler: Arc<dyn TaskScheduler>,
        registry: ContextRegistry,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        debug!(slot = ?config.renderer_slot, "creating reconciler");
        Ok(Self {
            tree: FiberTree::new(),
            queues: ConcurrentQueues::new(config.nested_update_limit, config.diagnostics),
            lanes: LaneAllocator::new(),
            contexts: ContextEngine::new(registry, config.renderer_slot),
            actions: ActionEntangler::new(config.default_transition_indicator),
            scheduler,
            rerenders: RerenderGuard::new(config.rerender_limit),
            config,
            execution_context: ExecutionContext::empty(),
            transition_depth: 0,
            event_priority: EventPriority::Default,
            update_priority: None,
            wip_root: None,
            render_lanes: NO_LANES,
        })
    }

    /// The fiber tree this reconciler schedules.
    pub fn tree(&self) -> &FiberTree {
        &self.tree
    }

    /// Mutable tree access, for mounting and building work-in-progress twins.
    pub fn tree_mut(&mut self) -> &mut FiberTree {
        &mut self.tree
    }

    /// Context registry and provider stack.
    pub fn contexts(&self) -> &ContextEngine {
        &self.contexts
    }

    /// Async action scope and default indicator.
    pub fn actions(&self) -> &ActionEntangler {
        &self.actions
    }

    /// The validated configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// What the reconciler is doing right now.
    pub fn execution_context(&self) -> ExecutionContext {
        self.execution_context
    }

    /// Root being rendered, if any.
    pub fn work_in_progress_root(&self) -> Option<RootId> {
        self.wip_root
    }

    /// Lanes of the render in progress, or no lanes.
    pub fn render_lanes(&self) -> Lanes {
        self.render_lanes
    }

    /// A render counts as in progress from `prepare_fresh_stack` until the
    /// commit, including while it is paused.
    pub fn is_rendering(&self) -> bool {
        self.wip_root.is_some()
    }

    // ------------------------------------------------------------------
    // Event scope
    // ------------------------------------------------------------------

    /// Run `f` while dispatching a host event of `priority`. Transitions
    /// started within share one lane.
    pub fn batched_updates<R>(
        &mut self,
        priority: EventPriority,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let saved = ScopeState::Batched {
            context: self.execution_context,
            event_priority: std::mem::replace(&mut self.event_priority, priority),
        };
        self.execution_context |= ExecutionContext::BATCHED;
        let mut scope = ScopeGuard::new(self, saved);
        f(&mut *scope)
    }

    /// Run `f` with updates scheduled as a transition. Outside of a batched
    /// event, each top-level transition is its own event and claims a fresh
    /// transition lane.
    pub fn start_transition<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.transition_depth += 1;
        let mut scope = ScopeGuard::new(self, ScopeState::Transition);
        f(&mut *scope)
    }

    /// Override the event priority for updates dispatched inside `f`.
    pub fn with_update_priority<R>(
        &mut self,
        priority: EventPriority,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let saved = ScopeState::UpdatePriority(self.update_priority.replace(priority));
        let mut scope = ScopeGuard::new(self, saved);
        f(&mut *scope)
    }

    /// Forget the event transition lane once no batched event or transition
    /// is active.
    fn end_event_if_outermost(&mut self) {
        if self.transition_depth == 0 && !self.execution_context.contains(ExecutionContext::BATCHED)
        {
            self.lanes.end_event();
        }
    }

    // ------------------------------------------------------------------
    // Updates
    // ------------------------------------------------------------------

    fn request_context(&self, fiber: FiberId) -> RequestContext {
        let rendering = self.execution_context.contains(ExecutionContext::RENDER);
        RequestContext {
            concurrent: self.tree[fiber].is_concurrent(),
            render_lanes: rendering.then_some(self.render_lanes),
            in_transition: self.transition_depth > 0,
            retry: false,
            update_priority: self.update_priority,
            event_priority: self.event_priority,
            entangled_action_lane: self.actions.peek_entangled_action_lane(),
        }
    }

    /// The lane a new update on `fiber` should be scheduled on.
    pub fn request_update_lane(&mut self, fiber: FiberId) -> Lane {
        let ctx = self.request_context(fiber);
        self.lanes.pick(&ctx)
    }

    /// The lane a suspended boundary should retry on.
    pub fn request_retry_lane(&mut self, fiber: FiberId) -> Lane {
        let mut ctx = self.request_context(fiber);
        ctx.retry = true;
        self.lanes.pick(&ctx)
    }

    /// Create an update for `queue` and stage it.
    ///
    /// The root (if the fiber is mounted) is marked as having pending work,
    /// and transition updates are entangled with earlier transitions on the
    /// same queue that are still pending.
    pub fn dispatch_update(
        &mut self,
        fiber: FiberId,
        queue: QueueId,
        payload: UpdatePayload,
    ) -> Result<Dispatched> {
        let lane = self.request_update_lane(fiber);
        let update = self.tree.create_update(lane, payload);
        let root = self
            .queues
            .enqueue_concurrent_hook_update(&mut self.tree, fiber, queue, update, lane)?;
        if let Some(root) = root {
            self.schedule_update_on_root(root, lane);
            self.entangle_transition_update(root, queue, lane);
        }
        trace!(?fiber, ?update, lane = %lane, "dispatched update");
        Ok(Dispatched { update, lane, root })
    }

    /// Stage an update whose result is known not to change anything. It
    /// joins its queue without scheduling a render.
    pub fn dispatch_without_render(
        &mut self,
        fiber: FiberId,
        queue: QueueId,
        payload: UpdatePayload,
    ) -> Result<UpdateId> {
        let lane = self.request_update_lane(fiber);
        let update = self.tree.create_update(lane, payload);
        let rendering = self.is_rendering();
        self.queues
            .enqueue_and_eagerly_bailout(&mut self.tree, fiber, queue, update, rendering)?;
        Ok(update)
    }

    /// Schedule a re-render of `fiber` with no update object.
    pub fn force_update(&mut self, fiber: FiberId) -> Result<Option<RootId>> {
        let lane = self.request_update_lane(fiber);
        let root = self
            .queues
            .enqueue_concurrent_render_for_lane(&mut self.tree, fiber, lane)?;
        if let Some(root) = root {
            self.schedule_update_on_root(root, lane);
        }
        Ok(root)
    }

    fn schedule_update_on_root(&mut self, root: RootId, lane: Lane) {
        self.tree.root_mut(root).lanes_mut().mark_updated(lane);
    }

    fn entangle_transition_update(&mut self, root: RootId, queue: QueueId, lane: Lane) {
        if !lane.is_transition_lane() {
            return;
        }
        let pending = self.tree.root(root).pending_lanes();
        let queue_lanes = self.tree.queue(queue).lanes().intersect(pending) | lane;
        self.tree.queue_mut(queue).lanes = queue_lanes;
        self.tree.root_mut(root).lanes_mut().mark_entangled(queue_lanes);
    }

    /// Drain the staging buffer into the tree.
    pub fn finish_queueing_concurrent_updates(&mut self) -> Result<()> {
        self.queues.finish_queueing_concurrent_updates(&mut self.tree)
    }

    /// Lanes staged since the last flush. A render that observes new lanes
    /// here must restart.
    pub fn concurrently_updated_lanes(&self) -> Lanes {
        self.queues.concurrently_updated_lanes()
    }

    /// Number of updates waiting in the staging buffer.
    pub fn staged_updates(&self) -> usize {
        self.queues.staged_len()
    }

    // ------------------------------------------------------------------
    // Render
    // ------------------------------------------------------------------

    /// Move starved lanes of `root` into its expired set.
    pub fn mark_starved_lanes(&mut self, root: RootId, now_ms: u64) {
        let expiration = self.config.expiration;
        self.tree
            .root_mut(root)
            .lanes_mut()
            .mark_starved_lanes_as_expired(now_ms, &expiration);
    }

    /// Lanes `root` should render next, given the render in progress.
    pub fn next_lanes(&self, root: RootId) -> Lanes {
        let wip_lanes = if self.wip_root == Some(root) {
            self.render_lanes
        } else {
            NO_LANES
        };
        self.tree.root(root).lanes().next_lanes(wip_lanes)
    }

    /// Begin a fresh render of `root`.
    ///
    /// Abandons any render in progress, flushes the staging buffer, prepares
    /// the work-in-progress root fiber and returns the lanes being rendered.
    /// Returns `NO_LANES` without starting anything when the root has no
    /// pending work.
    pub fn prepare_fresh_stack(&mut self, root: RootId) -> Result<Lanes> {
        let lanes = self.next_lanes(root);
        if lanes.is_empty() {
            return Ok(NO_LANES);
        }
        let render_lanes = self.tree.root(root).lanes().entangled_lanes_for(lanes);

        self.contexts.unwind_all();
        self.rerenders.reset();
        self.wip_root = Some(root);
        self.render_lanes = render_lanes;

        let current = self.tree.root(root).current();
        self.tree.create_work_in_progress(current, None);
        self.finish_queueing_concurrent_updates()?;
        debug!(?root, lanes = %render_lanes, "prepared fresh stack");
        Ok(render_lanes)
    }

    /// Start rendering `fiber`. Updates dispatched until
    /// [`complete_work`](Self::complete_work) are render-phase updates.
    ///
    /// Returns true if a context the fiber read changed in this render.
    pub fn begin_work(&mut self, fiber: FiberId) -> bool {
        self.execution_context |= ExecutionContext::RENDER;
        self.contexts
            .prepare_to_read_context(&mut self.tree, fiber, self.render_lanes)
    }

    /// The fiber being rendered re-renders itself during render.
    pub fn rerender(&mut self) -> Result<u32> {
        self.rerenders.next_pass()
    }

    /// Finish rendering the current fiber.
    pub fn complete_work(&mut self) {
        self.execution_context.remove(ExecutionContext::RENDER);
        self.contexts.reset_context_dependencies();
        self.rerenders.reset();
    }

    /// Read `context` from the fiber being rendered, subscribing it.
    pub fn read_context(&mut self, context: ContextId) -> Result<ContextValue> {
        self.contexts.read_context(&mut self.tree, context)
    }

    /// Enter a provider of `context` rendering `value`.
    pub fn push_provider(&mut self, fiber: FiberId, context: ContextId, value: ContextValue) {
        self.contexts.push_provider(fiber, context, value);
    }

    /// Leave a provider, restoring the value it replaced.
    pub fn pop_provider(&mut self, fiber: FiberId, context: ContextId) -> Result<()> {
        self.contexts.pop_provider(fiber, context)
    }

    /// Whether any context `fiber` read has changed since it last rendered.
    pub fn check_if_context_changed(&self, fiber: FiberId) -> bool {
        self.tree[fiber]
            .dependencies()
            .is_some_and(|deps| self.contexts.check_if_context_changed(deps))
    }

    /// `fiber` bailed out: make sure consumers below it still see context
    /// changes from above.
    pub fn propagate_on_bailout(&mut self, fiber: FiberId) -> Result<()> {
        lazily_propagate_parent_context_changes(&mut self.tree, fiber, self.render_lanes)
    }

    /// Like [`propagate_on_bailout`](Self::propagate_on_bailout) but for a
    /// deferred subtree, where every consumer must be found now.
    pub fn propagate_to_deferred_tree(&mut self, fiber: FiberId) -> Result<()> {
        propagate_parent_context_changes_to_deferred_tree(&mut self.tree, fiber, self.render_lanes)
    }

    // ------------------------------------------------------------------
    // Caches
    // ------------------------------------------------------------------

    /// The pooled cache of the root being rendered.
    pub fn request_cache_from_pool(&mut self) -> Option<Arc<Cache>> {
        let root = self.wip_root?;
        let lanes = self.render_lanes;
        Some(request_cache_from_pool(self.tree.root_mut(root), lanes))
    }

    /// Provide `cache` to the subtree of a cache boundary.
    pub fn push_cache_provider(&mut self, fiber: FiberId, cache: &Arc<Cache>) {
        self.contexts
            .push_provider(fiber, CACHE_CONTEXT, ContextValue::from_arc(Arc::clone(cache)));
    }

    /// Leave a cache boundary.
    pub fn pop_cache_provider(&mut self, fiber: FiberId) -> Result<()> {
        self.contexts.pop_provider(fiber, CACHE_CONTEXT)
    }

    /// The cache of the nearest boundary, read as a context.
    pub fn read_cache(&mut self) -> Result<Option<Arc<Cache>>> {
        Ok(self.read_context(CACHE_CONTEXT)?.downcast_arc::<Cache>())
    }

    /// A cache boundary switched caches. Every reader below it re-renders.
    pub fn propagate_cache_change(&mut self, boundary: FiberId) {
        propagate_context_change(&mut self.tree, boundary, CACHE_CONTEXT, self.render_lanes);
    }

    /// Take a reference on `cache`.
    pub fn retain_cache(&self, cache: &Cache) {
        cache.retain();
    }

    /// Drop a reference on `cache`, scheduling its abort at the configured priority once unused.
    pub fn release_cache(&self, cache: &Arc<Cache>) {
        cache.release(self.scheduler.as_ref(), self.config.cache_abort_priority);
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    /// Commit the render of `root`, leaving `remaining` lanes pending.
    ///
    /// Lanes staged during the render stay pending as well. Returns the
    /// lanes that finished. Fails if this commit leaves synchronous work
    /// that keeps re-entering the same root.
    pub fn commit_root(&mut self, root: RootId, remaining: Lanes) -> Result<Lanes> {
        self.execution_context |= ExecutionContext::COMMIT;
        let remaining = remaining | self.queues.concurrently_updated_lanes();

        let fiber_root = self.tree.root_mut(root);
        let finished = fiber_root.lanes_mut().mark_finished(remaining);
        let current = fiber_root.current();
        if self.wip_root == Some(root) {
            if let Some(wip) = self.tree[current].alternate() {
                self.tree.root_mut(root).current = wip;
            }
        }
        release_pooled_cache(
            self.tree.root_mut(root),
            remaining,
            self.scheduler.as_ref(),
            self.config.cache_abort_priority,
        );

        self.queues
            .nested_updates_mut()
            .record_commit(root, remaining.includes_some(SYNC_UPDATE_LANES));

        self.wip_root = None;
        self.render_lanes = NO_LANES;
        self.contexts.unwind_all();
        self.execution_context
            .remove(ExecutionContext::RENDER | ExecutionContext::COMMIT);
        debug!(?root, finished = %finished, remaining = %remaining, "committed root");

        self.queues.nested_updates_mut().check()?;
        Ok(finished)
    }

    // ------------------------------------------------------------------
    // Async actions
    // ------------------------------------------------------------------

    /// Entangle an async action with the active scope, or start one on a
    /// fresh transition lane.
    pub fn entangle_async_action<F>(&mut self, action: F) -> Result<JoinHandle<F::Output>>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let lanes = &mut self.lanes;
        let handle = self
            .actions
            .entangle(|| lanes.request_transition_lane(NO_LANE), action);
        self.end_event_if_outermost();
        handle
    }

    /// Thenable of the active async action scope, if any.
    pub fn entangled_action_thenable(&self) -> Option<Arc<EntangledThenable>> {
        self.actions.peek_entangled_action_thenable()
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Scheduling state as JSON, for tooling. Reading it never changes
    /// scheduling behaviour.
    pub fn debug_snapshot(&self) -> serde_json::Value {
        let roots: Vec<_> = self
            .tree
            .roots()
            .map(|root| {
                json!({
                    "id": root.id().0,
                    "current": root.current().index(),
                    "lanes": root.lanes(),
                    "pooled_cache": root.pooled_cache().map(|cache| cache.ref_count()),
                })
            })
            .collect();
        json!({
            "roots": roots,
            "fibers": self.tree.fiber_count(),
            "staged_updates": self.queues.staged_len(),
            "concurrently_updated_lanes": self.queues.concurrently_updated_lanes(),
            "work_in_progress_root": self.wip_root.map(|root| root.0),
            "render_lanes": self.render_lanes,
            "execution_context": format!("{:?}", self.execution_context),
            "entangled_action_lane": self.actions.peek_entangled_action_lane(),
            "pending_actions": self.actions.pending_actions(),
            "context_depth": self.contexts.depth(),
            "nested_updates": self.queues.nested_updates().count(),
            "config": self.config,
        })
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("fibers", &self.tree.fiber_count())
            .field("staged_updates", &self.queues.staged_len())
            .field("wip_root", &self.wip_root)
            .field("render_lanes", &self.render_lanes)
            .field("execution_context", &self.execution_context)
            .finish_non_exhaustive()
    }
}

/// What an event scope changed, so it can be undone.
#[derive(Debug, Clone, Copy)]
enum ScopeState {
    Batched {
        context: ExecutionContext,
        event_priority: EventPriority,
    },
    Transition,
    UpdatePriority(Option<EventPriority>),
}

/// Restores the scope state of a [`Reconciler`] when dropped, also when the
/// scope callback unwinds.
struct ScopeGuard<'a> {
    reconciler: &'a mut Reconciler,
    saved: ScopeState,
}

impl<'a> ScopeGuard<'a> {
    fn new(reconciler: &'a mut Reconciler, saved: ScopeState) -> Self {
        Self { reconciler, saved }
    }
}

impl Deref for ScopeGuard<'_> {
    type Target = Reconciler;

    fn deref(&self) -> &Reconciler {
        self.reconciler
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Reconciler {
        self.reconciler
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        let reconciler = &mut *self.reconciler;
        match self.saved {
            ScopeState::Batched {
                context,
                event_priority,
            } => {
                if !context.contains(ExecutionContext::BATCHED) {
                    reconciler.execution_context.remove(ExecutionContext::BATCHED);
                }
                reconciler.event_priority = event_priority;
            }
            ScopeState::Transition => {
                reconciler.transition_depth = reconciler.transition_depth.saturating_sub(1);
            }
            ScopeState::UpdatePriority(previous) => {
                reconciler.update_priority = previous;
            }
        }
        reconciler.end_event_if_outermost();
    }
}
