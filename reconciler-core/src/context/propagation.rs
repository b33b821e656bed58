//! Context Change Propagation
//!
//! When a provider's value changes, every fiber below it that read the
//! context must re-render, even if everything between the provider and the
//! consumer bailed out. Propagation finds those consumers and marks them
//! with the render lanes, then marks `child_lanes` on the path back up so
//! the render knows to descend to them.
//!
//! # Modes
//!
//! - **Lazy** (default): propagation runs only when a fiber bails out. The
//!   scan stops descending at the first matching consumer on a branch; the
//!   consumer's own children find the change when the render reaches them.
//!   `DID_PROPAGATE_CONTEXT` stops a later bailout from re-walking ancestors
//!   that were already handled, unless the fiber is inside a
//!   `NEEDS_PROPAGATION` subtree.
//!
//! - **Forced**: used for cache boundaries and deferred trees. The whole
//!   subtree is scanned, including the children of matched consumers,
//!   because deferred subtrees cannot be trusted to report changes later.
//!
//! Dehydrated boundaries are handled conservatively: their consumers are
//! unknown, so the enclosing suspense boundary itself is marked.

use smallvec::SmallVec;
use tracing::trace;

use super::registry::{ContextEngine, ContextId, HOST_TRANSITION_CONTEXT};
use crate::error::{ReconcileError, Result};
use crate::fiber::{Dependencies, FiberFlags, FiberId, FiberTree, WorkTag};
use crate::lane::Lanes;

/// Merge `render_lanes` into `child_lanes` from `parent` up to and including
/// `propagation_root`, on both twins.
pub fn schedule_context_work_on_parent_path(
    tree: &mut FiberTree,
    parent: Option<FiberId>,
    render_lanes: Lanes,
    propagation_root: FiberId,
) {
    let mut node = parent;
    while let Some(current) = node {
        let alternate = tree[current].alternate;
        if !render_lanes.is_subset_of(tree[current].child_lanes) {
            tree[current].child_lanes |= render_lanes;
            if let Some(alternate) = alternate {
                tree[alternate].child_lanes |= render_lanes;
            }
        } else if let Some(alternate) = alternate {
            if !render_lanes.is_subset_of(tree[alternate].child_lanes) {
                tree[alternate].child_lanes |= render_lanes;
            }
        }
        if current == propagation_root {
            break;
        }
        node = tree[current].return_;
    }
}

/// Scan the subtree under `wip` for consumers of any of `contexts` and
/// schedule them on `render_lanes`.
pub fn propagate_context_changes(
    tree: &mut FiberTree,
    wip: FiberId,
    contexts: &[ContextId],
    render_lanes: Lanes,
    force: bool,
) {
    let mut fiber = tree[wip].child;
    if let Some(first) = fiber {
        // The children may still be the current tree's. Point them at the
        // work-in-progress parent so the upward walk reaches `wip`.
        tree[first].return_ = Some(wip);
    }

    while let Some(current) = fiber {
        let matched = tree[current]
            .dependencies
            .as_ref()
            .map(|deps| contexts.iter().any(|context| deps.reads(*context)));

        let next_fiber = match (matched, tree[current].tag) {
            (Some(true), _) => {
                trace!(fiber = ?current, ?render_lanes, "context consumer scheduled");
                tree.merge_fiber_lanes(current, render_lanes);
                if let Some(deps) = tree[current].dependencies.as_mut() {
                    deps.lanes |= render_lanes;
                }
                let parent = tree[current].return_;
                schedule_context_work_on_parent_path(tree, parent, render_lanes, wip);
                if force {
                    tree[current].child
                } else {
                    // The consumer re-renders and will propagate to its own
                    // children when the render reaches them.
                    None
                }
            }
            (Some(false), _) => tree[current].child,
            (None, WorkTag::DehydratedFragment) => {
                if let Some(boundary) = tree[current].return_ {
                    tree.merge_fiber_lanes(boundary, render_lanes);
                    schedule_context_work_on_parent_path(tree, Some(boundary), render_lanes, wip);
                }
                None
            }
            (None, _) => tree[current].child,
        };

        fiber = match next_fiber {
            Some(next) => {
                tree[next].return_ = Some(current);
                Some(next)
            }
            None => next_after_subtree(tree, current, wip),
        };
    }
}

/// Depth-first successor of a fiber whose subtree is done: its sibling, or
/// the nearest ancestor's sibling, stopping at `root`.
fn next_after_subtree(tree: &mut FiberTree, from: FiberId, root: FiberId) -> Option<FiberId> {
    let mut node = Some(from);
    while let Some(current) = node {
        if current == root {
            return None;
        }
        if let Some(sibling) = tree[current].sibling {
            tree[sibling].return_ = tree[current].return_;
            return Some(sibling);
        }
        node = tree[current].return_;
    }
    None
}

/// Collect the contexts whose provider value changed on the path from `wip`
/// to the root, then propagate them below `wip`.
fn propagate_parent_context_changes(
    tree: &mut FiberTree,
    wip: FiberId,
    render_lanes: Lanes,
    force: bool,
) -> Result<()> {
    let mut contexts: SmallVec<[ContextId; 4]> = SmallVec::new();
    let mut parent = Some(wip);
    let mut inside_propagation_bailout = false;

    while let Some(current) = parent {
        let flags = tree[current].flags;
        if !inside_propagation_bailout {
            if flags.contains(FiberFlags::NEEDS_PROPAGATION) {
                inside_propagation_bailout = true;
            } else if flags.contains(FiberFlags::DID_PROPAGATE_CONTEXT) {
                break;
            }
        }

        match tree[current].tag {
            WorkTag::ContextProvider(context) => {
                let committed = tree[current]
                    .alternate
                    .ok_or(ReconcileError::MissingCurrentFiber(current))?;
                if let (Some(old), Some(new)) = (
                    tree[committed].memoized_props.as_ref(),
                    tree[current].pending_props.as_ref(),
                ) {
                    if !new.same_value(old) {
                        contexts.push(context);
                    }
                }
            }
            WorkTag::HostTransitionProvider => {
                let committed = tree[current]
                    .alternate
                    .ok_or(ReconcileError::MissingCurrentFiber(current))?;
                let changed = match (
                    tree[committed].memoized_state.as_ref(),
                    tree[current].memoized_state.as_ref(),
                ) {
                    (Some(old), Some(new)) => !new.same_value(old),
                    (None, None) => false,
                    _ => true,
                };
                if changed {
                    contexts.push(HOST_TRANSITION_CONTEXT);
                }
            }
            _ => {}
        }

        parent = tree[current].return_;
    }

    if !contexts.is_empty() {
        trace!(fiber = ?wip, ?contexts, force, "propagating parent context changes");
        propagate_context_changes(tree, wip, &contexts, render_lanes, force);
    }

    // Mark the fiber so later bailouts below it can skip the ancestor walk.
    tree[wip].flags |= FiberFlags::DID_PROPAGATE_CONTEXT;
    Ok(())
}

/// Propagate on bailout, stopping at the first consumer on each branch.
pub fn lazily_propagate_parent_context_changes(
    tree: &mut FiberTree,
    wip: FiberId,
    render_lanes: Lanes,
) -> Result<()> {
    propagate_parent_context_changes(tree, wip, render_lanes, false)
}

/// Propagate into a deferred tree, visiting every consumer.
pub fn propagate_parent_context_changes_to_deferred_tree(
    tree: &mut FiberTree,
    wip: FiberId,
    render_lanes: Lanes,
) -> Result<()> {
    propagate_parent_context_changes(tree, wip, render_lanes, true)
}

/// Propagate a single context that a boundary knows has changed. Always
/// forced.
pub fn propagate_context_change(
    tree: &mut FiberTree,
    wip: FiberId,
    context: ContextId,
    render_lanes: Lanes,
) {
    propagate_context_changes(tree, wip, &[context], render_lanes, true);
}

impl ContextEngine {
    /// True if any context `dependencies` read has a different current value
    /// than the one memoized when it was read.
    pub fn check_if_context_changed(&self, dependencies: &Dependencies) -> bool {
        dependencies.contexts.iter().any(|dep| {
            match self.registry.current_value(dep.context, self.slot) {
                Some(current) => !current.same_value(&dep.memoized_value),
                None => true,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextRegistry, ContextValue, RendererSlot};
    use crate::fiber::{FiberMode, RootId};
    use crate::lane::{DEFAULT_LANE, NO_LANES, TRANSITION_LANE_1};

    struct Fixture {
        tree: FiberTree,
        registry: ContextRegistry,
        ctx: ContextId,
        engine: ContextEngine,
        host: FiberId,
        _root: RootId,
    }

    fn fixture() -> Fixture {
        let registry = ContextRegistry::new();
        let ctx = registry.create_context("Ctx", ContextValue::new(0));
        let engine = ContextEngine::new(registry.clone(), RendererSlot::Primary);
        let mut tree = FiberTree::new();
        let (root, host) = tree.create_root(FiberMode::CONCURRENT);
        Fixture {
            tree,
            registry,
            ctx,
            engine,
            host,
            _root: root,
        }
    }

    fn subscribe(fx: &mut Fixture, fiber: FiberId, context: ContextId) {
        fx.engine.prepare_to_read_context(&mut fx.tree, fiber, NO_LANES);
        fx.engine.read_context(&mut fx.tree, context).unwrap();
        fx.engine.reset_context_dependencies();
    }

    /// Provider with a changed value whose work-in-progress twin exists.
    fn changed_provider(fx: &mut Fixture, parent: FiberId) -> FiberId {
        let provider = fx.tree.create_child(parent, WorkTag::ContextProvider(fx.ctx));
        fx.tree.set_memoized_props(provider, ContextValue::new(1));
        fx.tree.create_work_in_progress(provider, Some(ContextValue::new(2)))
    }

    #[test]
    fn lazy_scan_stops_at_first_consumer() {
        let mut fx = fixture();
        let host = fx.host;
        let provider = fx.tree.create_child(host, WorkTag::ContextProvider(fx.ctx));
        let outer = fx.tree.create_child(provider, WorkTag::FunctionComponent);
        let inner = fx.tree.create_child(outer, WorkTag::FunctionComponent);
        let ctx = fx.ctx;
        subscribe(&mut fx, outer, ctx);
        subscribe(&mut fx, inner, ctx);

        propagate_context_changes(&mut fx.tree, provider, &[ctx], DEFAULT_LANE, false);
        assert_eq!(fx.tree[outer].lanes(), DEFAULT_LANE);
        assert_eq!(fx.tree[inner].lanes(), NO_LANES);
        assert_eq!(fx.tree[provider].child_lanes(), DEFAULT_LANE);
        // The walk stops at the propagation root.
        assert_eq!(fx.tree[host].child_lanes(), NO_LANES);
    }

    #[test]
    fn scheduled_consumer_sees_the_change_when_rendered() {
        let mut fx = fixture();
        let host = fx.host;
        let provider = fx.tree.create_child(host, WorkTag::ContextProvider(fx.ctx));
        let consumer = fx.tree.create_child(provider, WorkTag::FunctionComponent);
        let ctx = fx.ctx;
        subscribe(&mut fx, consumer, ctx);

        propagate_context_changes(&mut fx.tree, provider, &[ctx], DEFAULT_LANE, false);
        assert_eq!(fx.tree[consumer].dependencies().unwrap().lanes, DEFAULT_LANE);

        // Rendering on other lanes does not count as a context update.
        assert!(!fx.engine.prepare_to_read_context(&mut fx.tree, consumer, TRANSITION_LANE_1));
        fx.engine.read_context(&mut fx.tree, ctx).unwrap();
        fx.engine.reset_context_dependencies();
        assert_eq!(fx.tree[consumer].dependencies().unwrap().lanes, NO_LANES);

        propagate_context_changes(&mut fx.tree, provider, &[ctx], DEFAULT_LANE, false);
        assert!(fx.engine.prepare_to_read_context(&mut fx.tree, consumer, DEFAULT_LANE));
        assert_eq!(fx.tree[consumer].dependencies().unwrap().lanes, NO_LANES);
    }

    #[test]
    fn forced_scan_visits_nested_consumers() {
        let mut fx = fixture();
        let host = fx.host;
        let provider = fx.tree.create_child(host, WorkTag::CacheComponent);
        let outer = fx.tree.create_child(provider, WorkTag::FunctionComponent);
        let inner = fx.tree.create_child(outer, WorkTag::FunctionComponent);
        let ctx = fx.ctx;
        subscribe(&mut fx, outer, ctx);
        subscribe(&mut fx, inner, ctx);

        propagate_context_change(&mut fx.tree, provider, ctx, TRANSITION_LANE_1);
        assert_eq!(fx.tree[outer].lanes(), TRANSITION_LANE_1);
        assert_eq!(fx.tree[inner].lanes(), TRANSITION_LANE_1);
        assert_eq!(fx.tree[outer].child_lanes(), TRANSITION_LANE_1);
    }

    #[test]
    fn dehydrated_boundary_marks_its_suspense_parent() {
        let mut fx = fixture();
        let host = fx.host;
        let provider = fx.tree.create_child(host, WorkTag::ContextProvider(fx.ctx));
        let suspense = fx.tree.create_child(provider, WorkTag::SuspenseComponent);
        let dehydrated = fx.tree.create_child(suspense, WorkTag::DehydratedFragment);
        let hidden = fx.tree.create_child(dehydrated, WorkTag::FunctionComponent);
        let ctx = fx.ctx;
        subscribe(&mut fx, hidden, ctx);

        propagate_context_changes(&mut fx.tree, provider, &[ctx], DEFAULT_LANE, true);
        assert_eq!(fx.tree[suspense].lanes(), DEFAULT_LANE);
        assert_eq!(fx.tree[hidden].lanes(), NO_LANES);
        assert_eq!(fx.tree[dehydrated].lanes(), NO_LANES);
    }

    #[test]
    fn parent_walk_detects_changed_provider() {
        let mut fx = fixture();
        let host = fx.host;
        let provider = changed_provider(&mut fx, host);
        let consumer = fx.tree.create_child(provider, WorkTag::FunctionComponent);
        let ctx = fx.ctx;
        subscribe(&mut fx, consumer, ctx);

        lazily_propagate_parent_context_changes(&mut fx.tree, provider, DEFAULT_LANE).unwrap();
        assert_eq!(fx.tree[consumer].lanes(), DEFAULT_LANE);
        assert!(fx.tree[provider]
            .flags()
            .contains(FiberFlags::DID_PROPAGATE_CONTEXT));
    }

    #[test]
    fn unchanged_provider_propagates_nothing() {
        let mut fx = fixture();
        let host = fx.host;
        let current = fx.tree.create_child(host, WorkTag::ContextProvider(fx.ctx));
        let value = ContextValue::new(1);
        fx.tree.set_memoized_props(current, value.clone());
        let provider = fx.tree.create_work_in_progress(current, Some(value));
        let consumer = fx.tree.create_child(provider, WorkTag::FunctionComponent);
        let ctx = fx.ctx;
        subscribe(&mut fx, consumer, ctx);

        lazily_propagate_parent_context_changes(&mut fx.tree, provider, DEFAULT_LANE).unwrap();
        assert_eq!(fx.tree[consumer].lanes(), NO_LANES);
    }

    #[test]
    fn did_propagate_marker_short_circuits_ancestor_walk() {
        let mut fx = fixture();
        let host = fx.host;
        let provider = changed_provider(&mut fx, host);
        let middle = fx.tree.create_child(provider, WorkTag::FunctionComponent);
        let consumer = fx.tree.create_child(middle, WorkTag::FunctionComponent);
        let ctx = fx.ctx;
        subscribe(&mut fx, consumer, ctx);
        fx.tree.clear_flags(consumer, FiberFlags::NEEDS_PROPAGATION);
        fx.tree.set_flags(middle, FiberFlags::DID_PROPAGATE_CONTEXT);

        // Walking up from the consumer hits `middle` and stops.
        let leaf = fx.tree.create_child(consumer, WorkTag::HostText);
        lazily_propagate_parent_context_changes(&mut fx.tree, leaf, DEFAULT_LANE).unwrap();
        assert_eq!(fx.tree[consumer].lanes(), NO_LANES);
    }

    #[test]
    fn needs_propagation_disables_the_shortcut() {
        let mut fx = fixture();
        let host = fx.host;
        let provider = changed_provider(&mut fx, host);
        let middle = fx.tree.create_child(provider, WorkTag::FunctionComponent);
        let consumer = fx.tree.create_child(middle, WorkTag::FunctionComponent);
        let grandchild = fx.tree.create_child(consumer, WorkTag::FunctionComponent);
        let ctx = fx.ctx;
        subscribe(&mut fx, grandchild, ctx);
        fx.tree.set_flags(middle, FiberFlags::DID_PROPAGATE_CONTEXT);
        fx.tree.set_flags(consumer, FiberFlags::NEEDS_PROPAGATION);

        lazily_propagate_parent_context_changes(&mut fx.tree, consumer, DEFAULT_LANE).unwrap();
        assert_eq!(fx.tree[grandchild].lanes(), DEFAULT_LANE);
        assert_eq!(fx.tree[consumer].child_lanes(), DEFAULT_LANE);
    }

    #[test]
    fn provider_without_current_twin_is_a_bug() {
        let mut fx = fixture();
        let host = fx.host;
        let orphan = fx.tree.create_child(host, WorkTag::ContextProvider(fx.ctx));
        let err = lazily_propagate_parent_context_changes(&mut fx.tree, orphan, DEFAULT_LANE)
            .unwrap_err();
        assert_eq!(err, ReconcileError::MissingCurrentFiber(orphan));
    }

    #[test]
    fn host_transition_status_change_is_a_context_change() {
        let mut fx = fixture();
        let host = fx.host;
        let form = fx.tree.create_child(host, WorkTag::HostTransitionProvider);
        fx.tree.set_memoized_state(form, ContextValue::new("idle"));
        let wip = fx.tree.create_work_in_progress(form, None);
        fx.tree.set_memoized_state(wip, ContextValue::new("pending"));
        let status = fx.tree.create_child(wip, WorkTag::FunctionComponent);
        subscribe(&mut fx, status, HOST_TRANSITION_CONTEXT);

        lazily_propagate_parent_context_changes(&mut fx.tree, wip, TRANSITION_LANE_1).unwrap();
        assert_eq!(fx.tree[status].lanes(), TRANSITION_LANE_1);
    }

    #[test]
    fn check_if_context_changed_uses_identity() {
        let mut fx = fixture();
        let host = fx.host;
        let consumer = fx.tree.create_child(host, WorkTag::FunctionComponent);
        let ctx = fx.ctx;
        subscribe(&mut fx, consumer, ctx);
        let deps = fx.tree[consumer].dependencies().cloned().unwrap();
        assert!(!fx.engine.check_if_context_changed(&deps));

        fx.engine.push_provider(host, ctx, ContextValue::new(0));
        assert!(fx.engine.check_if_context_changed(&deps));
        fx.engine.pop_provider(host, ctx).unwrap();
        assert!(!fx.engine.check_if_context_changed(&deps));
        drop(fx.registry);
    }
}
