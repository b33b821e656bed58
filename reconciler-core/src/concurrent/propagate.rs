//! Upward lane propagation.
//!
//! A lane scheduled on a fiber must be visible on every ancestor's
//! `child_lanes`, on both twins, or a resumed render could skip the subtree
//! as if it had no work.

use tracing::{trace, warn};

use crate::error::{ReconcileError, Result};
use crate::fiber::{FiberFlags, FiberId, FiberTree, OffscreenId, RootId, UpdateId, WorkTag};
use crate::lane::Lane;

/// Where a walk up the `return_` chain ended.
enum WalkEnd {
    Root(RootId),
    Detached(FiberId),
}

fn classify_top(tree: &FiberTree, source: FiberId, top: FiberId) -> Result<WalkEnd> {
    if let Some(root) = tree.root_of(top) {
        return Ok(WalkEnd::Root(root));
    }
    if tree[top].flags().contains(FiberFlags::DETACHED) {
        return Ok(WalkEnd::Detached(top));
    }
    Err(ReconcileError::NotAttachedToRoot {
        source_fiber: source,
        top,
    })
}

/// Merge `lane` into `source` and the `child_lanes` of all its ancestors.
///
/// If the path crosses a hidden offscreen boundary and `update` is given,
/// the update is parked on the nearest such boundary so it is skipped until
/// the boundary is revealed. Returns the root, or `None` when the fiber has
/// been unmounted.
pub fn mark_update_lane_from_fiber_to_root(
    tree: &mut FiberTree,
    source: FiberId,
    update: Option<UpdateId>,
    lane: Lane,
) -> Result<Option<RootId>> {
    tree.merge_fiber_lanes(source, lane);

    let mut hidden_boundary: Option<OffscreenId> = None;
    let mut node = source;
    while let Some(parent) = tree[node].parent() {
        tree[parent].child_lanes |= lane;
        if let Some(alternate) = tree[parent].alternate() {
            tree[alternate].child_lanes |= lane;
        }
        if hidden_boundary.is_none() && tree[parent].tag() == WorkTag::Offscreen {
            if let Some(instance) = tree.offscreen_of(parent) {
                if !tree.offscreen(instance).is_visible() {
                    hidden_boundary = Some(instance);
                }
            }
        }
        node = parent;
    }

    match classify_top(tree, source, node)? {
        WalkEnd::Root(root) => {
            if let (Some(boundary), Some(update)) = (hidden_boundary, update) {
                trace!(?source, ?update, lane = %lane, "update parked on hidden boundary");
                tree.mark_hidden_update(boundary, update, lane);
            }
            Ok(Some(root))
        }
        WalkEnd::Detached(top) => {
            warn!(?source, ?top, "lane scheduled on an unmounted fiber was dropped");
            Ok(None)
        }
    }
}

/// Find the root a fiber belongs to without touching any lanes.
///
/// Returns `None` for unmounted fibers. `diagnostics` enables the warning
/// for updates on fibers that have not mounted yet.
pub fn root_for_updated_fiber(
    tree: &FiberTree,
    source: FiberId,
    diagnostics: bool,
) -> Option<RootId> {
    if diagnostics {
        detect_update_on_unmounted_fiber(tree, source);
    }
    let mut node = source;
    while let Some(parent) = tree[node].parent() {
        node = parent;
    }
    tree.root_of(node)
}

fn detect_update_on_unmounted_fiber(tree: &FiberTree, source: FiberId) {
    let fiber = &tree[source];
    let not_yet_mounted = fiber.alternate().is_none()
        && fiber.flags().contains(FiberFlags::PLACEMENT);
    let unmounted = fiber.flags().contains(FiberFlags::DETACHED);
    if not_yet_mounted || unmounted {
        warn!(
            ?source,
            tag = ?fiber.tag(),
            "update scheduled on a fiber that is not mounted; it will not render"
        );
    }
}
