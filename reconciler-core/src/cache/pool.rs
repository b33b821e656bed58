//! Per-root cache pool.
//!
//! Cache boundaries mounting in the same render share one pooled cache. The
//! pool is retained for the lanes that used it and released once none of
//! those lanes is pending anymore.

use std::sync::Arc;

use tracing::trace;

use super::store::Cache;
use crate::fiber::FiberRoot;
use crate::lane::Lanes;
use crate::scheduler::{SchedulerPriority, TaskScheduler};

/// The root's pooled cache, creating and retaining a fresh one if needed.
pub fn request_cache_from_pool(root: &mut FiberRoot, render_lanes: Lanes) -> Arc<Cache> {
    if let Some(pooled) = &root.pooled_cache {
        return Arc::clone(pooled);
    }
    let fresh = Cache::new();
    fresh.retain();
    trace!(root = ?root.id, lanes = %render_lanes, "created pooled cache");
    root.pooled_cache = Some(Arc::clone(&fresh));
    root.pooled_cache_lanes |= render_lanes;
    fresh
}

/// Release the pooled cache once none of its lanes remain pending.
pub fn release_pooled_cache(
    root: &mut FiberRoot,
    remaining_lanes: Lanes,
    scheduler: &dyn TaskScheduler,
    priority: SchedulerPriority,
) {
    root.pooled_cache_lanes = root.pooled_cache_lanes.intersect(remaining_lanes);
    if !root.pooled_cache_lanes.is_empty() {
        return;
    }
    if let Some(pooled) = root.pooled_cache.take() {
        trace!(root = ?root.id, "releasing pooled cache");
        pooled.release(scheduler, priority);
    }
}
