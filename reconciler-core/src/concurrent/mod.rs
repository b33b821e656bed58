//! Concurrent Updates
//!
//! How updates scheduled from outside the render window reach the tree.
//!
//! # Flow
//!
//! 1. An event handler calls one of the `enqueue_*` methods. The update is
//!    staged and its lane is merged into the target fiber only.
//! 2. The work loop calls `finish_queueing_concurrent_updates` before the
//!    next unit of work. Updates are spliced into their queues in the order
//!    they were staged, and lanes are propagated to the root.
//! 3. Propagation merges the lane into every ancestor's `child_lanes`. An
//!    update below a hidden offscreen boundary is parked on that boundary.
//!
//! Because lane merging is commutative, the order events arrive in before a
//! flush never changes the result. Order within a queue is always the
//! enqueue order.

mod guard;
mod propagate;
mod queue;

pub use guard::{NestedUpdateGuard, RerenderGuard};
pub use propagate::{mark_update_lane_from_fiber_to_root, root_for_updated_fiber};
pub use queue::ConcurrentQueues;
