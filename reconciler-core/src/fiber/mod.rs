//! Fiber Tree
//!
//! The double-buffered tree the reconciler works on, stored as an arena.
//!
//! # Overview
//!
//! - [`Fiber`]: one component in one render attempt, with its own pending
//!   lanes and the union of its subtree's pending lanes.
//! - [`FiberTree`]: the arena owning fibers, roots, update queues, updates
//!   and offscreen instances.
//! - [`UpdateQueue`]: a circular list of pending [`Update`]s.
//!
//! # Design Decisions
//!
//! 1. Fibers are addressed by index. `return` and `alternate` are ids, so the
//!    parent/child and current/work-in-progress relations carry no ownership
//!    and cannot form reference cycles.
//!
//! 2. Offscreen instances and roots are separate arena entries referenced by
//!    both twins, mirroring a shared state node.

mod node;
mod tree;
mod update;

pub use node::{
    ContextDependency, Dependencies, Fiber, FiberFlags, FiberId, FiberMode, OffscreenId, RootId,
    StateNode, WorkTag,
};
pub use tree::{FiberRoot, FiberTree, OffscreenInstance};
pub use update::{QueueId, Update, UpdateId, UpdatePayload, UpdateQueue};
