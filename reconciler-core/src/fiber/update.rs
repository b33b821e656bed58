//! Updates and Update Queues
//!
//! An update is an opaque payload plus the lane it was scheduled on. Updates
//! for one state container are kept in a circular singly linked list owned by
//! the container's queue. The queue's `pending` pointer always references the
//! most recently added update, so `pending.next` is the oldest one.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::node::FiberId;
use crate::lane::{Lane, Lanes, NO_LANES};

/// Index of an update in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpdateId(pub(crate) u32);

/// Index of an update queue in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub(crate) u32);

/// Opaque update payload: a state value, a reducer action, a callback.
pub type UpdatePayload = Arc<dyn Any + Send + Sync>;

/// A single scheduled state change.
#[derive(Clone)]
pub struct Update {
    pub(crate) lane: Lane,
    pub(crate) payload: UpdatePayload,
    pub(crate) next: Option<UpdateId>,
}

impl Update {
    pub fn lane(&self) -> Lane {
        self.lane
    }

    /// Next update in the ring. `None` until the update is flushed.
    pub fn next(&self) -> Option<UpdateId> {
        self.next
    }

    /// Borrow the payload as `T`, if that is what it holds.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Update")
            .field("lane", &self.lane)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

/// Pending updates of one state container (a hook, a class instance, a root).
#[derive(Debug, Clone)]
pub struct UpdateQueue {
    pub(crate) owner: FiberId,
    pub(crate) pending: Option<UpdateId>,
    /// Transition lanes this queue has seen that are still pending on the
    /// root. Used to entangle successive transitions on the same state.
    pub(crate) lanes: Lanes,
}

impl UpdateQueue {
    pub(crate) fn new(owner: FiberId) -> Self {
        Self {
            owner,
            pending: None,
            lanes: NO_LANES,
        }
    }

    pub fn owner(&self) -> FiberId {
        self.owner
    }

    /// The most recently added update.
    pub fn pending(&self) -> Option<UpdateId> {
        self.pending
    }

    pub fn lanes(&self) -> Lanes {
        self.lanes
    }
}
