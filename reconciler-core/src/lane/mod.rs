//! Lane Space
//!
//! Lanes are the priority model of the reconciler. Every update is scheduled
//! on a lane, every fiber records the lanes of its own pending updates and of
//! its subtree, and every render works on a set of lanes.
//!
//! # Concepts
//!
//! ## Lanes
//!
//! A fixed-width bitmask. Lower bits are more urgent. Sets are combined with
//! bitwise OR, which is what makes lane propagation order-independent.
//!
//! ## Lane selection
//!
//! [`LaneAllocator`] picks a lane for a new update from its request context:
//! legacy trees are synchronous, transitions claim round-robin transition
//! lanes, and everything else follows the priority of the current event.
//!
//! ## Root bookkeeping
//!
//! [`RootLanes`] tracks pending, suspended, pinged, expired and entangled
//! lanes per root and decides what to render next.

mod lanes;
mod priority;
mod root;

pub use lanes::{
    higher_priority_lane, lane_label, Lane, Lanes, DEFAULT_LANE, DEFERRED_LANE, IDLE_LANE,
    INPUT_CONTINUOUS_LANE, NON_IDLE_LANES, NO_LANE, NO_LANES, OFFSCREEN_LANE, RETRY_LANES,
    RETRY_LANE_1, SOME_RETRY_LANE, SYNC_LANE, SYNC_UPDATE_LANES, TOTAL_LANES, TRANSITION_LANES,
    TRANSITION_LANE_1,
};
pub use priority::{lanes_to_event_priority, EventPriority, LaneAllocator, RequestContext};
pub use root::{compute_expiration_time, RootLanes};
