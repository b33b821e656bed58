//! Lane Selection
//!
//! Decides which lane a new update is scheduled on, given the ambient request
//! context: is the fiber in legacy mode, is a render in progress, is the
//! update inside a transition or a retry, and which event is being handled.

use serde::{Deserialize, Serialize};

use super::lanes::{
    Lane, Lanes, DEFAULT_LANE, IDLE_LANE, INPUT_CONTINUOUS_LANE, NO_LANE, RETRY_LANES,
    RETRY_LANE_1, SYNC_LANE, TRANSITION_LANES, TRANSITION_LANE_1,
};

/// Priority of the event that triggered an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    /// Clicks, key presses and other discrete input.
    Discrete,
    /// Drags, scrolls and other continuous input.
    Continuous,
    /// Everything without a more specific priority.
    #[default]
    Default,
    /// Work that can wait for an idle period.
    Idle,
}

impl EventPriority {
    /// The lane updates of this priority are scheduled on.
    pub const fn lane(self) -> Lane {
        match self {
            EventPriority::Discrete => SYNC_LANE,
            EventPriority::Continuous => INPUT_CONTINUOUS_LANE,
            EventPriority::Default => DEFAULT_LANE,
            EventPriority::Idle => IDLE_LANE,
        }
    }
}

fn is_higher_event_priority(a: Lane, b: Lane) -> bool {
    !a.is_empty() && a.bits() < b.bits()
}

/// Map a lane set back to the event priority of its most urgent lane.
pub fn lanes_to_event_priority(lanes: Lanes) -> EventPriority {
    let lane = lanes.highest_priority_lane();
    if !is_higher_event_priority(SYNC_LANE, lane) {
        return EventPriority::Discrete;
    }
    if !is_higher_event_priority(INPUT_CONTINUOUS_LANE, lane) {
        return EventPriority::Continuous;
    }
    if lane.includes_non_idle_work() {
        return EventPriority::Default;
    }
    EventPriority::Idle
}

/// Everything the allocator needs to know about where an update comes from.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContext {
    /// The fiber is part of a concurrent tree. Legacy trees are always sync.
    pub concurrent: bool,
    /// Lanes of the render in progress, when the update is issued from render.
    pub render_lanes: Option<Lanes>,
    /// The update was issued inside a transition.
    pub in_transition: bool,
    /// The update retries a suspended boundary.
    pub retry: bool,
    /// An explicitly set update priority, overriding the event priority.
    pub update_priority: Option<EventPriority>,
    /// Priority of the host event currently being dispatched.
    pub event_priority: EventPriority,
    /// Lane of the active async action scope, or [`NO_LANE`].
    pub entangled_action_lane: Lane,
}

/// Hands out lanes for new updates.
///
/// Transition and retry lanes are claimed round-robin so that independent
/// transitions can be worked on separately. All transitions started within
/// one event share a lane.
#[derive(Debug, Clone)]
pub struct LaneAllocator {
    next_transition_lane: Lane,
    next_retry_lane: Lane,
    current_event_transition_lane: Lane,
}

impl LaneAllocator {
    pub fn new() -> Self {
        Self {
            next_transition_lane: TRANSITION_LANE_1,
            next_retry_lane: RETRY_LANE_1,
            current_event_transition_lane: NO_LANE,
        }
    }

    /// Choose the lane for a new update.
    pub fn pick(&mut self, ctx: &RequestContext) -> Lane {
        if !ctx.concurrent {
            return SYNC_LANE;
        }
        if ctx.retry {
            return self.claim_next_retry_lane();
        }
        if let Some(render_lanes) = ctx.render_lanes.filter(|lanes| !lanes.is_empty()) {
            // Render-phase updates are not officially supported; treat them
            // as if they came from whatever is rendering right now.
            return render_lanes.pick_arbitrary_lane();
        }
        if ctx.in_transition {
            return self.request_transition_lane(ctx.entangled_action_lane);
        }
        ctx.update_priority.unwrap_or(ctx.event_priority).lane()
    }

    /// Lane for a transition update. Joins the active async action scope if
    /// there is one, otherwise reuses the lane claimed earlier in this event.
    pub fn request_transition_lane(&mut self, entangled_action_lane: Lane) -> Lane {
        if self.current_event_transition_lane.is_empty() {
            self.current_event_transition_lane = if entangled_action_lane.is_empty() {
                self.claim_next_transition_lane()
            } else {
                entangled_action_lane
            };
        }
        self.current_event_transition_lane
    }

    pub fn claim_next_transition_lane(&mut self) -> Lane {
        let lane = self.next_transition_lane;
        self.next_transition_lane = Lanes::from_bits(lane.bits() << 1);
        if !self.next_transition_lane.includes_some(TRANSITION_LANES) {
            self.next_transition_lane = TRANSITION_LANE_1;
        }
        lane
    }

    pub fn claim_next_retry_lane(&mut self) -> Lane {
        let lane = self.next_retry_lane;
        self.next_retry_lane = Lanes::from_bits(lane.bits() << 1);
        if !self.next_retry_lane.includes_some(RETRY_LANES) {
            self.next_retry_lane = RETRY_LANE_1;
        }
        lane
    }

    /// Forget the transition lane cached for the event that just finished.
    pub fn end_event(&mut self) {
        self.current_event_transition_lane = NO_LANE;
    }
}

impl Default for LaneAllocator {
    fn default() -> Self {
        Self::new()
    }
}
