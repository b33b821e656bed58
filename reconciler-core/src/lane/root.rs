//! Root Lane Bookkeeping
//!
//! Each root tracks which lanes have pending work, which are suspended or
//! pinged, which have expired, and which lanes are entangled with which.
//!
//! Entanglement is stored separately from membership: `entanglements[i]` is
//! the set of lanes that must be rendered whenever lane `i` is rendered.

use serde::Serialize;

use super::lanes::{
    Lane, Lanes, DEFAULT_LANE, IDLE_LANE, INPUT_CONTINUOUS_LANE, NON_IDLE_LANES, NO_LANES,
    RETRY_LANES, SYNC_LANE, TOTAL_LANES, TRANSITION_LANES,
};
use crate::config::ExpirationConfig;

/// Per-root lane state.
#[derive(Debug, Clone, Serialize)]
pub struct RootLanes {
    pub pending: Lanes,
    pub suspended: Lanes,
    pub pinged: Lanes,
    pub expired: Lanes,
    pub entangled: Lanes,
    #[serde(skip)]
    entanglements: [Lanes; TOTAL_LANES],
    #[serde(skip)]
    expiration_times: [Option<u64>; TOTAL_LANES],
}

impl Default for RootLanes {
    fn default() -> Self {
        Self {
            pending: NO_LANES,
            suspended: NO_LANES,
            pinged: NO_LANES,
            expired: NO_LANES,
            entangled: NO_LANES,
            entanglements: [NO_LANES; TOTAL_LANES],
            expiration_times: [None; TOTAL_LANES],
        }
    }
}

/// When a lane scheduled at `now` should be considered starved.
pub fn compute_expiration_time(lane: Lane, now: u64, config: &ExpirationConfig) -> Option<u64> {
    if lane.includes_some(SYNC_LANE | INPUT_CONTINUOUS_LANE) {
        Some(now + config.sync_ms)
    } else if lane.includes_some(DEFAULT_LANE | TRANSITION_LANES) {
        Some(now + config.transition_ms)
    } else {
        // Retries keep suspending until their data resolves, so they never
        // expire. Neither do idle, offscreen or deferred lanes.
        None
    }
}

impl RootLanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an update on `lane`. Any new non-idle update unsuspends the
    /// root, because the update might unblock a suspended tree.
    pub fn mark_updated(&mut self, lane: Lane) {
        self.pending |= lane;
        if lane != IDLE_LANE {
            self.suspended = NO_LANES;
            self.pinged = NO_LANES;
        }
    }

    pub fn mark_suspended(&mut self, suspended: Lanes) {
        self.suspended |= suspended;
        self.pinged = self.pinged.remove(suspended);
        for lane in suspended.iter() {
            if let Some(index) = lane.lane_to_index() {
                self.expiration_times[index] = None;
            }
        }
    }

    /// A suspended lane's data arrived. Only suspended lanes can be pinged.
    pub fn mark_pinged(&mut self, pinged: Lanes) {
        self.pinged |= self.suspended.intersect(pinged);
    }

    /// Make every lane in `lanes` render together with every other lane in
    /// `lanes`, and with anything already entangled with them.
    pub fn mark_entangled(&mut self, lanes: Lanes) {
        self.entangled |= lanes;
        for lane in self.entangled.iter() {
            let Some(index) = lane.lane_to_index() else {
                continue;
            };
            if lane.includes_some(lanes) || self.entanglements[index].includes_some(lanes) {
                self.entanglements[index] |= lanes;
            }
        }
    }

    /// Expand a render lane set with everything entangled with it.
    pub fn entangled_lanes_for(&self, render_lanes: Lanes) -> Lanes {
        let mut entangled_lanes = render_lanes;

        // Continuous input and default updates are batched together so that
        // input is never rendered on its own ahead of the default update it
        // produced.
        if entangled_lanes.includes_some(INPUT_CONTINUOUS_LANE) {
            entangled_lanes |= entangled_lanes.intersect(DEFAULT_LANE);
        }

        if !self.entangled.is_empty() {
            for lane in entangled_lanes.intersect(self.entangled).iter() {
                if let Some(index) = lane.lane_to_index() {
                    entangled_lanes |= self.entanglements[index];
                }
            }
        }
        entangled_lanes
    }

    /// Pick the lanes to render next.
    ///
    /// Non-idle work always goes first. Within a category, unblocked lanes go
    /// before pinged ones. An in-progress render on `wip_lanes` is not
    /// interrupted by work of equal or lower priority.
    pub fn next_lanes(&self, wip_lanes: Lanes) -> Lanes {
        if self.pending.is_empty() {
            return NO_LANES;
        }

        let non_idle_pending = self.pending.intersect(NON_IDLE_LANES);
        let next_lanes = if !non_idle_pending.is_empty() {
            let unblocked = non_idle_pending.remove(self.suspended);
            if !unblocked.is_empty() {
                unblocked.highest_priority_lanes()
            } else {
                non_idle_pending.intersect(self.pinged).highest_priority_lanes()
            }
        } else {
            let unblocked = self.pending.remove(self.suspended);
            if !unblocked.is_empty() {
                unblocked.highest_priority_lanes()
            } else {
                self.pinged.highest_priority_lanes()
            }
        };

        if next_lanes.is_empty() {
            return NO_LANES;
        }

        if !wip_lanes.is_empty()
            && wip_lanes != next_lanes
            && !wip_lanes.includes_some(self.suspended)
        {
            let next_lane = next_lanes.highest_priority_lane();
            let wip_lane = wip_lanes.highest_priority_lane();
            if next_lane.bits() >= wip_lane.bits()
                || (next_lane == DEFAULT_LANE && wip_lane.includes_some(TRANSITION_LANES))
            {
                // Default updates should not interrupt transition updates:
                // both end up in the same batch anyway.
                return wip_lanes;
            }
        }

        next_lanes
    }

    /// Stamp expiration times on newly pending lanes and move lanes past
    /// their expiration into `expired`.
    pub fn mark_starved_lanes_as_expired(&mut self, now: u64, config: &ExpirationConfig) {
        let candidates = self.pending.remove(RETRY_LANES);
        for lane in candidates.iter() {
            let Some(index) = lane.lane_to_index() else {
                continue;
            };
            match self.expiration_times[index] {
                None => {
                    if !lane.includes_some(self.suspended) || lane.includes_some(self.pinged) {
                        self.expiration_times[index] = compute_expiration_time(lane, now, config);
                    }
                }
                Some(expiration) if expiration <= now => {
                    self.expired |= lane;
                }
                Some(_) => {}
            }
        }
    }

    pub fn includes_expired_lane(&self, lanes: Lanes) -> bool {
        lanes.includes_some(self.expired)
    }

    pub fn expiration_time(&self, lane: Lane) -> Option<u64> {
        lane.lane_to_index().and_then(|index| self.expiration_times[index])
    }

    /// Commit finished: everything not in `remaining` is done. Returns the
    /// lanes that are no longer pending.
    pub fn mark_finished(&mut self, remaining: Lanes) -> Lanes {
        let no_longer_pending = self.pending.remove(remaining);

        self.pending = remaining;
        self.suspended = NO_LANES;
        self.pinged = NO_LANES;
        self.expired = self.expired.intersect(remaining);
        self.entangled = self.entangled.intersect(remaining);

        for lane in no_longer_pending.iter() {
            if let Some(index) = lane.lane_to_index() {
                self.entanglements[index] = NO_LANES;
                self.expiration_times[index] = None;
            }
        }
        no_longer_pending
    }
}
