//! Lane Algebra
//!
//! A lane is a single bit in a 31-bit priority universe. A set of lanes is the
//! bitwise OR of its members. Lower bits are more urgent, so "highest
//! priority" always means "lowest set bit".
//!
//! # Layout
//!
//! ```text
//! bit  0        Sync
//! bit  1        InputContinuous
//! bit  2        Default
//! bits 3..=16   Transition1..Transition14
//! bits 17..=20  Retry1..Retry4
//! bit  21       Idle
//! bit  22       Offscreen
//! bit  23       Deferred
//! ```
//!
//! Merging is monotonic: no operation other than [`Lanes::remove`] ever
//! clears a bit.

use std::fmt;

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};

/// Number of distinguishable lanes.
pub const TOTAL_LANES: usize = 31;

/// A set of lanes. A single lane is a `Lanes` value with one bit set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Lanes(u32);

/// Alias used where a value is expected to hold exactly one bit.
pub type Lane = Lanes;

const LANE_MASK: u32 = (1 << TOTAL_LANES) - 1;

pub const NO_LANES: Lanes = Lanes(0);
pub const NO_LANE: Lane = Lanes(0);

pub const SYNC_LANE: Lane = Lanes(1 << 0);
pub const INPUT_CONTINUOUS_LANE: Lane = Lanes(1 << 1);
pub const DEFAULT_LANE: Lane = Lanes(1 << 2);

/// Lanes that are processed synchronously at the end of the current task.
pub const SYNC_UPDATE_LANES: Lanes = Lanes(SYNC_LANE.0 | INPUT_CONTINUOUS_LANE.0 | DEFAULT_LANE.0);

const TRANSITION_SHIFT: u32 = 3;
const TRANSITION_COUNT: u32 = 14;
pub const TRANSITION_LANES: Lanes = Lanes(((1 << TRANSITION_COUNT) - 1) << TRANSITION_SHIFT);
pub const TRANSITION_LANE_1: Lane = Lanes(1 << TRANSITION_SHIFT);

const RETRY_SHIFT: u32 = TRANSITION_SHIFT + TRANSITION_COUNT;
const RETRY_COUNT: u32 = 4;
pub const RETRY_LANES: Lanes = Lanes(((1 << RETRY_COUNT) - 1) << RETRY_SHIFT);
pub const RETRY_LANE_1: Lane = Lanes(1 << RETRY_SHIFT);
pub const SOME_RETRY_LANE: Lane = RETRY_LANE_1;

pub const IDLE_LANE: Lane = Lanes(1 << (RETRY_SHIFT + RETRY_COUNT));
pub const OFFSCREEN_LANE: Lane = Lanes(IDLE_LANE.0 << 1);
pub const DEFERRED_LANE: Lane = Lanes(IDLE_LANE.0 << 2);

/// Everything more urgent than idle.
pub const NON_IDLE_LANES: Lanes = Lanes(IDLE_LANE.0 - 1);

const LANE_LABELS: [&str; 24] = [
    "Sync",
    "InputContinuous",
    "Default",
    "Transition1",
    "Transition2",
    "Transition3",
    "Transition4",
    "Transition5",
    "Transition6",
    "Transition7",
    "Transition8",
    "Transition9",
    "Transition10",
    "Transition11",
    "Transition12",
    "Transition13",
    "Transition14",
    "Retry1",
    "Retry2",
    "Retry3",
    "Retry4",
    "Idle",
    "Offscreen",
    "Deferred",
];

impl Lanes {
    /// Build a lane set from raw bits. Bits outside the universe are dropped.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & LANE_MASK)
    }

    /// Get the raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Union. Associative, commutative and idempotent.
    #[must_use]
    pub const fn merge(self, other: Lanes) -> Lanes {
        Lanes(self.0 | other.0)
    }

    #[must_use]
    pub const fn intersect(self, other: Lanes) -> Lanes {
        Lanes(self.0 & other.0)
    }

    /// Set difference: `self` without any lane in `other`.
    #[must_use]
    pub const fn remove(self, other: Lanes) -> Lanes {
        Lanes(self.0 & !other.0)
    }

    /// True if every lane in `self` is also in `set`.
    pub const fn is_subset_of(self, set: Lanes) -> bool {
        (set.0 & self.0) == self.0
    }

    /// True if the two sets share at least one lane.
    pub const fn includes_some(self, other: Lanes) -> bool {
        (self.0 & other.0) != 0
    }

    /// The most urgent lane in the set, or [`NO_LANE`] if empty.
    pub const fn highest_priority_lane(self) -> Lane {
        Lanes(self.0 & self.0.wrapping_neg())
    }

    /// Any single lane from the set. Callers only rely on it being a member.
    pub const fn pick_arbitrary_lane(self) -> Lane {
        self.highest_priority_lane()
    }

    /// Index of the least urgent lane in the set, or `None` when empty.
    pub const fn pick_arbitrary_lane_index(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(31 - self.0.leading_zeros() as usize)
        }
    }

    /// Bit index of a single lane. Returns `None` for the empty set.
    pub const fn lane_to_index(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }

    /// The lane at bit `index`. Indexes past the lane space give the empty set.
    pub const fn from_index(index: usize) -> Lane {
        debug_assert!(index < TOTAL_LANES);
        match 1u32.checked_shl(index as u32) {
            Some(bit) => Lanes(bit & LANE_MASK),
            None => NO_LANES,
        }
    }

    /// Iterate over the individual lanes in the set, most urgent first.
    pub fn iter(self) -> impl Iterator<Item = Lane> {
        let mut remaining = self.0;
        std::iter::from_fn(move || {
            if remaining == 0 {
                return None;
            }
            let lane = remaining & remaining.wrapping_neg();
            remaining &= !lane;
            Some(Lanes(lane))
        })
    }

    /// The group of lanes that should be worked on together, selected by the
    /// most urgent lane in the set. All pending transitions are batched, as
    /// are all pending retries.
    pub fn highest_priority_lanes(self) -> Lanes {
        let lane = self.highest_priority_lane();
        if lane.includes_some(TRANSITION_LANES) {
            self.intersect(TRANSITION_LANES)
        } else if lane.includes_some(RETRY_LANES) {
            self.intersect(RETRY_LANES)
        } else if lane == DEFERRED_LANE {
            // Deferred work is always entangled with something else and is
            // never picked on its own.
            NO_LANES
        } else {
            lane
        }
    }

    pub const fn includes_non_idle_work(self) -> bool {
        self.includes_some(NON_IDLE_LANES)
    }

    pub const fn includes_only_retries(self) -> bool {
        !self.is_empty() && self.remove(RETRY_LANES).is_empty()
    }

    pub const fn includes_only_transitions(self) -> bool {
        !self.is_empty() && self.remove(TRANSITION_LANES).is_empty()
    }

    /// Only transitions, retries, idle or offscreen work.
    pub const fn includes_only_non_urgent(self) -> bool {
        const URGENT: Lanes = SYNC_UPDATE_LANES;
        !self.includes_some(URGENT)
    }

    /// Lanes that must not be time-sliced.
    pub const fn includes_blocking_lane(self) -> bool {
        self.includes_some(SYNC_UPDATE_LANES)
    }

    pub const fn includes_sync_lane(self) -> bool {
        self.includes_some(SYNC_LANE)
    }

    pub const fn is_transition_lane(self) -> bool {
        self.includes_some(TRANSITION_LANES)
    }

    pub const fn is_retry_lane(self) -> bool {
        self.includes_some(RETRY_LANES)
    }

    /// Labels of every lane in the set, most urgent first.
    pub fn labels(self) -> Vec<&'static str> {
        self.iter().filter_map(lane_label).collect()
    }
}

/// Diagnostic name of a single lane.
pub fn lane_label(lane: Lane) -> Option<&'static str> {
    if lane.bits().count_ones() != 1 {
        return None;
    }
    lane.lane_to_index()
        .and_then(|index| LANE_LABELS.get(index).copied())
}

/// The more urgent of two lanes. Empty lanes lose.
pub fn higher_priority_lane(a: Lane, b: Lane) -> Lane {
    if !a.is_empty() && (b.is_empty() || a.0 < b.0) {
        a
    } else {
        b
    }
}

impl fmt::Debug for Lanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "Lanes(NoLanes)");
        }
        write!(f, "Lanes({})", self.labels().join(" | "))
    }
}

impl fmt::Display for Lanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#033b}", self.0)
    }
}

impl Serialize for Lanes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let labels = self.labels();
        let mut seq = serializer.serialize_seq(Some(labels.len()))?;
        for label in labels {
            seq.serialize_element(label)?;
        }
        seq.end()
    }
}

impl std::ops::BitOr for Lanes {
    type Output = Lanes;

    fn bitor(self, rhs: Lanes) -> Lanes {
        self.merge(rhs)
    }
}

impl std::ops::BitOrAssign for Lanes {
    fn bitor_assign(&mut self, rhs: Lanes) {
        *self = self.merge(rhs);
    }
}

impl std::ops::BitAnd for Lanes {
    type Output = Lanes;

    fn bitand(self, rhs: Lanes) -> Lanes {
        self.intersect(rhs)
    }
}
