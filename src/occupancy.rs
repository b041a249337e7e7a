//! Edge-triggered zone occupancy.
//!
//! One two-state machine per zone. A zone fires exactly one "entered" event
//! per contiguous run of matched passes; leaving is silent.
//!
//! | state    | matched | next     | event   |
//! |----------|---------|----------|---------|
//! | Empty    | true    | Occupied | entered |
//! | Empty    | false   | Empty    | -       |
//! | Occupied | true    | Occupied | -       |
//! | Occupied | false   | Empty    | -       |
//!
//! An object that crosses a zone entirely between two samples is never seen
//! as occupying it. Sampling rate bounds the smallest countable transit time.

use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneState {
    #[default]
    Empty,
    Occupied,
}

impl ZoneState {
    /// Next state for one pass, plus whether an entered event fires.
    pub fn step(self, matched: bool) -> (ZoneState, bool) {
        match (self, matched) {
            (ZoneState::Empty, true) => (ZoneState::Occupied, true),
            (ZoneState::Occupied, false) => (ZoneState::Empty, false),
            (state, _) => (state, false),
        }
    }
}

/// Per-zone occupancy state, indexed in zone configuration order.
#[derive(Clone, Debug)]
pub struct OccupancyTracker {
    states: Vec<ZoneState>,
}

impl OccupancyTracker {
    pub fn new(zone_count: usize) -> Self {
        Self {
            states: vec![ZoneState::Empty; zone_count],
        }
    }

    /// Apply one pass of per-zone match flags. Returns the indices of zones
    /// that transitioned Empty -> Occupied.
    ///
    /// Zones missing from `matched` are treated as unmatched; extra flags are
    /// ignored.
    pub fn observe(&mut self, matched: &[bool]) -> Vec<usize> {
        let mut entered = Vec::new();
        for (idx, state) in self.states.iter_mut().enumerate() {
            let hit = matched.get(idx).copied().unwrap_or(false);
            let (next, fired) = state.step(hit);
            *state = next;
            if fired {
                entered.push(idx);
            }
        }
        entered
    }

    pub fn states(&self) -> &[ZoneState] {
        &self.states
    }

    pub fn state(&self, zone: usize) -> Option<ZoneState> {
        self.states.get(zone).copied()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(tracker: &mut OccupancyTracker, passes: &[&[bool]]) -> usize {
        passes.iter().map(|p| tracker.observe(p).len()).sum()
    }

    #[test]
    fn three_matched_then_unmatched_counts_once() {
        let mut tracker = OccupancyTracker::new(1);
        let events = run(&mut tracker, &[&[true], &[true], &[true], &[false]]);
        assert_eq!(events, 1);
        assert_eq!(tracker.state(0), Some(ZoneState::Empty));
    }

    #[test]
    fn unmatched_passes_never_fire() {
        let mut tracker = OccupancyTracker::new(1);
        assert_eq!(run(&mut tracker, &[&[false], &[false]]), 0);
        assert_eq!(tracker.states(), &[ZoneState::Empty]);
    }

    #[test]
    fn re_entry_after_exit_counts_again() {
        let mut tracker = OccupancyTracker::new(1);
        let events = run(&mut tracker, &[&[true], &[false], &[true], &[true]]);
        assert_eq!(events, 2);
    }

    #[test]
    fn zones_are_independent() {
        let mut tracker = OccupancyTracker::new(2);
        assert_eq!(tracker.observe(&[true, false]), vec![0]);
        assert_eq!(tracker.observe(&[true, true]), vec![1]);
        assert_eq!(tracker.observe(&[false, true]), Vec::<usize>::new());
        assert_eq!(tracker.states(), &[ZoneState::Empty, ZoneState::Occupied]);
    }

    #[test]
    fn short_flag_slice_means_unmatched() {
        let mut tracker = OccupancyTracker::new(2);
        assert_eq!(tracker.observe(&[true, true]), vec![0, 1]);
        assert!(tracker.observe(&[true]).is_empty());
        assert_eq!(tracker.state(1), Some(ZoneState::Empty));
    }
}
