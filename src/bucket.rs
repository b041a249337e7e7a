//! Time-bucketed event counting.
//!
//! The aggregator compares the period containing "now" with the period it is
//! accumulating on every tick. A change of period completes the accumulating
//! bucket exactly once: the accumulating marker moves to the new period in
//! the same step, so later ticks inside that period compare equal and do
//! nothing.

use serde::{Deserialize, Serialize};

use crate::{Granularity, TimeBucket};

/// Count attributed to one zone inside a completed bucket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneCount {
    pub zone_id: String,
    pub count: u64,
}

/// A finished period, ready for the event sink.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompletedBucket {
    pub bucket: TimeBucket,
    /// UTC period label, e.g. `2024-01-31 13:00`.
    pub label: String,
    /// Total entered events in the period (all zones).
    pub count: u64,
    /// Per-zone breakdown, in zone configuration order.
    pub zone_counts: Vec<ZoneCount>,
}

#[derive(Clone, Debug)]
pub struct BucketAggregator {
    granularity: Granularity,
    current: TimeBucket,
    count: u64,
    zone_ids: Vec<String>,
    zone_counts: Vec<u64>,
}

impl BucketAggregator {
    pub fn new(granularity: Granularity, now_s: u64, zone_ids: Vec<String>) -> Self {
        let zone_counts = vec![0; zone_ids.len()];
        Self {
            granularity,
            current: TimeBucket::for_granularity(now_s, granularity),
            count: 0,
            zone_ids,
            zone_counts,
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// The period currently accumulating.
    pub fn current(&self) -> TimeBucket {
        self.current
    }

    /// Running count of the accumulating period.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn zone_count(&self, zone: usize) -> Option<u64> {
        self.zone_counts.get(zone).copied()
    }

    /// Record one entered event for `zone`.
    pub fn record(&mut self, zone: usize) {
        self.count += 1;
        if let Some(slot) = self.zone_counts.get_mut(zone) {
            *slot += 1;
        }
    }

    /// Advance to the period containing `now_s`.
    ///
    /// Returns the completed bucket when the period changed. The running
    /// counts reset in the same step. A clock that steps backwards leaves the accumulating
    /// bucket in place.
    pub fn tick(&mut self, now_s: u64) -> Option<CompletedBucket> {
        let marker = TimeBucket::for_granularity(now_s, self.granularity);
        if marker.start_epoch_s == self.current.start_epoch_s {
            return None;
        }
        if marker.start_epoch_s < self.current.start_epoch_s {
            log::debug!(
                "clock moved back from {} to {}; keeping current bucket",
                self.current.start_epoch_s,
                now_s
            );
            return None;
        }

        let completed = self.snapshot();
        self.current = marker;
        self.count = 0;
        self.zone_counts.iter_mut().for_each(|c| *c = 0);
        Some(completed)
    }

    fn snapshot(&self) -> CompletedBucket {
        CompletedBucket {
            bucket: self.current,
            label: self.current.label(),
            count: self.count,
            zone_counts: self
                .zone_ids
                .iter()
                .zip(&self.zone_counts)
                .map(|(id, &count)| ZoneCount {
                    zone_id: id.clone(),
                    count,
                })
                .collect(),
        }
    }
}
