//! Slope density counter.
//!
//! This crate samples a camera image on a poll loop and counts "occupancy
//! events": moving objects entering one or more fixed zones of the frame.
//! Counts accumulate in fixed-width time buckets that are flushed to an
//! event sink once per completed period.
//!
//! # Pipeline
//!
//! ```text
//! FrameSource -> Preprocessor -> MotionExtractor -> RegionFilter
//!             -> ZoneMatcher -> OccupancyTracker -> BucketAggregator -> EventSink
//! ```
//!
//! # Module Structure
//!
//! - `frame`: raw pixel buffers and the luminance `Frame` (grayscale + blur)
//! - `detect`: frame differencing, contour extraction, area filtering, zone matching
//! - `occupancy`: edge-triggered per-zone state machine
//! - `bucket`: period bucketing with a once-per-period flush guard
//! - `storage`: event sinks (SQLite, in-memory)
//! - `ingest`: frame sources (HTTP snapshot, local files, synthetic) and prefetch
//! - `pipeline`: the driver object that owns all cross-frame state
//! - `config`: daemon configuration (file + environment)

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod bucket;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod occupancy;
pub mod pipeline;
pub mod storage;

pub use bucket::{BucketAggregator, CompletedBucket, ZoneCount};
pub use detect::{MotionExtractor, Region, RegionFilter, Zone, ZoneMatch, ZoneMatcher};
pub use frame::{Frame, PixelLayout, PreprocessSettings, Preprocessor, RawImage};
pub use ingest::{open_source, FrameSource, SourceSettings, SourceStats};
pub use occupancy::{OccupancyTracker, ZoneState};
pub use pipeline::{FlushOutcome, PassReport, Pipeline, PipelineSettings};
pub use storage::{EventSink, InMemoryEventSink, SqliteEventSink, StoredBucket};

/// Wall-clock seconds since the Unix epoch.
pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

// -------------------- Time Buckets --------------------

const ONE_MINUTE_S: u32 = 60;
const ONE_HOUR_S: u32 = 3600;

/// Width of a counting period.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Production mode.
    #[default]
    Hour,
    /// Test mode.
    Minute,
}

impl Granularity {
    pub fn size_s(self) -> u32 {
        match self {
            Granularity::Hour => ONE_HOUR_S,
            Granularity::Minute => ONE_MINUTE_S,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Minute => "minute",
        }
    }
}

impl FromStr for Granularity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hour" | "hourly" => Ok(Granularity::Hour),
            "minute" | "minutely" => Ok(Granularity::Minute),
            other => Err(anyhow!(
                "unknown bucket granularity '{}'; expected hour or minute",
                other
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeBucket {
    /// start of bucket in seconds since epoch
    pub start_epoch_s: u64,
    /// bucket size in seconds (e.g., 3600 = one hour)
    pub size_s: u32,
}

impl TimeBucket {
    /// The bucket of width `bucket_size_s` that contains `epoch_s`.
    pub fn at(epoch_s: u64, bucket_size_s: u32) -> Result<Self> {
        if bucket_size_s == 0 {
            return Err(anyhow!("time bucket size must be > 0"));
        }
        let size = bucket_size_s as u64;
        Ok(TimeBucket {
            start_epoch_s: (epoch_s / size) * size,
            size_s: bucket_size_s,
        })
    }

    pub fn now(bucket_size_s: u32) -> Result<Self> {
        Self::at(now_s()?, bucket_size_s)
    }

    pub fn for_granularity(epoch_s: u64, granularity: Granularity) -> Self {
        let size = granularity.size_s() as u64;
        TimeBucket {
            start_epoch_s: (epoch_s / size) * size,
            size_s: granularity.size_s(),
        }
    }

    pub fn end_epoch_s(&self) -> u64 {
        self.start_epoch_s + self.size_s as u64
    }

    pub fn contains(&self, epoch_s: u64) -> bool {
        epoch_s >= self.start_epoch_s && epoch_s < self.end_epoch_s()
    }

    /// Human-readable period label in UTC, e.g. `2024-01-31 13:00`.
    pub fn label(&self) -> String {
        i64::try_from(self.start_epoch_s)
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| self.start_epoch_s.to_string())
    }
}

// -------------------- Errors --------------------

/// Failures of a single pipeline pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DensityError {
    /// The frame was unavailable or could not be parsed into a pixel buffer
    /// of the expected dimensions. The pass is skipped.
    Decode(String),
    /// Consecutive frames disagree on size. Surfaced to the caller.
    DimensionMismatch {
        previous: (u32, u32),
        current: (u32, u32),
    },
    /// A completed bucket could not be delivered to the event sink.
    Sink(String),
}

impl DensityError {
    pub fn decode(message: impl Into<String>) -> Self {
        DensityError::Decode(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            DensityError::Decode(_) => "DECODE_ERROR",
            DensityError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            DensityError::Sink(_) => "SINK_ERROR",
        }
    }
}

impl std::fmt::Display for DensityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DensityError::Decode(message) => write!(f, "{}: {}", self.code(), message),
            DensityError::DimensionMismatch { previous, current } => write!(
                f,
                "{}: previous frame is {}x{}, current frame is {}x{}",
                self.code(),
                previous.0,
                previous.1,
                current.0,
                current.1
            ),
            DensityError::Sink(message) => write!(f, "{}: {}", self.code(), message),
        }
    }
}

impl std::error::Error for DensityError {}

// -------------------- Zone ID Discipline --------------------

/// Zone ids are short local identifiers.
///
/// Allowed: "zone:collision_box", "zone:lift_1", "zone:lower-piste"
/// Disallowed: anything with whitespace, slashes, or punctuation outside [_-].
pub fn validate_zone_id(zone_id: &str) -> Result<()> {
    static ZONE_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = ZONE_ID_RE.get_or_init(|| {
        regex::Regex::new(r"^zone:[a-z0-9_-]{1,64}$").expect("zone id pattern is valid")
    });

    let zid = zone_id.to_lowercase();
    if !re.is_match(&zid) {
        return Err(anyhow!(
            "zone_id '{}' must match ^zone:[a-z0-9_-]{{1,64}}$",
            zone_id
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_bucket_floors_to_period_start() {
        let bucket = TimeBucket::at(7_265, ONE_HOUR_S).unwrap();
        assert_eq!(bucket.start_epoch_s, 7_200);
        assert_eq!(bucket.end_epoch_s(), 10_800);
        assert!(bucket.contains(7_200));
        assert!(bucket.contains(10_799));
        assert!(!bucket.contains(10_800));
    }

    #[test]
    fn time_bucket_rejects_zero_size() {
        assert!(TimeBucket::at(100, 0).is_err());
    }

    #[test]
    fn time_bucket_granularity_matches_size() {
        let minute = TimeBucket::for_granularity(125, Granularity::Minute);
        assert_eq!(minute.start_epoch_s, 120);
        assert_eq!(minute.size_s, 60);
        let hour = TimeBucket::for_granularity(3_725, Granularity::Hour);
        assert_eq!(hour.start_epoch_s, 3_600);
    }

    #[test]
    fn time_bucket_label_is_utc() {
        // 2024-01-01 00:00:00 UTC
        let bucket = TimeBucket::for_granularity(1_704_067_200 + 13 * 3600 + 59, Granularity::Hour);
        assert_eq!(bucket.label(), "2024-01-01 13:00");
        let minute = TimeBucket::for_granularity(1_704_067_200 + 61, Granularity::Minute);
        assert_eq!(minute.label(), "2024-01-01 00:01");
    }

    #[test]
    fn granularity_parses_case_insensitively() {
        assert_eq!("Hour".parse::<Granularity>().unwrap(), Granularity::Hour);
        assert_eq!(" minute ".parse::<Granularity>().unwrap(), Granularity::Minute);
        assert!("fortnight".parse::<Granularity>().is_err());
    }

    #[test]
    fn zone_id_allowlist() {
        assert!(validate_zone_id("zone:collision_box").is_ok());
        assert!(validate_zone_id("ZONE:Lift-1").is_ok());
        assert!(validate_zone_id("collision_box").is_err());
        assert!(validate_zone_id("zone:lower piste").is_err());
        assert!(validate_zone_id("zone:").is_err());
    }

    #[test]
    fn density_error_display_carries_code() {
        let err = DensityError::DimensionMismatch {
            previous: (640, 480),
            current: (1280, 960),
        };
        assert_eq!(
            err.to_string(),
            "DIMENSION_MISMATCH: previous frame is 640x480, current frame is 1280x960"
        );
        assert!(DensityError::decode("empty body")
            .to_string()
            .starts_with("DECODE_ERROR"));
    }
}
