//! Per-frame detection stages.
//!
//! - `motion`: frame differencing and external contour extraction
//! - `region`: connected-region geometry and the area band filter
//! - `zone`: configured polygons and centroid containment
//!
//! Every stage here is stateless; cross-frame state lives in `occupancy` and
//! `bucket`.

mod motion;
mod region;
mod zone;

pub use motion::{MotionExtractor, DEFAULT_DIFF_THRESHOLD};
pub use region::{polygon_area, Region, RegionFilter, DEFAULT_MAX_AREA, DEFAULT_MIN_AREA};
pub use zone::{Zone, ZoneMatch, ZoneMatcher};
