use anyhow::{anyhow, Result};
use imageproc::point::Point;

/// Smallest silhouette area (px²) that counts as an object.
pub const DEFAULT_MIN_AREA: f64 = 750.0;
/// Largest silhouette area (px²) that counts as an object.
pub const DEFAULT_MAX_AREA: f64 = 3500.0;

/// One connected component of the motion mask, for a single frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    /// Inclusive bounding box.
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    /// Outer boundary, in traversal order.
    pub polygon: Vec<Point<i32>>,
    /// Enclosed polygon area (zeroth moment).
    pub area: f64,
}

impl Region {
    /// Build a region from a boundary polygon. Returns `None` for an empty polygon.
    pub fn from_polygon(polygon: Vec<Point<i32>>) -> Option<Self> {
        let first = polygon.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &polygon {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        let area = polygon_area(&polygon);
        Some(Self {
            x: min_x.max(0) as u32,
            y: min_y.max(0) as u32,
            w: (max_x - min_x + 1) as u32,
            h: (max_y - min_y + 1) as u32,
            polygon,
            area,
        })
    }

    /// Bounding-box centre, or `None` for a degenerate (zero-area) region.
    pub fn centroid(&self) -> Option<(f64, f64)> {
        if self.area <= 0.0 {
            return None;
        }
        Some((
            self.x as f64 + self.w as f64 / 2.0,
            self.y as f64 + self.h as f64 / 2.0,
        ))
    }
}

/// Shoelace area of a closed polygon; orientation-independent.
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    twice.abs() as f64 / 2.0
}

/// Keeps regions whose area lies strictly inside `(min_area, max_area)`.
///
/// Below the band is sensor/compression noise; above it are lighting shifts
/// and camera artifacts. Regions exactly on either bound are dropped.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionFilter {
    min_area: f64,
    max_area: f64,
}

impl RegionFilter {
    pub fn new(min_area: f64, max_area: f64) -> Result<Self> {
        if !min_area.is_finite() || !max_area.is_finite() {
            return Err(anyhow!("area bounds must be finite"));
        }
        if min_area < 0.0 {
            return Err(anyhow!("min_area must be >= 0 (got {})", min_area));
        }
        if min_area >= max_area {
            return Err(anyhow!(
                "min_area ({}) must be less than max_area ({})",
                min_area,
                max_area
            ));
        }
        Ok(Self { min_area, max_area })
    }

    pub fn min_area(&self) -> f64 {
        self.min_area
    }

    pub fn max_area(&self) -> f64 {
        self.max_area
    }

    pub fn accepts(&self, region: &Region) -> bool {
        region.area > self.min_area && region.area < self.max_area
    }

    pub fn filter(&self, regions: Vec<Region>) -> Vec<Region> {
        regions.into_iter().filter(|r| self.accepts(r)).collect()
    }
}

impl Default for RegionFilter {
    fn default() -> Self {
        Self {
            min_area: DEFAULT_MIN_AREA,
            max_area: DEFAULT_MAX_AREA,
        }
    }
}
