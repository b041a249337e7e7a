use anyhow::{anyhow, Result};
use imageproc::point::Point;

use super::region::Region;
use crate::validate_zone_id;

const EDGE_EPSILON: f64 = 1e-9;

/// A fixed detection polygon in frame coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Zone {
    id: String,
    polygon: Vec<Point<f64>>,
}

impl Zone {
    pub fn new(id: &str, polygon: Vec<Point<f64>>) -> Result<Self> {
        validate_zone_id(id)?;
        if polygon.len() < 3 {
            return Err(anyhow!(
                "zone {} needs at least 3 points, got {}",
                id,
                polygon.len()
            ));
        }
        if polygon.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(anyhow!("zone {} has non-finite coordinates", id));
        }
        let zone = Self {
            id: id.to_lowercase(),
            polygon,
        };
        if zone.area() == 0.0 {
            return Err(anyhow!("zone {} encloses no area", id));
        }
        Ok(zone)
    }

    /// Axis-aligned rectangle `x..x+w`, `y..y+h`.
    pub fn rect(id: &str, x: f64, y: f64, w: f64, h: f64) -> Result<Self> {
        if w <= 0.0 || h <= 0.0 {
            return Err(anyhow!("zone {} rect must have positive width and height", id));
        }
        Self::new(
            id,
            vec![
                Point::new(x, y),
                Point::new(x + w, y),
                Point::new(x + w, y + h),
                Point::new(x, y + h),
            ],
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn polygon(&self) -> &[Point<f64>] {
        &self.polygon
    }

    fn edges(&self) -> impl Iterator<Item = (Point<f64>, Point<f64>)> + '_ {
        self.polygon
            .iter()
            .copied()
            .zip(self.polygon.iter().copied().cycle().skip(1))
    }

    fn area(&self) -> f64 {
        let twice: f64 = self.edges().map(|(a, b)| a.x * b.y - b.x * a.y).sum();
        twice.abs() / 2.0
    }

    /// Strict containment: points on an edge or vertex are outside.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let mut inside = false;
        for (a, b) in self.edges() {
            if on_segment(x, y, a, b) {
                return false;
            }
            if (a.y > y) != (b.y > y) {
                let x_cross = a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y);
                if x < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }
}

fn on_segment(x: f64, y: f64, a: Point<f64>, b: Point<f64>) -> bool {
    let cross = (b.x - a.x) * (y - a.y) - (b.y - a.y) * (x - a.x);
    if cross.abs() > EDGE_EPSILON {
        return false;
    }
    x >= a.x.min(b.x) - EDGE_EPSILON
        && x <= a.x.max(b.x) + EDGE_EPSILON
        && y >= a.y.min(b.y) - EDGE_EPSILON
        && y <= a.y.max(b.y) + EDGE_EPSILON
}

/// A region whose centroid lies inside a zone. Indices refer to the
/// region slice and the matcher's zone list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZoneMatch {
    pub region: usize,
    pub zone: usize,
}

/// Tests region centroids against the configured zones.
#[derive(Clone, Debug)]
pub struct ZoneMatcher {
    zones: Vec<Zone>,
}

impl ZoneMatcher {
    pub fn new(zones: Vec<Zone>) -> Self {
        Self { zones }
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// One match per (region, zone) pair. Degenerate regions never match.
    pub fn match_regions(&self, regions: &[Region]) -> Vec<ZoneMatch> {
        let mut matches = Vec::new();
        for (region_idx, region) in regions.iter().enumerate() {
            let Some((cx, cy)) = region.centroid() else {
                log::trace!(
                    "degenerate region at ({}, {}) skipped",
                    region.x,
                    region.y
                );
                continue;
            };
            for (zone_idx, zone) in self.zones.iter().enumerate() {
                if zone.contains(cx, cy) {
                    matches.push(ZoneMatch {
                        region: region_idx,
                        zone: zone_idx,
                    });
                }
            }
        }
        matches
    }

    /// Per-zone "matched this pass" flags, in zone order.
    pub fn occupancy(&self, matches: &[ZoneMatch]) -> Vec<bool> {
        let mut occupied = vec![false; self.zones.len()];
        for m in matches {
            if let Some(flag) = occupied.get_mut(m.zone) {
                *flag = true;
            }
        }
        occupied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region_at(x: i32, y: i32, side: i32) -> Region {
        let far = side - 1;
        Region::from_polygon(vec![
            Point::new(x, y),
            Point::new(x + far, y),
            Point::new(x + far, y + far),
            Point::new(x, y + far),
        ])
        .unwrap()
    }

    #[test]
    fn rect_zone_contains_interior_point() {
        let zone = Zone::rect("zone:collision_box", 0.0, 450.0, 900.0, 50.0).unwrap();
        assert!(zone.contains(450.0, 475.0));
        assert!(!zone.contains(450.0, 520.0));
    }

    #[test]
    fn points_on_edges_and_vertices_are_outside() {
        let zone = Zone::rect("zone:collision_box", 0.0, 450.0, 900.0, 50.0).unwrap();
        assert!(!zone.contains(100.0, 450.0));
        assert!(!zone.contains(100.0, 500.0));
        assert!(!zone.contains(0.0, 470.0));
        assert!(!zone.contains(900.0, 470.0));
        assert!(!zone.contains(900.0, 500.0));
        assert!(zone.contains(899.5, 499.5));
    }

    #[test]
    fn slanted_edge_is_exclusive() {
        let zone = Zone::new(
            "zone:triangle",
            vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0), Point::new(0.0, 10.0)],
        )
        .unwrap();
        assert!(zone.contains(2.0, 2.0));
        assert!(!zone.contains(5.0, 5.0));
        assert!(!zone.contains(6.0, 6.0));
    }

    #[test]
    fn concave_polygon_containment() {
        // U shape: notch between x=4..6 from y=4 up.
        let zone = Zone::new(
            "zone:u_shape",
            vec![
                Point::new(0.0, 0.0),
                Point::new(10.0, 0.0),
                Point::new(10.0, 10.0),
                Point::new(6.0, 10.0),
                Point::new(6.0, 4.0),
                Point::new(4.0, 4.0),
                Point::new(4.0, 10.0),
                Point::new(0.0, 10.0),
            ],
        )
        .unwrap();
        assert!(zone.contains(2.0, 8.0));
        assert!(zone.contains(8.0, 8.0));
        assert!(!zone.contains(5.0, 8.0));
        assert!(zone.contains(5.0, 2.0));
    }

    #[test]
    fn zone_validation() {
        assert!(Zone::new("zone:a", vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)]).is_err());
        assert!(Zone::new(
            "zone:flat",
            vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0), Point::new(2.0, 0.0)]
        )
        .is_err());
        assert!(Zone::rect("not a zone", 0.0, 0.0, 1.0, 1.0).is_err());
        assert!(Zone::rect("zone:empty", 0.0, 0.0, 0.0, 1.0).is_err());
        assert_eq!(Zone::rect("ZONE:Upper", 0.0, 0.0, 1.0, 1.0).unwrap().id(), "zone:upper");
    }

    #[test]
    fn region_may_match_several_zones() {
        let matcher = ZoneMatcher::new(vec![
            Zone::rect("zone:wide", 0.0, 0.0, 200.0, 200.0).unwrap(),
            Zone::rect("zone:narrow", 40.0, 40.0, 30.0, 30.0).unwrap(),
            Zone::rect("zone:elsewhere", 150.0, 150.0, 40.0, 40.0).unwrap(),
        ]);
        let regions = vec![region_at(40, 40, 40)];
        let matches = matcher.match_regions(&regions);
        assert_eq!(
            matches,
            vec![ZoneMatch { region: 0, zone: 0 }, ZoneMatch { region: 0, zone: 1 }]
        );
        assert_eq!(matcher.occupancy(&matches), vec![true, true, false]);
    }

    #[test]
    fn centroid_on_zone_edge_does_not_match() {
        let matcher = ZoneMatcher::new(vec![Zone::rect("zone:box", 0.0, 0.0, 60.0, 60.0).unwrap()]);
        // Bounding box 40..80 -> centroid x = 40 + 40/2 = 60, exactly on the right edge.
        let regions = vec![region_at(40, 10, 40)];
        assert!(matcher.match_regions(&regions).is_empty());
    }

    #[test]
    fn degenerate_region_fails_closed() {
        let matcher = ZoneMatcher::new(vec![Zone::rect("zone:box", 0.0, 0.0, 60.0, 60.0).unwrap()]);
        let dot = Region::from_polygon(vec![Point::new(30, 30)]).unwrap();
        assert!(matcher.match_regions(&[dot]).is_empty());
    }
}
