use image::GrayImage;
use imageproc::contours::find_contours;
use imageproc::point::Point;

use super::region::Region;
use crate::frame::Frame;
use crate::DensityError;

/// Default intensity cut for the difference mask (of 255).
///
/// Lower values pick up compression noise; higher values miss slow movers.
pub const DEFAULT_DIFF_THRESHOLD: u8 = 15;

const MASK_ON: u8 = 255;

/// Turns two consecutive frames into the regions that changed between them.
#[derive(Clone, Debug)]
pub struct MotionExtractor {
    diff_threshold: u8,
}

impl MotionExtractor {
    pub fn new(diff_threshold: u8) -> Self {
        Self { diff_threshold }
    }

    pub fn diff_threshold(&self) -> u8 {
        self.diff_threshold
    }

    /// Binary mask of pixels whose absolute difference exceeds the threshold.
    pub fn difference_mask(&self, previous: &Frame, current: &Frame) -> Result<GrayImage, DensityError> {
        ensure_same_dimensions(previous, current)?;
        let (width, height) = current.dimensions();
        let data: Vec<u8> = previous
            .pixels()
            .iter()
            .zip(current.pixels())
            .map(|(&a, &b)| {
                if a.abs_diff(b) > self.diff_threshold {
                    MASK_ON
                } else {
                    0
                }
            })
            .collect();
        GrayImage::from_raw(width, height, data)
            .ok_or_else(|| DensityError::decode("difference mask does not fit frame dimensions"))
    }

    /// Extract one region per external contour of the difference mask.
    ///
    /// Pixel-identical frames short-circuit to an empty set. Region order is
    /// unspecified.
    pub fn extract(&self, previous: &Frame, current: &Frame) -> Result<Vec<Region>, DensityError> {
        ensure_same_dimensions(previous, current)?;
        if previous.same_pixels(current) {
            return Ok(Vec::new());
        }

        let mask = self.difference_mask(previous, current)?;
        if !mask.as_raw().contains(&MASK_ON) {
            return Ok(Vec::new());
        }

        // find_contours misreads blobs touching column 0, so trace a mask
        // with a one-pixel empty frame and shift the points back.
        let padded = pad_mask(&mask);
        let regions = find_contours::<i32>(&padded)
            .into_iter()
            .filter(|c| c.parent.is_none())
            .filter_map(|c| {
                let points = c
                    .points
                    .into_iter()
                    .map(|p| Point::new(p.x - 1, p.y - 1))
                    .collect();
                Region::from_polygon(points)
            })
            .collect();
        Ok(regions)
    }
}

fn pad_mask(mask: &GrayImage) -> GrayImage {
    let mut padded = GrayImage::new(mask.width() + 2, mask.height() + 2);
    for (x, y, pixel) in mask.enumerate_pixels() {
        padded.put_pixel(x + 1, y + 1, *pixel);
    }
    padded
}

impl Default for MotionExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_DIFF_THRESHOLD)
    }
}

fn ensure_same_dimensions(previous: &Frame, current: &Frame) -> Result<(), DensityError> {
    if previous.dimensions() != current.dimensions() {
        return Err(DensityError::DimensionMismatch {
            previous: previous.dimensions(),
            current: current.dimensions(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn frame_with_squares(width: u32, height: u32, squares: &[(u32, u32, u32, u8)]) -> Frame {
        let mut image = GrayImage::from_pixel(width, height, Luma([20]));
        for &(x0, y0, side, value) in squares {
            for y in y0..y0 + side {
                for x in x0..x0 + side {
                    image.put_pixel(x, y, Luma([value]));
                }
            }
        }
        Frame::new(image, 0)
    }

    #[test]
    fn identical_frames_yield_no_regions() {
        let extractor = MotionExtractor::default();
        let a = frame_with_squares(100, 80, &[(10, 10, 20, 200)]);
        let b = frame_with_squares(100, 80, &[(10, 10, 20, 200)]);
        assert!(extractor.extract(&a, &b).unwrap().is_empty());
    }

    #[test]
    fn mismatched_dimensions_are_reported() {
        let extractor = MotionExtractor::default();
        let a = frame_with_squares(100, 80, &[]);
        let b = frame_with_squares(80, 100, &[]);
        assert_eq!(
            extractor.extract(&a, &b).unwrap_err(),
            DensityError::DimensionMismatch {
                previous: (100, 80),
                current: (80, 100)
            }
        );
    }

    #[test]
    fn sub_threshold_change_is_ignored() {
        let extractor = MotionExtractor::default();
        let a = frame_with_squares(100, 80, &[]);
        // 20 -> 35 is a difference of exactly 15: not above the cut.
        let b = frame_with_squares(100, 80, &[(10, 10, 20, 35)]);
        assert!(extractor.extract(&a, &b).unwrap().is_empty());
        let c = frame_with_squares(100, 80, &[(10, 10, 20, 36)]);
        assert_eq!(extractor.extract(&a, &c).unwrap().len(), 1);
    }

    #[test]
    fn difference_is_absolute() {
        let extractor = MotionExtractor::default();
        let bright = frame_with_squares(100, 80, &[(30, 30, 20, 220)]);
        let dark = frame_with_squares(100, 80, &[]);
        // Object leaving (bright -> dark) is detected as well as arriving.
        assert_eq!(extractor.extract(&bright, &dark).unwrap().len(), 1);
        assert_eq!(extractor.extract(&dark, &bright).unwrap().len(), 1);
    }

    #[test]
    fn each_component_becomes_one_region() {
        let extractor = MotionExtractor::default();
        let a = frame_with_squares(120, 80, &[]);
        let b = frame_with_squares(120, 80, &[(5, 5, 20, 200), (60, 40, 30, 200)]);
        let mut regions = extractor.extract(&a, &b).unwrap();
        regions.sort_by_key(|r| r.x);
        assert_eq!(regions.len(), 2);
        assert_eq!((regions[0].x, regions[0].y, regions[0].w, regions[0].h), (5, 5, 20, 20));
        assert_eq!(regions[0].area, 19.0 * 19.0);
        assert_eq!((regions[1].x, regions[1].y, regions[1].w, regions[1].h), (60, 40, 30, 30));
    }

    fn single_region(square: (u32, u32, u32, u8)) -> Region {
        let extractor = MotionExtractor::default();
        let a = frame_with_squares(100, 80, &[]);
        let b = frame_with_squares(100, 80, &[square]);
        let mut regions = extractor.extract(&a, &b).unwrap();
        assert_eq!(regions.len(), 1, "square {:?}", square);
        regions.remove(0)
    }

    #[test]
    fn regions_touching_each_border_are_kept() {
        let cases = [
            // left, top, right, bottom, top-left corner
            ((0, 30, 20, 200), (0, 30)),
            ((40, 0, 20, 200), (40, 0)),
            ((80, 30, 20, 200), (80, 30)),
            ((40, 60, 20, 200), (40, 60)),
            ((0, 0, 20, 200), (0, 0)),
        ];
        for (square, origin) in cases {
            let region = single_region(square);
            assert_eq!((region.x, region.y), origin, "square {:?}", square);
            assert_eq!((region.w, region.h), (20, 20), "square {:?}", square);
            assert_eq!(region.area, 19.0 * 19.0, "square {:?}", square);
        }
    }

    #[test]
    fn full_width_change_is_one_region() {
        let region = single_region((0, 0, 80, 200));
        assert_eq!((region.x, region.y, region.w, region.h), (0, 0, 80, 80));
    }

    #[test]
    fn nested_contours_are_not_reported() {
        let extractor = MotionExtractor::default();
        let a = frame_with_squares(100, 100, &[]);
        // Ring: bright 60x60 with an unchanged 30x30 hole holding a bright 10x10 island.
        let b = frame_with_squares(
            100,
            100,
            &[(20, 20, 60, 200), (35, 35, 30, 20), (45, 45, 10, 200)],
        );
        let regions = extractor.extract(&a, &b).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!((regions[0].w, regions[0].h), (60, 60));
    }
}
