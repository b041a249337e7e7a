use crate::frame::{PixelLayout, RawImage};
use crate::DensityError;

use super::{FrameSource, SourceStats};

pub const SCENE_WIDTH: u32 = 960;
pub const SCENE_HEIGHT: u32 = 540;

const BACKGROUND: u8 = 16;
const OBJECT: u8 = 235;
const OBJECT_SIDE: u32 = 40;
const OBJECT_TOP: u32 = 455;
const OBJECT_FIRST_X: u32 = 40;
const OBJECT_STEP_X: u32 = 80;
/// Frames per transit in which the object is visible.
const VISIBLE_FRAMES: u64 = 10;
/// Visible frames plus the empty gap after them.
const CYCLE_FRAMES: u64 = 16;

const MARKER_SIDE: u32 = 6;
const MARKER_OFFSET: u32 = 8;

/// Deterministic scene: a bright square sweeps left to right through the
/// default collision box, disappears for a few frames, and starts over.
///
/// A tiny marker in the top-left corner flickers every frame so no two
/// consecutive frames are pixel-identical; it is far below the default
/// minimum region area.
pub struct SyntheticSource {
    name: String,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(name: &str) -> Self {
        log::info!("synthetic source stub://{} ready", name);
        Self {
            name: name.to_string(),
            frame_count: 0,
        }
    }

    /// Top-left corner of the square in frame `index`, if visible.
    pub fn object_position(index: u64) -> Option<(u32, u32)> {
        let phase = index % CYCLE_FRAMES;
        if phase >= VISIBLE_FRAMES {
            return None;
        }
        Some((OBJECT_FIRST_X + phase as u32 * OBJECT_STEP_X, OBJECT_TOP))
    }

    fn render(&self, index: u64) -> Vec<u8> {
        let width = SCENE_WIDTH as usize;
        let mut pixels = vec![BACKGROUND; width * SCENE_HEIGHT as usize];

        let marker = if index % 2 == 0 { BACKGROUND } else { BACKGROUND + 64 };
        fill(&mut pixels, width, MARKER_OFFSET, MARKER_OFFSET, MARKER_SIDE, marker);

        if let Some((x, y)) = Self::object_position(index) {
            fill(&mut pixels, width, x, y, OBJECT_SIDE, OBJECT);
        }
        pixels
    }
}

fn fill(pixels: &mut [u8], stride: usize, x0: u32, y0: u32, side: u32, value: u8) {
    for y in y0..y0 + side {
        let row = y as usize * stride;
        pixels[row + x0 as usize..row + (x0 + side) as usize].fill(value);
    }
}

impl FrameSource for SyntheticSource {
    fn fetch(&mut self) -> Result<RawImage, DensityError> {
        let index = self.frame_count;
        self.frame_count += 1;
        let captured_at_s = crate::now_s().map_err(|e| DensityError::decode(format!("clock: {}", e)))?;
        Ok(RawImage::new(
            self.render(index),
            SCENE_WIDTH,
            SCENE_HEIGHT,
            PixelLayout::Luma8,
            captured_at_s,
        ))
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_fetched: self.frame_count,
            ..SourceStats::default()
        }
    }

    fn describe(&self) -> String {
        format!("stub://{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_frames_differ() {
        let mut source = SyntheticSource::new("test");
        let a = source.fetch().unwrap();
        let b = source.fetch().unwrap();
        assert_ne!(a.pixels(), b.pixels());
        assert_eq!(a.byte_len(), (SCENE_WIDTH * SCENE_HEIGHT) as usize);
    }

    #[test]
    fn object_stays_inside_default_box_while_visible() {
        for index in 0..CYCLE_FRAMES {
            if let Some((x, y)) = SyntheticSource::object_position(index) {
                assert!(x + OBJECT_SIDE < 900);
                assert!(y > 450 && y + OBJECT_SIDE < 500);
            }
        }
        assert!(SyntheticSource::object_position(VISIBLE_FRAMES).is_none());
        assert!(SyntheticSource::object_position(CYCLE_FRAMES).is_some());
    }
}
