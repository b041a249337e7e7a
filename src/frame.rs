//! Frame representation and preprocessing.
//!
//! - `RawImage`: pixel buffer as delivered by a frame source, any channel depth.
//! - `Frame`: single-channel, smoothed luminance buffer. Immutable once built.
//! - `Preprocessor`: grayscale conversion plus a fixed-radius gaussian low-pass.
//!
//! A `Frame` is the only thing the motion stage ever sees; raw buffers are
//! dropped once preprocessing is done.

use image::{imageops, DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, Rgba};
use imageproc::filter::separable_filter_equal;

use crate::DensityError;

/// Kernel radius of the default low-pass (25x25 kernel).
pub const DEFAULT_BLUR_RADIUS: u32 = 12;
/// Standard deviation of the default low-pass.
pub const DEFAULT_BLUR_SIGMA: f32 = 3.0;

// ----------------------------------------------------------------------------
// RawImage: source pixel buffer
// ----------------------------------------------------------------------------

/// Channel layout of a `RawImage`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Luma8,
    Rgb8,
    Rgba8,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Luma8 => 1,
            PixelLayout::Rgb8 => 3,
            PixelLayout::Rgba8 => 4,
        }
    }
}

/// Pixel buffer handed over by a frame source.
///
/// The buffer is not validated on construction; the preprocessor rejects
/// buffers whose length does not match the declared dimensions.
pub struct RawImage {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    /// Wall-clock capture time, seconds since epoch.
    pub captured_at_s: u64,
}

impl RawImage {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        layout: PixelLayout,
        captured_at_s: u64,
    ) -> Self {
        Self {
            data,
            width,
            height,
            layout,
            captured_at_s,
        }
    }

    /// Decode an encoded image (JPEG/PNG) into a raw pixel buffer.
    pub fn decode(bytes: &[u8], captured_at_s: u64) -> Result<Self, DensityError> {
        if bytes.is_empty() {
            return Err(DensityError::decode("empty image payload"));
        }
        let image = image::load_from_memory(bytes)
            .map_err(|e| DensityError::decode(format!("decode image: {}", e)))?;
        Ok(Self::from_dynamic(image, captured_at_s))
    }

    pub fn from_dynamic(image: DynamicImage, captured_at_s: u64) -> Self {
        let (width, height) = (image.width(), image.height());
        let (data, layout) = match image {
            DynamicImage::ImageLuma8(buf) => (buf.into_raw(), PixelLayout::Luma8),
            DynamicImage::ImageRgba8(buf) => (buf.into_raw(), PixelLayout::Rgba8),
            other => (other.into_rgb8().into_raw(), PixelLayout::Rgb8),
        };
        Self::new(data, width, height, layout, captured_at_s)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.layout.channels())
    }

    fn to_luma(&self) -> Result<GrayImage, DensityError> {
        let expected = self
            .expected_len()
            .ok_or_else(|| DensityError::decode("image dimensions overflow"))?;
        if self.width == 0 || self.height == 0 || self.data.len() != expected {
            return Err(DensityError::decode(format!(
                "pixel buffer of {} bytes does not match {}x{} {:?}",
                self.data.len(),
                self.width,
                self.height,
                self.layout
            )));
        }
        let malformed = || DensityError::decode("pixel buffer rejected by image container");
        let data = self.data.as_slice();
        let gray = match self.layout {
            PixelLayout::Luma8 => {
                let view = ImageBuffer::<Luma<u8>, &[u8]>::from_raw(self.width, self.height, data)
                    .ok_or_else(malformed)?;
                imageops::grayscale(&view)
            }
            PixelLayout::Rgb8 => {
                let view = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(self.width, self.height, data)
                    .ok_or_else(malformed)?;
                imageops::grayscale(&view)
            }
            PixelLayout::Rgba8 => {
                let view = ImageBuffer::<Rgba<u8>, &[u8]>::from_raw(self.width, self.height, data)
                    .ok_or_else(malformed)?;
                imageops::grayscale(&view)
            }
        };
        Ok(gray)
    }
}

// ----------------------------------------------------------------------------
// Frame: preprocessed luminance buffer
// ----------------------------------------------------------------------------

/// Noise-reduced luminance buffer. No mutation after creation.
#[derive(Clone, Debug)]
pub struct Frame {
    image: GrayImage,
    pub captured_at_s: u64,
}

impl Frame {
    pub(crate) fn new(image: GrayImage, captured_at_s: u64) -> Self {
        Self {
            image,
            captured_at_s,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Pixel-identical comparison (ignores capture time).
    pub fn same_pixels(&self, other: &Frame) -> bool {
        self.dimensions() == other.dimensions() && self.pixels() == other.pixels()
    }
}

// ----------------------------------------------------------------------------
// Preprocessor
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct PreprocessSettings {
    /// Gaussian kernel radius in pixels; the kernel is `2r + 1` wide. 0 disables smoothing.
    pub blur_radius: u32,
    /// Gaussian standard deviation.
    pub blur_sigma: f32,
    /// Reject frames that are not exactly this size.
    pub expected_dimensions: Option<(u32, u32)>,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            blur_radius: DEFAULT_BLUR_RADIUS,
            blur_sigma: DEFAULT_BLUR_SIGMA,
            expected_dimensions: None,
        }
    }
}

/// Converts a raw image to a smoothed luminance `Frame`. Stateless.
pub struct Preprocessor {
    settings: PreprocessSettings,
    kernel: Vec<f32>,
}

impl Preprocessor {
    pub fn new(settings: PreprocessSettings) -> Self {
        let kernel = gaussian_kernel(settings.blur_radius, settings.blur_sigma);
        Self { settings, kernel }
    }

    pub fn settings(&self) -> &PreprocessSettings {
        &self.settings
    }

    pub fn preprocess(&self, raw: &RawImage) -> Result<Frame, DensityError> {
        if let Some((width, height)) = self.settings.expected_dimensions {
            if (raw.width, raw.height) != (width, height) {
                return Err(DensityError::decode(format!(
                    "frame is {}x{}, expected {}x{}",
                    raw.width, raw.height, width, height
                )));
            }
        }

        let gray = raw.to_luma()?;
        let smoothed = if self.kernel.len() > 1 {
            separable_filter_equal(&gray, &self.kernel)
        } else {
            gray
        };
        Ok(Frame::new(smoothed, raw.captured_at_s))
    }
}

/// Normalised 1-D gaussian weights for `-radius..=radius`.
fn gaussian_kernel(radius: u32, sigma: f32) -> Vec<f32> {
    if radius == 0 || sigma <= 0.0 {
        return vec![1.0];
    }
    let r = radius as i32;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-r..=r)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for weight in kernel.iter_mut() {
        *weight /= sum;
    }
    kernel
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_rgb(width: u32, height: u32, value: u8) -> RawImage {
        RawImage::new(
            vec![value; (width * height * 3) as usize],
            width,
            height,
            PixelLayout::Rgb8,
            0,
        )
    }

    #[test]
    fn gaussian_kernel_is_normalised_and_symmetric() {
        let kernel = gaussian_kernel(12, 3.0);
        assert_eq!(kernel.len(), 25);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert_eq!(kernel[0], kernel[24]);
        assert!(kernel[12] > kernel[11]);
    }

    #[test]
    fn zero_radius_disables_smoothing() {
        assert_eq!(gaussian_kernel(0, 3.0), vec![1.0]);
    }

    #[test]
    fn preprocess_produces_single_channel_frame() {
        let pre = Preprocessor::new(PreprocessSettings::default());
        let frame = pre.preprocess(&flat_rgb(64, 48, 200)).unwrap();
        assert_eq!(frame.dimensions(), (64, 48));
        assert_eq!(frame.pixels().len(), 64 * 48);
    }

    #[test]
    fn preprocess_keeps_flat_field_flat_without_blur() {
        let pre = Preprocessor::new(PreprocessSettings {
            blur_radius: 0,
            ..PreprocessSettings::default()
        });
        let raw = RawImage::new(vec![90; 16 * 16], 16, 16, PixelLayout::Luma8, 7);
        let frame = pre.preprocess(&raw).unwrap();
        assert!(frame.pixels().iter().all(|&p| p == 90));
        assert_eq!(frame.captured_at_s, 7);
    }

    #[test]
    fn preprocess_rejects_short_buffer() {
        let pre = Preprocessor::new(PreprocessSettings::default());
        let raw = RawImage::new(vec![0; 10], 64, 48, PixelLayout::Rgb8, 0);
        let err = pre.preprocess(&raw).unwrap_err();
        assert!(matches!(err, DensityError::Decode(_)));
    }

    #[test]
    fn preprocess_rejects_unexpected_dimensions() {
        let pre = Preprocessor::new(PreprocessSettings {
            expected_dimensions: Some((1280, 960)),
            ..PreprocessSettings::default()
        });
        let err = pre.preprocess(&flat_rgb(64, 48, 0)).unwrap_err();
        assert!(matches!(err, DensityError::Decode(_)));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            RawImage::decode(b"definitely not a jpeg", 0),
            Err(DensityError::Decode(_))
        ));
        assert!(matches!(RawImage::decode(&[], 0), Err(DensityError::Decode(_))));
    }

    #[test]
    fn decode_round_trips_png() {
        let mut png = Vec::new();
        let image = GrayImage::from_pixel(8, 4, Luma([42]));
        DynamicImage::ImageLuma8(image)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let raw = RawImage::decode(&png, 5).unwrap();
        assert_eq!((raw.width, raw.height), (8, 4));
        assert_eq!(raw.layout, PixelLayout::Luma8);
        assert_eq!(raw.captured_at_s, 5);
    }

    #[test]
    fn same_pixels_ignores_capture_time() {
        let a = Frame::new(GrayImage::from_pixel(4, 4, Luma([1])), 1);
        let b = Frame::new(GrayImage::from_pixel(4, 4, Luma([1])), 2);
        let c = Frame::new(GrayImage::from_pixel(4, 4, Luma([2])), 2);
        assert!(a.same_pixels(&b));
        assert!(!a.same_pixels(&c));
    }
}
