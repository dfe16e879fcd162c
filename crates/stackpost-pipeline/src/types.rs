//! Shared types for the stackpost pixel pipeline.

use serde::{Deserialize, Serialize};

/// Single-channel floating-point image.
///
/// Pixel values are nominally in `[0, 1]`; intermediate stages (e.g.
/// normalization to a wider range, or sharpening overshoot) may leave
/// that range until the tone curve clamps it.
pub type Mono32FImage = image::ImageBuffer<image::Luma<f32>, Vec<f32>>;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an image.
    #[must_use]
    pub fn of(image: &Mono32FImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Number of pixels.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Axis-aligned rectangle.
///
/// Used in three coordinate spaces: logical (image pixels),
/// scaled-logical (logical multiplied by the view zoom) and physical
/// (scaled-logical minus the scroll offset). Coordinates are signed
/// because a physical rectangle may start left of or above the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    #[must_use]
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering a whole image.
    #[must_use]
    pub fn covering(dimensions: Dimensions) -> Self {
        Self::new(
            0,
            0,
            i32::try_from(dimensions.width).unwrap_or(i32::MAX),
            i32::try_from(dimensions.height).unwrap_or(i32::MAX),
        )
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Intersection with the bounds of an image of `dimensions`.
    ///
    /// The result is empty (zero width or height) when the rectangle
    /// lies entirely outside the image.
    #[must_use]
    pub fn clipped_to(&self, dimensions: Dimensions) -> Self {
        let bounds = Self::covering(dimensions);
        let left = self.x.max(bounds.x);
        let top = self.y.max(bounds.y);
        let right = self.x.saturating_add(self.width).min(bounds.width);
        let bottom = self.y.saturating_add(self.height).min(bounds.height);
        if right <= left || bottom <= top {
            return Self::new(left.min(bounds.width), top.min(bounds.height), 0, 0);
        }
        Self::new(left, top, right - left, bottom - top)
    }

    /// Scale position and size by `factor`, rounding to whole pixels.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn scaled(&self, factor: f64) -> Self {
        let scale = |v: i32| (f64::from(v) * factor).round() as i32;
        Self::new(
            scale(self.x),
            scale(self.y),
            scale(self.width),
            scale(self.height),
        )
    }

    /// Shift the rectangle by `(-dx, -dy)`.
    #[must_use]
    pub const fn offset_back(&self, dx: i32, dy: i32) -> Self {
        Self::new(
            self.x.saturating_sub(dx),
            self.y.saturating_sub(dy),
            self.width,
            self.height,
        )
    }

    /// Copy the part of `image` covered by this rectangle.
    ///
    /// The rectangle is clipped to the image first, so the result may
    /// be smaller than requested (or empty).
    #[must_use]
    pub fn crop(&self, image: &Mono32FImage) -> Mono32FImage {
        let clipped = self.clipped_to(Dimensions::of(image));
        let (x, y, w, h) = clipped.as_unsigned();
        image::imageops::crop_imm(image, x, y, w, h).to_image()
    }

    /// Non-negative components as `u32`, negative values map to zero.
    #[must_use]
    pub fn as_unsigned(&self) -> (u32, u32, u32, u32) {
        let to_u32 = |v: i32| u32::try_from(v).unwrap_or(0);
        (
            to_u32(self.x),
            to_u32(self.y),
            to_u32(self.width),
            to_u32(self.height),
        )
    }
}

/// A stage of the pixel pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Normalization,
    Deconvolution,
    UnsharpMasking,
    ToneCurve,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Normalization => "normalization",
            Self::Deconvolution => "Lucy-Richardson deconvolution",
            Self::UnsharpMasking => "unsharp masking",
            Self::ToneCurve => "tone curve",
        };
        f.write_str(name)
    }
}

/// Progress report passed to a pipeline checkpoint.
///
/// `step` counts completed units of work within `stage` out of `total`
/// (deconvolution iterations; single-step stages report `1/1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageProgress {
    pub stage: Stage,
    pub step: u32,
    pub total: u32,
}

/// Errors from the pixel pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A checkpoint requested the run to stop.
    #[error("processing cancelled")]
    Cancelled,

    /// The input image has no pixels.
    #[error("input image is empty")]
    EmptyInput,
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIMS: Dimensions = Dimensions {
        width: 100,
        height: 50,
    };

    #[test]
    fn clip_inside_is_unchanged() {
        let r = Rect::new(10, 10, 20, 20);
        assert_eq!(r.clipped_to(DIMS), r);
    }

    #[test]
    fn clip_partially_outside() {
        let r = Rect::new(-5, 40, 20, 20);
        assert_eq!(r.clipped_to(DIMS), Rect::new(0, 40, 15, 10));
    }

    #[test]
    fn clip_fully_outside_is_empty() {
        let r = Rect::new(200, 10, 20, 20);
        assert!(r.clipped_to(DIMS).is_empty());
    }

    #[test]
    fn crop_copies_region() {
        let image = Mono32FImage::from_fn(8, 8, |x, y| image::Luma([(x + 10 * y) as f32]));
        let crop = Rect::new(2, 3, 4, 2).crop(&image);
        assert_eq!(crop.dimensions(), (4, 2));
        assert_eq!(crop.get_pixel(0, 0).0[0], 32.0);
        assert_eq!(crop.get_pixel(3, 1).0[0], 45.0);
    }

    #[test]
    fn scaled_and_offset() {
        let r = Rect::new(10, 20, 30, 40).scaled(1.5);
        assert_eq!(r, Rect::new(15, 30, 45, 60));
        assert_eq!(r.offset_back(5, 10), Rect::new(10, 20, 45, 60));
    }
}
