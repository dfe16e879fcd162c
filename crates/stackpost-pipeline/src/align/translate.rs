//! Sub-pixel translation by bilinear resampling.
//!
//! Wraps [`imageproc::geometric_transformations::warp`] with a pure
//! translation.

use imageproc::geometric_transformations::{Interpolation, Projection, warp};

use super::Translation;
use crate::types::Mono32FImage;

/// Move the content of `image` by `shift`: the output pixel at `p`
/// samples the input at `p - shift`. Output pixels whose bilinear
/// footprint leaves the input are zero.
#[must_use = "returns the shifted image"]
pub fn translate(image: &Mono32FImage, shift: Translation) -> Mono32FImage {
    warp(
        image,
        &Projection::translate(shift.dx, shift.dy),
        Interpolation::Bilinear,
        image::Luma([0.0]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient() -> Mono32FImage {
        Mono32FImage::from_fn(6, 4, |x, y| image::Luma([(x + 6 * y) as f32 / 24.0]))
    }

    fn value(image: &Mono32FImage, x: u32, y: u32) -> f32 {
        image.get_pixel(x, y).0[0]
    }

    #[test]
    fn zero_shift_keeps_interior() {
        let image = gradient();
        let out = translate(&image, Translation::default());
        assert_eq!(out.dimensions(), image.dimensions());
        for y in 0..3 {
            for x in 0..5 {
                assert!((value(&out, x, y) - value(&image, x, y)).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn integer_shift_moves_pixels_and_zero_fills() {
        let image = gradient();
        let out = translate(&image, Translation::new(2.0, 1.0));
        assert!((value(&out, 2, 1) - value(&image, 0, 0)).abs() < 1e-6);
        assert!((value(&out, 4, 2) - value(&image, 2, 1)).abs() < 1e-6);
        assert!(value(&out, 0, 0).abs() < f32::EPSILON);
        assert!(value(&out, 1, 3).abs() < f32::EPSILON);
    }

    #[test]
    fn half_pixel_shift_averages_neighbours() {
        let image = gradient();
        let out = translate(&image, Translation::new(0.5, 0.0));
        let expected = (value(&image, 1, 2) + value(&image, 2, 2)) / 2.0;
        assert!((value(&out, 2, 2) - expected).abs() < 1e-6);
    }

    #[test]
    fn values_above_one_survive_the_shift() {
        let bright = Mono32FImage::from_pixel(8, 8, image::Luma([2.5]));
        let out = translate(&bright, Translation::new(-0.25, 0.5));
        assert!((value(&out, 3, 3) - 2.5).abs() < 1e-5);
    }
}
