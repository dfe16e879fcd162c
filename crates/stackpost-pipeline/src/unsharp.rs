//! Unsharp masking, optionally with a brightness-adaptive amount.
//!
//! `out = amount * in + (1 - amount) * blur(in)`, which is the input plus
//! `amount - 1` times the high-pass layer `in - blur(in)`. In adaptive
//! mode the amount per pixel follows the cubic transition in
//! [`crate::settings::AdaptiveCurve`], driven by the blurred (local)
//! brightness so that noise in dark background areas is not amplified.

use crate::blur::gaussian_blur;
use crate::settings::UnsharpMask;
use crate::types::Mono32FImage;

/// Apply unsharp masking.
///
/// Ineffective settings (see [`UnsharpMask::is_effective`]) return the
/// input unchanged.
#[must_use = "returns the sharpened image"]
pub fn unsharp_mask(image: &Mono32FImage, settings: &UnsharpMask) -> Mono32FImage {
    if !settings.is_effective() {
        return image.clone();
    }

    let blurred = gaussian_blur(image, settings.sigma);
    let mut out = image.clone();
    for (o, b) in out.pixels_mut().zip(blurred.pixels()) {
        let local = b.0[0];
        let amount = settings.amount_at(local);
        o.0[0] = amount.mul_add(o.0[0], (1.0 - amount) * local);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge_image() -> Mono32FImage {
        let base = Mono32FImage::from_fn(24, 8, |x, _| image::Luma([if x < 12 { 0.2 } else { 0.6 }]));
        gaussian_blur(&base, 1.0)
    }

    #[test]
    fn unit_amount_is_identity() {
        let image = edge_image();
        assert_eq!(unsharp_mask(&image, &UnsharpMask::default()), image);
    }

    #[test]
    fn amount_above_one_increases_edge_contrast() {
        let image = edge_image();
        let settings = UnsharpMask {
            amount_max: 3.0,
            ..UnsharpMask::default()
        };
        let out = unsharp_mask(&image, &settings);
        let before = image.get_pixel(12, 4).0[0] - image.get_pixel(11, 4).0[0];
        let after = out.get_pixel(12, 4).0[0] - out.get_pixel(11, 4).0[0];
        assert!(after > before, "edge step should grow: {before} -> {after}");
    }

    #[test]
    fn adaptive_leaves_dark_regions_with_min_amount() {
        let image = edge_image();
        let settings = UnsharpMask {
            adaptive: true,
            amount_min: 1.0,
            amount_max: 4.0,
            threshold: 0.5,
            width: 0.05,
            ..UnsharpMask::default()
        };
        let out = unsharp_mask(&image, &settings);
        // Far from the edge on the dark side the local brightness is 0.2,
        // below threshold - width, so the amount is 1.0.
        assert!((out.get_pixel(2, 4).0[0] - image.get_pixel(2, 4).0[0]).abs() < 1e-6);
    }

    #[test]
    fn flat_field_is_unchanged_by_any_amount() {
        let flat = Mono32FImage::from_pixel(10, 10, image::Luma([0.4]));
        let settings = UnsharpMask {
            amount_max: 5.0,
            ..UnsharpMask::default()
        };
        let out = unsharp_mask(&flat, &settings);
        assert!(out.pixels().all(|p| (p.0[0] - 0.4).abs() < 1e-5));
    }
}
