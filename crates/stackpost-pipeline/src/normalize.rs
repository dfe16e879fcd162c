//! Brightness normalization: linear rescale of the source range.

use crate::settings::Normalization;
use crate::types::Mono32FImage;

/// Minimum and maximum pixel values, or `None` for an empty image.
#[must_use]
pub fn value_range(image: &Mono32FImage) -> Option<(f32, f32)> {
    image.pixels().map(|p| p.0[0]).fold(None, |range, v| match range {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Map the image's `[min, max]` onto `[settings.min, settings.max]`.
///
/// A flat image (zero source range) maps every pixel to `settings.min`.
/// Disabled normalization returns the input unchanged.
#[must_use = "returns the normalized image"]
pub fn normalize(image: &Mono32FImage, settings: &Normalization) -> Mono32FImage {
    if !settings.enabled {
        return image.clone();
    }
    let Some((lo, hi)) = value_range(image) else {
        return image.clone();
    };

    let mut out = image.clone();
    let span = hi - lo;
    if span <= f32::EPSILON {
        for p in out.pixels_mut() {
            p.0[0] = settings.min;
        }
        return out;
    }

    let scale = (settings.max - settings.min) / span;
    for p in out.pixels_mut() {
        p.0[0] = (p.0[0] - lo).mul_add(scale, settings.min);
    }
    out
}
