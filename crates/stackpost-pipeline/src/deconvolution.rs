//! Lucy-Richardson deconvolution with a Gaussian point spread function.
//!
//! Each iteration refines the estimate as
//!
//! ```text
//! estimate <- estimate * blur(observed / blur(estimate))
//! ```
//!
//! The Gaussian kernel is symmetric, so the flipped kernel of the
//! textbook formulation is the kernel itself.
//!
//! # Deringing
//!
//! Deconvolution overshoots next to saturated (overexposed) regions,
//! producing dark rings around bright discs. With deringing enabled,
//! pixels within `ceil(3 sigma)` of a saturated pixel have their
//! per-iteration correction factor clamped to
//! `[1 - DERINGING_MAX_CORRECTION, 1 + DERINGING_MAX_CORRECTION]`.

use std::ops::ControlFlow;

use imageproc::distance_transform::Norm;

use crate::blur::gaussian_blur;
use crate::settings::LucyRichardson;
use crate::types::{Mono32FImage, Stage, StageProgress};

/// Pixels at or above this value count as saturated for deringing.
pub const SATURATION_LEVEL: f32 = 0.999;

/// Largest per-iteration relative change allowed near saturated pixels.
pub const DERINGING_MAX_CORRECTION: f32 = 0.05;

/// Denominators below this are treated as this value.
const MIN_DENOMINATOR: f32 = 1.0e-6;

/// Run Lucy-Richardson deconvolution.
///
/// `checkpoint` is called after every iteration; returning
/// [`ControlFlow::Break`] stops early and yields `None`.
/// Settings that make the stage ineffective return a copy of the input
/// without calling `checkpoint`.
pub fn deconvolve<F>(
    observed: &Mono32FImage,
    settings: &LucyRichardson,
    mut checkpoint: F,
) -> Option<Mono32FImage>
where
    F: FnMut(StageProgress) -> ControlFlow<()>,
{
    if !settings.is_effective() || observed.width() == 0 || observed.height() == 0 {
        return Some(observed.clone());
    }

    let ringing_mask = settings
        .deringing
        .then(|| saturation_neighbourhood(observed, settings.sigma));

    let mut estimate = observed.clone();
    for iteration in 1..=settings.iterations {
        let reblurred = gaussian_blur(&estimate, settings.sigma);

        let mut ratio = observed.clone();
        for (r, b) in ratio.pixels_mut().zip(reblurred.pixels()) {
            r.0[0] /= b.0[0].max(MIN_DENOMINATOR);
        }

        let correction = gaussian_blur(&ratio, settings.sigma);
        for (i, (e, c)) in estimate.pixels_mut().zip(correction.pixels()).enumerate() {
            let mut factor = c.0[0];
            if let Some(mask) = &ringing_mask
                && mask[i]
            {
                factor = factor.clamp(
                    1.0 - DERINGING_MAX_CORRECTION,
                    1.0 + DERINGING_MAX_CORRECTION,
                );
            }
            e.0[0] *= factor;
        }

        let progress = StageProgress {
            stage: Stage::Deconvolution,
            step: iteration,
            total: settings.iterations,
        };
        if checkpoint(progress).is_break() {
            return None;
        }
    }

    Some(estimate)
}

/// Row-major flags marking pixels within `ceil(3 sigma)` of a saturated
/// pixel (the saturated pixels included).
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn saturation_neighbourhood(image: &Mono32FImage, sigma: f32) -> Vec<bool> {
    let saturated = image::GrayImage::from_fn(image.width(), image.height(), |x, y| {
        image::Luma([if image.get_pixel(x, y).0[0] >= SATURATION_LEVEL {
            255
        } else {
            0
        }])
    });

    let radius = (3.0 * sigma).ceil().clamp(1.0, f32::from(u8::MAX)) as u8;
    let dilated = imageproc::morphology::dilate(&saturated, Norm::LInf, radius);
    dilated.pixels().map(|p| p.0[0] > 0).collect()
}
