//! Gaussian blur of floating-point images.
//!
//! Wraps [`imageproc::filter::gaussian_blur_f32`]. The same blur serves
//! as the point spread function in deconvolution and as the low-pass
//! layer in unsharp masking. For `f32` samples imageproc's clamp is the
//! identity, so ratio images with values above 1 blur without clipping.

use crate::types::Mono32FImage;

/// Apply Gaussian blur to a floating-point image.
///
/// Non-positive sigma values and empty images return the input
/// unchanged, since `imageproc` panics on `sigma <= 0.0`.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur(image: &Mono32FImage, sigma: f32) -> Mono32FImage {
    if sigma <= 0.0 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }

    imageproc::filter::gaussian_blur_f32(image, sigma)
}
