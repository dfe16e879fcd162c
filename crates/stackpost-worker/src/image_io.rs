//! Image file loading and saving for worker jobs.
//!
//! Frames are decoded into single-channel `f32` images with values in
//! `[0, 1]`; colour inputs are converted to luminance. Output is written
//! as 16-bit grayscale PNG to keep the precision of the pipeline.

use std::path::Path;

use image::{ImageBuffer, Luma};
use stackpost_pipeline::Mono32FImage;

use crate::error::ImageIoError;

/// Decode `path` into a normalized monochrome image.
///
/// # Errors
///
/// Returns [`ImageIoError::Read`] if the file cannot be opened or
/// decoded.
pub fn load_mono(path: &Path) -> Result<Mono32FImage, ImageIoError> {
    let decoded = image::open(path).map_err(|source| ImageIoError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    log::debug!(
        "loaded {} ({}x{}, {:?})",
        path.display(),
        decoded.width(),
        decoded.height(),
        decoded.color()
    );
    Ok(decoded.to_luma32f())
}

/// Write `image` to `path` as a 16-bit grayscale PNG.
///
/// Values are clamped to `[0, 1]` before quantization.
///
/// # Errors
///
/// Returns [`ImageIoError::Write`] if encoding or writing fails.
pub fn save_mono16(image: &Mono32FImage, path: &Path) -> Result<(), ImageIoError> {
    let quantized: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
            Luma([to_u16(image.get_pixel(x, y).0[0])])
        });
    quantized
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|source| ImageIoError::Write {
            path: path.to_path_buf(),
            source,
        })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u16(value: f32) -> u16 {
    let clamped = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    (clamped * f32::from(u16::MAX)).round() as u16
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn quantization_clamps_and_rounds() {
        assert_eq!(to_u16(-0.5), 0);
        assert_eq!(to_u16(0.0), 0);
        assert_eq!(to_u16(1.0), u16::MAX);
        assert_eq!(to_u16(7.0), u16::MAX);
        assert_eq!(to_u16(f32::NAN), 0);
        assert_eq!(to_u16(0.5), 32768);
    }

    #[test]
    fn saved_frame_loads_back_within_quantization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let image = Mono32FImage::from_fn(17, 9, |x, y| Luma([(x * 9 + y) as f32 / 160.0]));

        save_mono16(&image, &path).unwrap();
        let loaded = load_mono(&path).unwrap();

        assert_eq!(loaded.dimensions(), image.dimensions());
        for (a, b) in image.pixels().zip(loaded.pixels()) {
            assert!(
                (a.0[0] - b.0[0]).abs() < 1e-4,
                "pixel {} came back as {}",
                a.0[0],
                b.0[0]
            );
        }
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_mono(&dir.path().join("absent.png")).unwrap_err();
        assert!(matches!(err, ImageIoError::Read { .. }));
        assert!(err.to_string().contains("absent.png"));
    }
}
