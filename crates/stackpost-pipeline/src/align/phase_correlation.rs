//! Phase correlation for translation between frames.
//!
//! 1. Subtract the mean and apply a separable Hann window (reduces edge
//!    effects), zero-padding to power-of-two FFT sizes.
//! 2. Compute the 2D FFT of both frames.
//! 3. Normalize the cross-power spectrum `T * conj(R) / |T * conj(R)|`.
//! 4. The inverse FFT peaks at the translation; a parabolic fit around
//!    the peak refines it to sub-pixel accuracy.
//!
//! A frame's spectrum can be computed once and reused as the reference
//! for the next frame of a sequence.

use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

use super::{AlignError, Translation};
use crate::types::{Dimensions, Mono32FImage};

/// Frequency-domain representation of one windowed frame.
#[derive(Clone)]
pub struct Spectrum {
    data: Vec<Complex<f32>>,
}

/// Translation estimator for frames of one fixed size.
pub struct PhaseCorrelator {
    dimensions: Dimensions,
    fft_width: usize,
    fft_height: usize,
    row_forward: Arc<dyn Fft<f32>>,
    row_inverse: Arc<dyn Fft<f32>>,
    column_forward: Arc<dyn Fft<f32>>,
    column_inverse: Arc<dyn Fft<f32>>,
    window_x: Vec<f32>,
    window_y: Vec<f32>,
}

impl PhaseCorrelator {
    /// Plan FFTs for frames of `dimensions`.
    #[must_use]
    pub fn new(dimensions: Dimensions) -> Self {
        let width = dimensions.width as usize;
        let height = dimensions.height as usize;
        let fft_width = width.max(1).next_power_of_two();
        let fft_height = height.max(1).next_power_of_two();

        let mut planner = FftPlanner::new();
        Self {
            dimensions,
            fft_width,
            fft_height,
            row_forward: planner.plan_fft_forward(fft_width),
            row_inverse: planner.plan_fft_inverse(fft_width),
            column_forward: planner.plan_fft_forward(fft_height),
            column_inverse: planner.plan_fft_inverse(fft_height),
            window_x: hann_window(width),
            window_y: hann_window(height),
        }
    }

    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Window, pad and transform one frame.
    ///
    /// # Errors
    ///
    /// Returns [`AlignError::DimensionMismatch`] if the frame size differs
    /// from the planned size, or [`AlignError::EmptyFrame`] for a frame
    /// without pixels.
    #[allow(clippy::cast_precision_loss)]
    pub fn spectrum(&self, frame: &Mono32FImage) -> Result<Spectrum, AlignError> {
        let actual = Dimensions::of(frame);
        if actual != self.dimensions {
            return Err(AlignError::DimensionMismatch {
                expected: self.dimensions,
                actual,
            });
        }
        if actual.pixel_count() == 0 {
            return Err(AlignError::EmptyFrame);
        }

        let mean = frame.pixels().map(|p| f64::from(p.0[0])).sum::<f64>()
            / actual.pixel_count() as f64;
        #[allow(clippy::cast_possible_truncation)]
        let mean = mean as f32;

        let mut data = vec![Complex::new(0.0f32, 0.0); self.fft_width * self.fft_height];
        for (x, y, p) in frame.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let value = (p.0[0] - mean) * self.window_x[x] * self.window_y[y];
            data[y * self.fft_width + x] = Complex::new(value, 0.0);
        }

        self.transform(&mut data, &self.row_forward, &self.column_forward);
        Ok(Spectrum { data })
    }

    /// Translation of `target` relative to `reference`: content at `p` in
    /// the reference appears at `p + translation` in the target.
    #[must_use]
    pub fn translation(&self, reference: &Spectrum, target: &Spectrum) -> Translation {
        let mut cross: Vec<Complex<f32>> = target
            .data
            .iter()
            .zip(&reference.data)
            .map(|(&t, &r)| {
                let product = t * r.conj();
                let magnitude = product.norm();
                if magnitude > 1e-10 {
                    product / magnitude
                } else {
                    Complex::new(0.0, 0.0)
                }
            })
            .collect();

        self.transform(&mut cross, &self.row_inverse, &self.column_inverse);
        let surface: Vec<f32> = cross.iter().map(|c| c.re).collect();
        self.locate_peak(&surface)
    }

    /// Separable 2D transform: rows, then columns via transposition.
    fn transform(
        &self,
        data: &mut Vec<Complex<f32>>,
        rows: &Arc<dyn Fft<f32>>,
        columns: &Arc<dyn Fft<f32>>,
    ) {
        // rustfft processes every consecutive chunk of the plan length.
        rows.process(data);
        let mut transposed = transpose(data, self.fft_width, self.fft_height);
        columns.process(&mut transposed);
        *data = transpose(&transposed, self.fft_height, self.fft_width);
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap
    )]
    fn locate_peak(&self, surface: &[f32]) -> Translation {
        let (w, h) = (self.fft_width, self.fft_height);
        let (peak_index, _) = surface
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| {
                if v > bv { (i, v) } else { (bi, bv) }
            });
        let (px, py) = (peak_index % w, peak_index / w);

        let at = |x: isize, y: isize| {
            let xx = x.rem_euclid(w as isize) as usize;
            let yy = y.rem_euclid(h as isize) as usize;
            surface[yy * w + xx]
        };
        let (ix, iy) = (px as isize, py as isize);
        let center = at(ix, iy);
        let sub_x = parabolic_offset(at(ix - 1, iy), center, at(ix + 1, iy));
        let sub_y = parabolic_offset(at(ix, iy - 1), center, at(ix, iy + 1));

        let wrap = |p: usize, n: usize| {
            if p > n / 2 {
                p as f32 - n as f32
            } else {
                p as f32
            }
        };
        Translation::new(wrap(px, w) + sub_x, wrap(py, h) + sub_y)
    }
}

/// Vertex of the parabola through three equally spaced samples, as an
/// offset from the centre sample, limited to half a pixel.
fn parabolic_offset(left: f32, center: f32, right: f32) -> f32 {
    let denominator = 2.0 * (left + right - 2.0 * center);
    if denominator.abs() < 1e-10 {
        return 0.0;
    }
    ((left - right) / denominator).clamp(-0.5, 0.5)
}

#[allow(clippy::cast_precision_loss)]
fn hann_window(n: usize) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n];
    }
    let last = (n - 1) as f32;
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / last).cos())
        .collect()
}

/// Transpose a row-major `width x height` buffer.
fn transpose(data: &[Complex<f32>], width: usize, height: usize) -> Vec<Complex<f32>> {
    let mut out = vec![Complex::new(0.0, 0.0); data.len()];
    for y in 0..height {
        for x in 0..width {
            out[x * height + y] = data[y * width + x];
        }
    }
    out
}
