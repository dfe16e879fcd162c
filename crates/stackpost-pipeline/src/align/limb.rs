//! Disc (limb) detection for registering solar and lunar frames.
//!
//! Detection thresholds the frame halfway between its darkest and
//! brightest values; the bright region's area gives a radius estimate
//! and its centroid a first centre estimate. The centroid is biased when
//! the disc is cut by the frame edge, so stabilization refines the centre
//! from limb edge points: rays are cast from the centroid, each ray's
//! first bright-to-dark crossing is a limb point, and a circle of fixed
//! (sequence-average) radius is fitted to those points by Gauss-Newton.

use serde::{Deserialize, Serialize};

use super::AlignError;
use crate::normalize::value_range;
use crate::types::Mono32FImage;

/// Frames whose brightness range is below this have no usable disc.
pub const MIN_CONTRAST: f32 = 0.05;

/// Minimum bright pixel count for a disc.
pub const MIN_DISC_PIXELS: usize = 16;

/// Number of rays cast when collecting limb points.
pub const LIMB_RAYS: usize = 96;

/// Minimum limb points for a centre fit.
pub const MIN_LIMB_POINTS: usize = 8;

/// Limb points closer than this to the frame edge are discarded.
const EDGE_MARGIN: f32 = 1.5;

/// Ray marching step in pixels.
const RAY_STEP: f32 = 0.5;

const FIT_ITERATIONS: usize = 30;
const FIT_TOLERANCE: f32 = 1e-4;

/// A detected disc.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Disc {
    pub center_x: f32,
    pub center_y: f32,
    pub radius: f32,
    /// Brightness separating disc from background.
    pub threshold: f32,
}

/// Find the bright disc in `frame`.
///
/// # Errors
///
/// Returns [`AlignError::EmptyFrame`] for a frame without pixels and
/// [`AlignError::NoDisc`] when the frame is (nearly) flat or the bright
/// region is too small.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn detect_disc(frame: &Mono32FImage) -> Result<Disc, AlignError> {
    let (lo, hi) = value_range(frame).ok_or(AlignError::EmptyFrame)?;
    if hi - lo < MIN_CONTRAST {
        return Err(AlignError::NoDisc(format!(
            "brightness range {:.4} is below {MIN_CONTRAST}",
            hi - lo
        )));
    }
    let threshold = lo.midpoint(hi);

    let (mut count, mut sum_x, mut sum_y) = (0usize, 0.0f64, 0.0f64);
    for (x, y, p) in frame.enumerate_pixels() {
        if p.0[0] >= threshold {
            count += 1;
            sum_x += f64::from(x);
            sum_y += f64::from(y);
        }
    }
    if count < MIN_DISC_PIXELS {
        return Err(AlignError::NoDisc(format!(
            "bright region has {count} pixels, need {MIN_DISC_PIXELS}"
        )));
    }

    let n = count as f64;
    Ok(Disc {
        center_x: (sum_x / n) as f32,
        center_y: (sum_y / n) as f32,
        radius: (n / std::f64::consts::PI).sqrt() as f32,
        threshold,
    })
}

/// Limb edge points found by casting [`LIMB_RAYS`] rays from the disc
/// centre.
///
/// Rays that leave the frame before crossing the threshold, and
/// crossings next to the frame edge, contribute no point.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn limb_points(frame: &Mono32FImage, disc: &Disc) -> Vec<(f32, f32)> {
    let (width, height) = (frame.width() as f32, frame.height() as f32);
    let max_distance = width.hypot(height);
    let mut points = Vec::with_capacity(LIMB_RAYS);

    for ray in 0..LIMB_RAYS {
        let angle = 2.0 * std::f32::consts::PI * ray as f32 / LIMB_RAYS as f32;
        let (dir_y, dir_x) = angle.sin_cos();

        let mut inside = false;
        let mut previous = (0.0f32, f32::NAN);
        let mut r = 0.0f32;
        while r < max_distance {
            let x = dir_x.mul_add(r, disc.center_x);
            let y = dir_y.mul_add(r, disc.center_y);
            let Some(value) = bilinear(frame, x, y) else {
                break;
            };
            if value >= disc.threshold {
                inside = true;
            } else if inside {
                // Interpolate the crossing between the previous sample and this one.
                let (pr, pv) = previous;
                let t = ((pv - disc.threshold) / (pv - value)).clamp(0.0, 1.0);
                let edge_r = (r - pr).mul_add(t, pr);
                let ex = dir_x.mul_add(edge_r, disc.center_x);
                let ey = dir_y.mul_add(edge_r, disc.center_y);
                if ex >= EDGE_MARGIN
                    && ey >= EDGE_MARGIN
                    && ex <= width - 1.0 - EDGE_MARGIN
                    && ey <= height - 1.0 - EDGE_MARGIN
                {
                    points.push((ex, ey));
                }
                break;
            }
            previous = (r, value);
            r += RAY_STEP;
        }
    }
    points
}

/// Refine the disc centre by fitting a circle of fixed `radius` to the
/// limb points.
///
/// # Errors
///
/// Returns [`AlignError::TooFewLimbPoints`] when fewer than
/// [`MIN_LIMB_POINTS`] limb points are found.
pub fn refine_center(frame: &Mono32FImage, disc: &Disc, radius: f32) -> Result<Disc, AlignError> {
    let points = limb_points(frame, disc);
    if points.len() < MIN_LIMB_POINTS {
        return Err(AlignError::TooFewLimbPoints {
            found: points.len(),
            needed: MIN_LIMB_POINTS,
        });
    }

    let (mut cx, mut cy) = (disc.center_x, disc.center_y);
    for _ in 0..FIT_ITERATIONS {
        // Normal equations of the residuals |p - c| - radius.
        let (mut jtj_xx, mut jtj_xy, mut jtj_yy) = (0.0f32, 0.0f32, 0.0f32);
        let (mut jtr_x, mut jtr_y) = (0.0f32, 0.0f32);
        for &(px, py) in &points {
            let (dx, dy) = (px - cx, py - cy);
            let d = dx.hypot(dy).max(1e-6);
            let residual = d - radius;
            let (jx, jy) = (-dx / d, -dy / d);
            jtj_xx += jx * jx;
            jtj_xy += jx * jy;
            jtj_yy += jy * jy;
            jtr_x += jx * residual;
            jtr_y += jy * residual;
        }

        let det = jtj_xx.mul_add(jtj_yy, -(jtj_xy * jtj_xy));
        if det.abs() < 1e-9 {
            break;
        }
        let step_x = (jtj_yy * jtr_x - jtj_xy * jtr_y) / det;
        let step_y = (jtj_xx * jtr_y - jtj_xy * jtr_x) / det;
        cx -= step_x;
        cy -= step_y;
        if step_x.hypot(step_y) < FIT_TOLERANCE {
            break;
        }
    }

    Ok(Disc {
        center_x: cx,
        center_y: cy,
        radius,
        threshold: disc.threshold,
    })
}

/// Bilinear sample, `None` outside the frame.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn bilinear(frame: &Mono32FImage, x: f32, y: f32) -> Option<f32> {
    let (w, h) = frame.dimensions();
    if x < 0.0 || y < 0.0 || x > (w - 1) as f32 || y > (h - 1) as f32 {
        return None;
    }
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (tx, ty) = (x - x0 as f32, y - y0 as f32);
    let v = |x, y| frame.get_pixel(x, y).0[0];
    let top = v(x0, y0).mul_add(1.0 - tx, v(x1, y0) * tx);
    let bottom = v(x0, y1).mul_add(1.0 - tx, v(x1, y1) * tx);
    Some(top.mul_add(1.0 - ty, bottom * ty))
}
