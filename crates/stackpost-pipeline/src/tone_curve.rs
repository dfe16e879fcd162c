//! Final brightness remapping through user-defined control points.
//!
//! Three evaluation modes:
//!
//! - **smooth**: monotone cubic Hermite spline (Fritsch-Carlson
//!   tangents) through the control points, so monotonic control points
//!   give a monotonic curve without overshoot;
//! - **linear**: piecewise-linear interpolation;
//! - **gamma**: `y = y0 + (yN - y0) * t^(1 / gamma)` with
//!   `t = (x - x0) / (xN - x0)`, using only the first and last points.
//!
//! Inputs left of the first point map to its `y`, inputs right of the
//! last point map to its `y`. NaN inputs map like inputs left of the
//! first point. Outputs are clamped to `[0, 1]`.

use serde::{Deserialize, Serialize};

use crate::types::Mono32FImage;

/// A control point of the curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub x: f32,
    pub y: f32,
}

impl CurvePoint {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Errors building a tone curve.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToneCurveError {
    #[error("a tone curve needs at least 2 control points, got {0}")]
    TooFewPoints(usize),

    #[error("control point ({x}, {y}) is not finite")]
    NonFinitePoint { x: f32, y: f32 },

    #[error("gamma must be positive and finite, got {0}")]
    InvalidGamma(f32),
}

/// Monotonic brightness mapping applied as the last pipeline stage.
///
/// Control points are kept sorted by `x` with unique `x` values; a later
/// point with the same `x` replaces an earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ToneCurveRepr", into = "ToneCurveRepr")]
pub struct ToneCurve {
    points: Vec<CurvePoint>,
    /// Hermite tangents at each point, for smooth mode.
    tangents: Vec<f32>,
    smooth: bool,
    gamma_mode: bool,
    gamma: f32,
}

impl ToneCurve {
    pub const DEFAULT_GAMMA: f32 = 1.0;

    /// Build a curve through `points` (any order).
    ///
    /// # Errors
    ///
    /// Returns [`ToneCurveError::TooFewPoints`] if fewer than 2 distinct
    /// `x` positions remain, or [`ToneCurveError::NonFinitePoint`] for
    /// NaN or infinite coordinates.
    pub fn new(mut points: Vec<CurvePoint>) -> Result<Self, ToneCurveError> {
        if let Some(bad) = points.iter().find(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(ToneCurveError::NonFinitePoint { x: bad.x, y: bad.y });
        }

        points.sort_by(|a, b| a.x.total_cmp(&b.x));
        let mut unique: Vec<CurvePoint> = Vec::with_capacity(points.len());
        for p in points {
            match unique.last_mut() {
                Some(last) if last.x.total_cmp(&p.x).is_eq() => *last = p,
                _ => unique.push(p),
            }
        }
        if unique.len() < 2 {
            return Err(ToneCurveError::TooFewPoints(unique.len()));
        }

        let tangents = monotone_tangents(&unique);
        Ok(Self {
            points: unique,
            tangents,
            smooth: true,
            gamma_mode: false,
            gamma: Self::DEFAULT_GAMMA,
        })
    }

    /// The straight line from `(0, 0)` to `(1, 1)`, in linear mode.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            points: vec![CurvePoint::new(0.0, 0.0), CurvePoint::new(1.0, 1.0)],
            tangents: vec![1.0, 1.0],
            smooth: false,
            gamma_mode: false,
            gamma: Self::DEFAULT_GAMMA,
        }
    }

    #[must_use]
    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    #[must_use]
    pub const fn is_smooth(&self) -> bool {
        self.smooth
    }

    pub const fn set_smooth(&mut self, smooth: bool) {
        self.smooth = smooth;
    }

    #[must_use]
    pub const fn is_gamma_mode(&self) -> bool {
        self.gamma_mode
    }

    pub const fn set_gamma_mode(&mut self, gamma_mode: bool) {
        self.gamma_mode = gamma_mode;
    }

    #[must_use]
    pub const fn gamma(&self) -> f32 {
        self.gamma
    }

    /// Set the exponent used in gamma mode.
    ///
    /// # Errors
    ///
    /// Returns [`ToneCurveError::InvalidGamma`] unless `gamma` is
    /// positive and finite.
    pub fn set_gamma(&mut self, gamma: f32) -> Result<(), ToneCurveError> {
        if !(gamma.is_finite() && gamma > 0.0) {
            return Err(ToneCurveError::InvalidGamma(gamma));
        }
        self.gamma = gamma;
        Ok(())
    }

    /// Whether [`evaluate`](Self::evaluate) is `x` on `[0, 1]`.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn is_identity(&self) -> bool {
        let straight = self.points == [CurvePoint::new(0.0, 0.0), CurvePoint::new(1.0, 1.0)];
        straight && (!self.gamma_mode || self.gamma == 1.0)
    }

    /// Map one brightness value.
    #[must_use]
    pub fn evaluate(&self, x: f32) -> f32 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return x.clamp(0.0, 1.0),
        };

        let y = if x.is_nan() || x <= first.x {
            first.y
        } else if x >= last.x {
            last.y
        } else if self.gamma_mode {
            let t = (x - first.x) / (last.x - first.x);
            (last.y - first.y).mul_add(t.powf(1.0 / self.gamma), first.y)
        } else {
            // first.x < x < last.x, so 1 <= i <= len - 1.
            let i = self.points.partition_point(|p| p.x <= x);
            let (p0, p1) = (self.points[i - 1], self.points[i]);
            let h = p1.x - p0.x;
            let t = (x - p0.x) / h;
            if self.smooth {
                hermite(p0.y, p1.y, self.tangents[i - 1] * h, self.tangents[i] * h, t)
            } else {
                (p1.y - p0.y).mul_add(t, p0.y)
            }
        };
        y.clamp(0.0, 1.0)
    }

    /// Apply the curve to every pixel.
    #[must_use = "returns the tone-mapped image"]
    pub fn apply(&self, image: &Mono32FImage) -> Mono32FImage {
        let mut out = image.clone();
        if self.is_identity() {
            return out;
        }
        for p in out.pixels_mut() {
            p.0[0] = self.evaluate(p.0[0]);
        }
        out
    }
}

impl Default for ToneCurve {
    fn default() -> Self {
        Self::identity()
    }
}

/// Cubic Hermite basis on `t in [0, 1]` with scaled tangents `m0`, `m1`.
fn hermite(y0: f32, y1: f32, m0: f32, m1: f32, t: f32) -> f32 {
    let t2 = t * t;
    let t3 = t2 * t;
    let h00 = 2.0f32.mul_add(t3, -3.0 * t2) + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = (-2.0f32).mul_add(t3, 3.0 * t2);
    let h11 = t3 - t2;
    h00 * y0 + h10 * m0 + h01 * y1 + h11 * m1
}

/// Fritsch-Carlson tangents for monotone cubic interpolation.
///
/// `points` must be sorted with distinct `x` and contain at least 2
/// entries.
fn monotone_tangents(points: &[CurvePoint]) -> Vec<f32> {
    let n = points.len();
    let secants: Vec<f32> = points
        .windows(2)
        .map(|w| (w[1].y - w[0].y) / (w[1].x - w[0].x))
        .collect();

    let mut tangents = vec![0.0f32; n];
    tangents[0] = secants[0];
    tangents[n - 1] = secants[n - 2];
    for i in 1..n - 1 {
        let (d0, d1) = (secants[i - 1], secants[i]);
        tangents[i] = if d0 * d1 <= 0.0 { 0.0 } else { (d0 + d1) / 2.0 };
    }

    for (i, &d) in secants.iter().enumerate() {
        if d == 0.0 {
            tangents[i] = 0.0;
            tangents[i + 1] = 0.0;
            continue;
        }
        let a = tangents[i] / d;
        let b = tangents[i + 1] / d;
        let s = a.hypot(b);
        if s > 3.0 {
            let tau = 3.0 / s;
            tangents[i] = tau * a * d;
            tangents[i + 1] = tau * b * d;
        }
    }
    tangents
}

/// Serde proxy so deserialization goes through [`ToneCurve::new`].
#[derive(Serialize, Deserialize)]
struct ToneCurveRepr {
    points: Vec<CurvePoint>,
    smooth: bool,
    gamma_mode: bool,
    gamma: f32,
}

impl From<ToneCurve> for ToneCurveRepr {
    fn from(curve: ToneCurve) -> Self {
        Self {
            points: curve.points,
            smooth: curve.smooth,
            gamma_mode: curve.gamma_mode,
            gamma: curve.gamma,
        }
    }
}

impl TryFrom<ToneCurveRepr> for ToneCurve {
    type Error = ToneCurveError;

    fn try_from(repr: ToneCurveRepr) -> Result<Self, Self::Error> {
        let mut curve = Self::new(repr.points)?;
        curve.set_smooth(repr.smooth);
        curve.set_gamma_mode(repr.gamma_mode);
        curve.set_gamma(repr.gamma)?;
        Ok(curve)
    }
}
