//! Processing settings: one immutable snapshot per pipeline run.

use serde::{Deserialize, Serialize};

use crate::tone_curve::ToneCurve;

/// Full set of parameters for one pipeline run.
///
/// The default value is an identity pipeline for pixel data in `[0, 1]`:
/// normalization off, zero deconvolution iterations, unit unsharp
/// amount and a linear tone curve.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessingSettings {
    #[serde(default)]
    pub normalization: Normalization,
    #[serde(default)]
    pub lucy_richardson: LucyRichardson,
    #[serde(default)]
    pub unsharp_mask: UnsharpMask,
    #[serde(default)]
    pub tone_curve: ToneCurve,
}

/// Linear rescale of the input brightness range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub enabled: bool,
    /// Output value for the darkest input pixel.
    pub min: f32,
    /// Output value for the brightest input pixel.
    pub max: f32,
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            enabled: false,
            min: 0.0,
            max: 1.0,
        }
    }
}

/// Lucy-Richardson deconvolution parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LucyRichardson {
    /// Sigma of the Gaussian point spread function.
    pub sigma: f32,
    /// Number of iterations; zero disables the stage.
    pub iterations: u32,
    /// Clamp the correction near saturated pixels to suppress ringing.
    pub deringing: bool,
}

impl LucyRichardson {
    pub const DEFAULT_SIGMA: f32 = 1.3;

    /// Whether running this stage changes the image at all.
    #[must_use]
    pub fn is_effective(&self) -> bool {
        self.iterations > 0 && self.sigma > 0.0
    }
}

impl Default for LucyRichardson {
    fn default() -> Self {
        Self {
            sigma: Self::DEFAULT_SIGMA,
            iterations: 0,
            deringing: false,
        }
    }
}

/// Unsharp masking parameters.
///
/// In non-adaptive mode the amount is `amount_max` everywhere. In
/// adaptive mode the amount varies with local brightness from
/// `amount_min` (below `threshold - width`) to `amount_max` (above
/// `threshold + width`) along a smooth cubic; see [`AdaptiveCurve`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnsharpMask {
    pub adaptive: bool,
    pub sigma: f32,
    pub amount_min: f32,
    pub amount_max: f32,
    pub threshold: f32,
    pub width: f32,
}

impl UnsharpMask {
    pub const DEFAULT_SIGMA: f32 = 1.3;
    pub const DEFAULT_THRESHOLD: f32 = 0.01;
    pub const DEFAULT_WIDTH: f32 = 0.01;

    /// Whether running this stage changes the image at all.
    ///
    /// An amount of exactly 1.0 reproduces the input, so a non-adaptive
    /// mask with `amount_max == 1.0` (or an adaptive one with both
    /// amounts at 1.0) is skipped.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn is_effective(&self) -> bool {
        if self.adaptive {
            self.amount_min != 1.0 || self.amount_max != 1.0
        } else {
            self.amount_max != 1.0
        }
    }

    /// The brightness-to-amount transition curve for adaptive mode.
    #[must_use]
    pub const fn adaptive_curve(&self) -> AdaptiveCurve {
        AdaptiveCurve::new(self.amount_min, self.amount_max, self.threshold, self.width)
    }

    /// Sharpening amount for a pixel whose blurred neighbourhood has
    /// brightness `local_brightness`.
    #[must_use]
    pub fn amount_at(&self, local_brightness: f32) -> f32 {
        if self.adaptive {
            self.adaptive_curve().amount_at(local_brightness)
        } else {
            self.amount_max
        }
    }
}

impl Default for UnsharpMask {
    fn default() -> Self {
        Self {
            adaptive: false,
            sigma: Self::DEFAULT_SIGMA,
            amount_min: 1.0,
            amount_max: 1.0,
            threshold: Self::DEFAULT_THRESHOLD,
            width: Self::DEFAULT_WIDTH,
        }
    }
}

/// Cubic `a x^3 + b x^2 + c x + d` joining `amount_min` at
/// `threshold - width` to `amount_max` at `threshold + width` with zero
/// slope at both ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveCurve {
    amount_min: f32,
    amount_max: f32,
    threshold: f32,
    width: f32,
}

impl AdaptiveCurve {
    #[must_use]
    pub const fn new(amount_min: f32, amount_max: f32, threshold: f32, width: f32) -> Self {
        Self {
            amount_min,
            amount_max,
            threshold,
            width,
        }
    }

    /// Cubic coefficients `[a, b, c, d]`.
    ///
    /// Evaluated in `f64`; a zero `width` yields non-finite coefficients,
    /// which [`amount_at`](Self::amount_at) never uses since the
    /// transition interval is then empty.
    #[must_use]
    pub fn coefficients(&self) -> [f64; 4] {
        let min = f64::from(self.amount_min);
        let max = f64::from(self.amount_max);
        let t = f64::from(self.threshold);
        let w = f64::from(self.width);

        let divisor = 4.0 * w.powi(3);
        let a = (min - max) / divisor;
        let b = 3.0 * (max - min) * t / divisor;
        let c = 3.0 * (max - min) * (w - t) * (w + t) / divisor;
        let d = (2.0 * w.powi(3) * (min + max)
            + 3.0 * t * w.powi(2) * (min - max)
            + t.powi(3) * (max - min))
            / divisor;
        [a, b, c, d]
    }

    /// Amount for brightness `x`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn amount_at(&self, x: f32) -> f32 {
        let lower = self.threshold - self.width;
        let upper = self.threshold + self.width;
        if x <= lower {
            return self.amount_min;
        }
        if x >= upper {
            return self.amount_max;
        }
        let [a, b, c, d] = self.coefficients();
        let x = f64::from(x);
        (((a * x + b) * x + c) * x + d) as f32
    }
}
