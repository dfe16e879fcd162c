//! Image registration math for sequences of frames.
//!
//! Two methods are provided:
//!
//! - [`phase_correlation`]: FFT-based translation between consecutive
//!   frames, suitable for any content.
//! - [`limb`]: detects a bright disc (solar or lunar limb) and registers
//!   frames on its centre.
//!
//! [`translate`] resamples a frame by a sub-pixel offset so the results
//! can be written out aligned.

pub mod limb;
pub mod phase_correlation;
pub mod translate;

use serde::{Deserialize, Serialize};

use crate::types::Dimensions;

/// Sub-pixel offset `(dx, dy)` in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Translation {
    pub dx: f32,
    pub dy: f32,
}

impl Translation {
    #[must_use]
    pub const fn new(dx: f32, dy: f32) -> Self {
        Self { dx, dy }
    }

    #[must_use]
    pub fn length(self) -> f32 {
        self.dx.hypot(self.dy)
    }
}

impl std::ops::Add for Translation {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.dx + rhs.dx, self.dy + rhs.dy)
    }
}

impl std::ops::Sub for Translation {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.dx - rhs.dx, self.dy - rhs.dy)
    }
}

impl std::ops::Neg for Translation {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.dx, -self.dy)
    }
}

/// Alignment method selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlignmentMethod {
    #[default]
    PhaseCorrelation,
    Limb,
}

/// Errors from registration of a single frame or frame pair.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AlignError {
    #[error("frame is {actual:?} but the sequence is {expected:?}")]
    DimensionMismatch {
        expected: Dimensions,
        actual: Dimensions,
    },

    #[error("frame has no pixels")]
    EmptyFrame,

    #[error("no disc found: {0}")]
    NoDisc(String),

    #[error("only {found} limb points found, need at least {needed}")]
    TooFewLimbPoints { found: usize, needed: usize },
}
