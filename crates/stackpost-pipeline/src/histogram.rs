//! Brightness histogram over a rectangular selection.

use serde::{Deserialize, Serialize};

use crate::types::{Mono32FImage, Rect};

/// Number of bins used for display histograms.
pub const DEFAULT_BINS: usize = 1024;

/// Pixel counts per brightness bin.
///
/// Values are clamped to `[0, 1]` and value `v` lands in bin
/// `floor(v * (bins - 1))`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub counts: Vec<u32>,
    /// Smallest value seen (before clamping).
    pub min_value: f32,
    /// Largest value seen (before clamping).
    pub max_value: f32,
    /// Largest bin count.
    pub max_count: u32,
}

impl Histogram {
    /// Empty histogram with `bins` zeroed bins.
    #[must_use]
    pub fn empty(bins: usize) -> Self {
        Self {
            counts: vec![0; bins],
            min_value: 0.0,
            max_value: 0.0,
            max_count: 0,
        }
    }

    /// Histogram of `image` restricted to `selection` (clipped to the
    /// image), with [`DEFAULT_BINS`] bins.
    #[must_use]
    pub fn of_selection(image: &Mono32FImage, selection: Rect) -> Self {
        Self::with_bins(image, selection, DEFAULT_BINS)
    }

    /// Histogram with a custom bin count (at least 1).
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn with_bins(image: &Mono32FImage, selection: Rect, bins: usize) -> Self {
        let bins = bins.max(1);
        let mut histogram = Self::empty(bins);
        let (x0, y0, w, h) = selection
            .clipped_to(crate::types::Dimensions::of(image))
            .as_unsigned();
        if w == 0 || h == 0 {
            return histogram;
        }

        let top_bin = (bins - 1) as f32;
        let mut min_value = f32::INFINITY;
        let mut max_value = f32::NEG_INFINITY;
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                let v = image.get_pixel(x, y).0[0];
                min_value = min_value.min(v);
                max_value = max_value.max(v);
                let bin = (v.clamp(0.0, 1.0) * top_bin) as usize;
                histogram.counts[bin.min(bins - 1)] += 1;
            }
        }

        histogram.min_value = min_value;
        histogram.max_value = max_value;
        histogram.max_count = histogram.counts.iter().copied().max().unwrap_or(0);
        histogram
    }

    /// Total number of counted pixels.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }
}
