//! Staged pixel pipeline: advance stage by stage, inspecting each
//! intermediate result before continuing.
//!
//! ```rust
//! # use std::ops::ControlFlow;
//! # use stackpost_pipeline::{Mono32FImage, Pipeline, PipelineError, ProcessingSettings};
//! # fn run(image: Mono32FImage) -> Result<(), PipelineError> {
//! let settings = ProcessingSettings::default();
//! let processed = Pipeline::new(image, settings)
//!     .normalize()
//!     .deconvolve(|_| ControlFlow::Continue(()))?
//!     .unsharp_mask()
//!     .apply_tone_curve()
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state, carrying
//! the intermediates later stages (and incremental re-runs) need.
//! [`Deconvolved::resume`] and [`Sharpened::resume`] re-enter the
//! pipeline from cached intermediates, so changing only the unsharp mask
//! or the tone curve does not repeat deconvolution.

use std::ops::ControlFlow;

use crate::settings::ProcessingSettings;
use crate::types::{Dimensions, Mono32FImage, PipelineError, Stage, StageProgress};

/// Entry point of the staged pipeline.
pub struct Pipeline;

impl Pipeline {
    /// Start a pipeline over `source` with a snapshot of `settings`.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(source: Mono32FImage, settings: ProcessingSettings) -> Pending {
        Pending { settings, source }
    }
}

/// Where an incremental re-run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingRequest {
    /// Everything changed: normalization and deconvolution onward.
    Sharpening,
    /// Only unsharp mask (or later) settings changed.
    UnsharpMasking,
    /// Only the tone curve changed.
    ToneCurve,
}

/// All intermediates of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedImage {
    /// Output of normalization and deconvolution.
    pub deconvolved: Mono32FImage,
    /// Output of unsharp masking; the histogram source.
    pub sharpened: Mono32FImage,
    /// Final tone-mapped image.
    pub output: Mono32FImage,
}

impl ProcessedImage {
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::of(&self.output)
    }
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Nothing processed yet.
#[must_use = "pipeline stages are consumed by advancing; call .normalize() to continue"]
pub struct Pending {
    settings: ProcessingSettings,
    source: Mono32FImage,
}

impl Pending {
    #[must_use]
    pub const fn source(&self) -> &Mono32FImage {
        &self.source
    }

    /// Apply brightness normalization (identity when disabled).
    pub fn normalize(self) -> Normalized {
        let normalized = crate::normalize::normalize(&self.source, &self.settings.normalization);
        Normalized {
            settings: self.settings,
            normalized,
        }
    }
}

// ───────────────────────── Stage 1: Normalized ───────────────────────

#[must_use = "pipeline stages are consumed by advancing; call .deconvolve() to continue"]
pub struct Normalized {
    settings: ProcessingSettings,
    normalized: Mono32FImage,
}

impl Normalized {
    #[must_use]
    pub const fn normalized(&self) -> &Mono32FImage {
        &self.normalized
    }

    /// Run Lucy-Richardson deconvolution, reporting each iteration to
    /// `checkpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Cancelled`] if `checkpoint` breaks.
    pub fn deconvolve<F>(self, checkpoint: F) -> Result<Deconvolved, PipelineError>
    where
        F: FnMut(StageProgress) -> ControlFlow<()>,
    {
        let deconvolved = crate::deconvolution::deconvolve(
            &self.normalized,
            &self.settings.lucy_richardson,
            checkpoint,
        )
        .ok_or(PipelineError::Cancelled)?;
        Ok(Deconvolved {
            settings: self.settings,
            deconvolved,
        })
    }
}

// ───────────────────────── Stage 2: Deconvolved ──────────────────────

#[must_use = "pipeline stages are consumed by advancing; call .unsharp_mask() to continue"]
pub struct Deconvolved {
    settings: ProcessingSettings,
    deconvolved: Mono32FImage,
}

impl Deconvolved {
    /// Re-enter the pipeline with a cached deconvolution result.
    pub const fn resume(deconvolved: Mono32FImage, settings: ProcessingSettings) -> Self {
        Self {
            settings,
            deconvolved,
        }
    }

    #[must_use]
    pub const fn deconvolved(&self) -> &Mono32FImage {
        &self.deconvolved
    }

    pub fn unsharp_mask(self) -> Sharpened {
        let sharpened = crate::unsharp::unsharp_mask(&self.deconvolved, &self.settings.unsharp_mask);
        Sharpened {
            settings: self.settings,
            deconvolved: self.deconvolved,
            sharpened,
        }
    }
}

// ───────────────────────── Stage 3: Sharpened ────────────────────────

#[must_use = "pipeline stages are consumed by advancing; call .apply_tone_curve() to continue"]
pub struct Sharpened {
    settings: ProcessingSettings,
    deconvolved: Mono32FImage,
    sharpened: Mono32FImage,
}

impl Sharpened {
    /// Re-enter the pipeline with cached deconvolution and sharpening
    /// results.
    pub const fn resume(
        deconvolved: Mono32FImage,
        sharpened: Mono32FImage,
        settings: ProcessingSettings,
    ) -> Self {
        Self {
            settings,
            deconvolved,
            sharpened,
        }
    }

    #[must_use]
    pub const fn sharpened(&self) -> &Mono32FImage {
        &self.sharpened
    }

    pub fn apply_tone_curve(self) -> ToneMapped {
        let output = self.settings.tone_curve.apply(&self.sharpened);
        ToneMapped {
            result: ProcessedImage {
                deconvolved: self.deconvolved,
                sharpened: self.sharpened,
                output,
            },
        }
    }
}

// ───────────────────────── Stage 4: ToneMapped ───────────────────────

#[must_use = "call .into_result() to take the processed image"]
pub struct ToneMapped {
    result: ProcessedImage,
}

impl ToneMapped {
    #[must_use]
    pub const fn output(&self) -> &Mono32FImage {
        &self.result.output
    }

    #[must_use]
    pub fn into_result(self) -> ProcessedImage {
        self.result
    }
}

// ───────────────────────── Drivers ───────────────────────────────────

/// Run every stage over `source`, calling `checkpoint` after each
/// deconvolution iteration and after each stage.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] for an image without pixels and
/// [`PipelineError::Cancelled`] when `checkpoint` breaks.
pub fn process<F>(
    source: &Mono32FImage,
    settings: &ProcessingSettings,
    checkpoint: F,
) -> Result<ProcessedImage, PipelineError>
where
    F: FnMut(StageProgress) -> ControlFlow<()>,
{
    rerun(ProcessingRequest::Sharpening, source, None, settings, checkpoint)
}

/// Run the pipeline starting at `request`, reusing `cached`
/// intermediates for the stages before it.
///
/// Falls back to a full run when `cached` is missing or was computed for
/// an image of different dimensions.
///
/// # Errors
///
/// Same as [`process`].
pub fn rerun<F>(
    request: ProcessingRequest,
    source: &Mono32FImage,
    cached: Option<&ProcessedImage>,
    settings: &ProcessingSettings,
    mut checkpoint: F,
) -> Result<ProcessedImage, PipelineError>
where
    F: FnMut(StageProgress) -> ControlFlow<()>,
{
    if source.width() == 0 || source.height() == 0 {
        return Err(PipelineError::EmptyInput);
    }

    let cached = cached.filter(|c| c.dimensions() == Dimensions::of(source));
    let sharpened = match (request, cached) {
        (ProcessingRequest::ToneCurve, Some(c)) => Sharpened::resume(
            c.deconvolved.clone(),
            c.sharpened.clone(),
            settings.clone(),
        ),
        (ProcessingRequest::UnsharpMasking, Some(c)) => {
            let sharpened =
                Deconvolved::resume(c.deconvolved.clone(), settings.clone()).unsharp_mask();
            stage_done(&mut checkpoint, Stage::UnsharpMasking)?;
            sharpened
        }
        _ => {
            let normalized = Pipeline::new(source.clone(), settings.clone()).normalize();
            stage_done(&mut checkpoint, Stage::Normalization)?;
            let deconvolved = normalized.deconvolve(&mut checkpoint)?;
            let sharpened = deconvolved.unsharp_mask();
            stage_done(&mut checkpoint, Stage::UnsharpMasking)?;
            sharpened
        }
    };

    let mapped = sharpened.apply_tone_curve();
    stage_done(&mut checkpoint, Stage::ToneCurve)?;
    Ok(mapped.into_result())
}

/// Report a finished single-step stage.
fn stage_done<F>(checkpoint: &mut F, stage: Stage) -> Result<(), PipelineError>
where
    F: FnMut(StageProgress) -> ControlFlow<()>,
{
    match checkpoint(StageProgress {
        stage,
        step: 1,
        total: 1,
    }) {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(()) => Err(PipelineError::Cancelled),
    }
}
