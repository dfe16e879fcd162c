//! stackpost-pipeline: pure pixel pipeline and registration math (sans-IO).
//!
//! Enhances a stacked single-channel image through:
//! normalization -> Lucy-Richardson deconvolution -> unsharp masking ->
//! tone curve, and provides the alignment building blocks (phase
//! correlation, limb detection, sub-pixel translation) used to register
//! frame sequences.
//!
//! Every stage is a deterministic function of its input and settings.
//! Long-running stages report progress through a checkpoint callback
//! that can stop the run; this crate has no threads and no I/O. Threads,
//! cancellation tokens and files live in `stackpost-worker`.

pub mod align;
pub mod blur;
pub mod deconvolution;
pub mod histogram;
pub mod normalize;
pub mod pipeline;
pub mod settings;
pub mod tone_curve;
pub mod types;
pub mod unsharp;

pub use align::{AlignError, AlignmentMethod, Translation};
pub use histogram::Histogram;
pub use pipeline::{Pipeline, ProcessedImage, ProcessingRequest, process, rerun};
pub use settings::{AdaptiveCurve, LucyRichardson, Normalization, ProcessingSettings, UnsharpMask};
pub use tone_curve::{CurvePoint, ToneCurve, ToneCurveError};
pub use types::{Dimensions, Mono32FImage, PipelineError, Rect, Stage, StageProgress};
