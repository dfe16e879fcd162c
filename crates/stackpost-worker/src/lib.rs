//! stackpost-worker: cancellable background execution for stackpost.
//!
//! Each engine runs at most one job at a time on a dedicated thread that
//! is created per run and exits when the run ends. The owner and the
//! worker share exactly two things: an [`ExclusiveCell`] holding the
//! live run's [`WorkerHandle`], and a per-run channel of typed
//! [`ProgressEvent`]s.
//!
//! - [`Executor`] is the shared core: start, abort, poll and wait.
//! - [`DisplayEngine`] reprocesses the visible selection incrementally.
//! - [`ProcessingEngine`] processes a whole image.
//! - [`AlignmentEngine`] registers a sequence of image files.
//!
//! Cancellation is cooperative. Jobs check their [`RunContext`] between
//! files and between pipeline iterations; an observed cancellation ends
//! the run with [`ProgressEvent::Aborted`] rather than an error.

pub mod alignment;
pub mod cell;
pub mod display;
pub mod error;
pub mod executor;
pub mod image_io;
pub mod processing;
pub mod progress;
pub mod task;

pub use alignment::{AlignedFrame, AlignmentEngine, AlignmentRun, AlignmentSummary, OutputPolicy};
pub use cell::{ExclusiveCell, ExclusiveGuard};
pub use display::{DisplayEngine, ProcessedSelection, SelectionImage, Viewport};
pub use error::{EngineError, ImageIoError};
pub use executor::{Executor, RunOutcome};
pub use processing::ProcessingEngine;
pub use progress::{AbortReason, CompletionStatus, ProgressEvent};
pub use task::{CancelToken, RunContext, RunId, WorkerHandle};
