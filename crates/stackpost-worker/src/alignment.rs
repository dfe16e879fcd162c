//! Batch alignment of a frame sequence on a worker thread.
//!
//! Frames are read from disk one at a time, registered against the
//! sequence, shifted by bilinear resampling and written as 16-bit PNG.
//! Cancellation is checked before every file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use stackpost_pipeline::align::limb::{self, Disc};
use stackpost_pipeline::align::phase_correlation::PhaseCorrelator;
use stackpost_pipeline::align::translate::translate;
use stackpost_pipeline::{AlignmentMethod, Dimensions, Mono32FImage, Translation};

use crate::error::EngineError;
use crate::executor::{Executor, RunOutcome};
use crate::image_io::{load_mono, save_mono16};
use crate::progress::{AbortReason, CompletionStatus, ProgressEvent};
use crate::task::{RunContext, RunId};

/// Default file-name suffix for aligned frames.
pub const DEFAULT_SUFFIX: &str = "_aligned";

/// Where aligned frames are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPolicy {
    pub directory: PathBuf,
    pub suffix: String,
}

impl OutputPolicy {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            suffix: DEFAULT_SUFFIX.to_string(),
        }
    }

    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// `<directory>/<input stem><suffix>.png`
    #[must_use]
    pub fn output_path(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map_or_else(|| "frame".into(), |stem| stem.to_string_lossy());
        self.directory.join(format!("{stem}{}.png", self.suffix))
    }
}

/// One alignment job. Input order is processing and output order.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentRun {
    pub inputs: Vec<PathBuf>,
    pub method: AlignmentMethod,
    pub output: OutputPolicy,
}

/// A frame that was aligned and written.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedFrame {
    /// Position in [`AlignmentRun::inputs`].
    pub index: usize,
    pub path: PathBuf,
    /// Shift applied to the frame's content.
    pub shift: Translation,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignmentSummary {
    pub frames: Vec<AlignedFrame>,
    /// Inputs left out because no disc or limb could be found.
    pub skipped: Vec<usize>,
}

/// Run `run` to completion on the calling thread.
///
/// # Errors
///
/// Returns [`AbortReason::Cancelled`] when `ctx` is cancelled and
/// [`AbortReason::Failed`] for unreadable inputs, unwritable outputs,
/// frames of different size, or a limb run without any disc.
pub fn align_frames(run: &AlignmentRun, ctx: &RunContext) -> Result<AlignmentSummary, AbortReason> {
    if run.inputs.is_empty() {
        return Ok(AlignmentSummary::default());
    }
    std::fs::create_dir_all(&run.output.directory).map_err(|err| {
        AbortReason::Failed(format!(
            "cannot create {}: {err}",
            run.output.directory.display()
        ))
    })?;

    log::info!(
        "aligning {} frames with {:?} into {}",
        run.inputs.len(),
        run.method,
        run.output.directory.display()
    );
    match run.method {
        AlignmentMethod::PhaseCorrelation => phase_correlation(run, ctx),
        AlignmentMethod::Limb => limb_stabilization(run, ctx),
    }
}

fn load(path: &Path) -> Result<Mono32FImage, AbortReason> {
    load_mono(path).map_err(|err| AbortReason::Failed(err.to_string()))
}

fn save_shifted(
    run: &AlignmentRun,
    ctx: &RunContext,
    index: usize,
    frame: &Mono32FImage,
    shift: Translation,
) -> Result<AlignedFrame, AbortReason> {
    let path = run.output.output_path(&run.inputs[index]);
    save_mono16(&translate(frame, shift), &path)
        .map_err(|err| AbortReason::Failed(err.to_string()))?;
    ctx.emit(ProgressEvent::ImageSaved {
        index,
        total: run.inputs.len(),
        path: path.clone(),
    });
    Ok(AlignedFrame { index, path, shift })
}

// ───────────────────────── Phase correlation ─────────────────────────

fn phase_correlation(run: &AlignmentRun, ctx: &RunContext) -> Result<AlignmentSummary, AbortReason> {
    let total = run.inputs.len();

    ctx.checkpoint()?;
    let first = load(&run.inputs[0])?;
    let correlator = PhaseCorrelator::new(Dimensions::of(&first));
    let fatal = |index: usize, err: stackpost_pipeline::AlignError| {
        AbortReason::Failed(format!("{}: {err}", run.inputs[index].display()))
    };
    let mut previous = correlator.spectrum(&first).map_err(|err| fatal(0, err))?;
    drop(first);

    let mut offsets = Vec::with_capacity(total);
    offsets.push(Translation::default());
    for index in 1..total {
        ctx.checkpoint()?;
        let frame = load(&run.inputs[index])?;
        let spectrum = correlator.spectrum(&frame).map_err(|err| fatal(index, err))?;
        let step = correlator.translation(&previous, &spectrum);
        let offset = offsets[index - 1] + step;
        log::debug!(
            "frame {index}: step ({:.3}, {:.3}), offset ({:.3}, {:.3})",
            step.dx,
            step.dy,
            offset.dx,
            offset.dy
        );
        offsets.push(offset);
        previous = spectrum;
        ctx.emit(ProgressEvent::TranslationComputed {
            index,
            total: total - 1,
            translation: offset,
        });
    }

    let mut summary = AlignmentSummary::default();
    for (index, offset) in offsets.into_iter().enumerate() {
        ctx.checkpoint()?;
        let frame = load(&run.inputs[index])?;
        summary
            .frames
            .push(save_shifted(run, ctx, index, &frame, -offset)?);
    }
    Ok(summary)
}

// ───────────────────────── Limb stabilization ────────────────────────

fn limb_stabilization(run: &AlignmentRun, ctx: &RunContext) -> Result<AlignmentSummary, AbortReason> {
    let total = run.inputs.len();
    let mut summary = AlignmentSummary::default();

    let mut discs: Vec<(usize, Disc)> = Vec::with_capacity(total);
    for (index, input) in run.inputs.iter().enumerate() {
        ctx.checkpoint()?;
        let frame = load(input)?;
        match limb::detect_disc(&frame) {
            Ok(disc) => {
                ctx.emit(ProgressEvent::DiscRadiusFound {
                    index,
                    total,
                    radius: disc.radius,
                });
                discs.push((index, disc));
            }
            Err(err) => {
                log::warn!("{}: {err}", input.display());
                ctx.emit(ProgressEvent::StabilizationFailure {
                    index,
                    message: err.to_string(),
                });
                summary.skipped.push(index);
            }
        }
    }

    if discs.is_empty() {
        return Err(AbortReason::Failed(
            "no disc found in any frame".to_string(),
        ));
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let radius = (discs.iter().map(|(_, d)| f64::from(d.radius)).sum::<f64>()
        / discs.len() as f64) as f32;
    log::info!("average disc radius {radius:.2} over {} frames", discs.len());
    ctx.emit(ProgressEvent::AverageRadiusUsed { radius });

    let mut reference: Option<(f32, f32)> = None;
    for (index, disc) in discs {
        ctx.checkpoint()?;
        let frame = load(&run.inputs[index])?;
        let refined = match limb::refine_center(&frame, &disc, radius) {
            Ok(refined) => refined,
            Err(err) => {
                log::warn!("{}: {err}", run.inputs[index].display());
                ctx.emit(ProgressEvent::StabilizationFailure {
                    index,
                    message: err.to_string(),
                });
                summary.skipped.push(index);
                continue;
            }
        };
        ctx.emit(ProgressEvent::StabilizationProgress { index, total });

        let (ref_x, ref_y) = *reference.get_or_insert((refined.center_x, refined.center_y));
        let shift = Translation::new(ref_x - refined.center_x, ref_y - refined.center_y);
        summary
            .frames
            .push(save_shifted(run, ctx, index, &frame, shift)?);
    }
    summary.skipped.sort_unstable();
    Ok(summary)
}

// ───────────────────────── Engine ────────────────────────────────────

/// Runs [`AlignmentRun`]s on a background thread, one at a time.
#[derive(Debug)]
pub struct AlignmentEngine {
    executor: Executor<AlignmentSummary>,
    last: Option<RunOutcome<AlignmentSummary>>,
}

impl Default for AlignmentEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AlignmentEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            executor: Executor::new("align"),
            last: None,
        }
    }

    /// Start aligning `run`. Waits for a previous run to retire first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Spawn`] if the worker thread cannot be
    /// created.
    pub fn start(&mut self, run: AlignmentRun) -> Result<RunId, EngineError> {
        self.last = None;
        self.executor.start(move |ctx| align_frames(&run, ctx))
    }

    /// Cancel the live run and wait for it to retire.
    ///
    /// Returns the status the run actually settled with, which is
    /// `Completed` if it finished before the cancellation was seen.
    pub fn abort(&mut self) -> Option<CompletionStatus> {
        self.executor.abort();
        self.harvest()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.executor.is_running()
    }

    /// Deliver pending events; returns the status once a run settles.
    pub fn poll(&mut self) -> Option<CompletionStatus> {
        let outcome = self.executor.poll()?;
        Some(self.keep(outcome))
    }

    /// Block until the live run settles.
    pub fn wait(&mut self) -> Option<CompletionStatus> {
        let outcome = self.executor.wait()?;
        Some(self.keep(outcome))
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, leaving
    /// the run live.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<CompletionStatus> {
        let outcome = self.executor.wait_timeout(timeout)?;
        Some(self.keep(outcome))
    }

    /// Summary of the last completed run.
    #[must_use]
    pub fn summary(&self) -> Option<&AlignmentSummary> {
        self.last.as_ref().and_then(|outcome| outcome.result.as_ref().ok())
    }

    /// Why the last run was aborted, if it was.
    #[must_use]
    pub fn abort_reason(&self) -> Option<&AbortReason> {
        self.last.as_ref().and_then(|outcome| outcome.result.as_ref().err())
    }

    pub fn set_progress_handler(&mut self, handler: impl FnMut(RunId, &ProgressEvent) + 'static) {
        self.executor.set_progress_handler(handler);
    }

    pub fn set_completion_handler(
        &mut self,
        handler: impl FnMut(RunId, CompletionStatus) + 'static,
    ) {
        self.executor.set_completion_handler(handler);
    }

    fn harvest(&mut self) -> Option<CompletionStatus> {
        let mut status = None;
        while let Some(outcome) = self.executor.poll() {
            status = Some(self.keep(outcome));
        }
        status
    }

    fn keep(&mut self, outcome: RunOutcome<AlignmentSummary>) -> CompletionStatus {
        let status = outcome.status();
        self.last = Some(outcome);
        status
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn output_path_uses_stem_and_suffix() {
        let policy = OutputPolicy::new("/out");
        assert_eq!(
            policy.output_path(Path::new("/in/moon_003.tif")),
            PathBuf::from("/out/moon_003_aligned.png")
        );
        let policy = policy.with_suffix("-reg");
        assert_eq!(
            policy.output_path(Path::new("sun.png")),
            PathBuf::from("/out/sun-reg.png")
        );
    }

    #[test]
    fn empty_run_completes_with_nothing_saved() {
        let mut engine = AlignmentEngine::new();
        let dir = tempfile::tempdir().unwrap();
        engine
            .start(AlignmentRun {
                inputs: Vec::new(),
                method: AlignmentMethod::PhaseCorrelation,
                output: OutputPolicy::new(dir.path()),
            })
            .unwrap();
        assert_eq!(engine.wait(), Some(CompletionStatus::Completed));
        assert_eq!(engine.summary(), Some(&AlignmentSummary::default()));
    }

    #[test]
    fn missing_input_fails_the_run() {
        let mut engine = AlignmentEngine::new();
        let dir = tempfile::tempdir().unwrap();
        engine
            .start(AlignmentRun {
                inputs: vec![dir.path().join("missing.png")],
                method: AlignmentMethod::Limb,
                output: OutputPolicy::new(dir.path().join("out")),
            })
            .unwrap();
        assert_eq!(engine.wait(), Some(CompletionStatus::Aborted));
        assert!(matches!(engine.abort_reason(), Some(AbortReason::Failed(_))));
        assert!(engine.summary().is_none());
    }
}
