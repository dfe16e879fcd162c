//! Whole-image processing on a worker thread.

use std::sync::Arc;
use std::time::Duration;

use stackpost_pipeline::{Mono32FImage, ProcessingSettings, process};

use crate::error::EngineError;
use crate::executor::{Executor, RunOutcome};
use crate::progress::{AbortReason, CompletionStatus, ProgressEvent};
use crate::task::RunId;

/// Runs the full pipeline over an image and holds the final output.
#[derive(Debug)]
pub struct ProcessingEngine {
    executor: Executor<Mono32FImage>,
    output: Option<Mono32FImage>,
    last_abort: Option<AbortReason>,
}

impl Default for ProcessingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            executor: Executor::new("process"),
            output: None,
            last_abort: None,
        }
    }

    /// Process `image` with `settings`. The previous output is discarded
    /// immediately; a live run is waited for, not cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Spawn`] if the worker thread cannot be
    /// created.
    pub fn start_processing(
        &mut self,
        image: Arc<Mono32FImage>,
        settings: ProcessingSettings,
    ) -> Result<RunId, EngineError> {
        self.output = None;
        self.last_abort = None;
        self.executor.start(move |ctx| {
            let processed = process(&image, &settings, ctx.pipeline_checkpoint())?;
            Ok(processed.output)
        })
    }

    /// The finished image.
    ///
    /// # Panics
    ///
    /// Panics if no run has completed since the last
    /// [`start_processing`](Self::start_processing). Check
    /// [`is_output_ready`](Self::is_output_ready) first.
    #[must_use]
    #[allow(clippy::panic)]
    pub fn processed_output(&self) -> &Mono32FImage {
        let Some(output) = self.output.as_ref() else {
            panic!("processed output requested before processing completed");
        };
        output
    }

    /// Take ownership of the finished image, if there is one.
    pub fn take_output(&mut self) -> Option<Mono32FImage> {
        self.output.take()
    }

    #[must_use]
    pub const fn is_output_ready(&self) -> bool {
        self.output.is_some()
    }

    /// Why the last run was aborted, if it was.
    #[must_use]
    pub const fn abort_reason(&self) -> Option<&AbortReason> {
        self.last_abort.as_ref()
    }

    /// Cancel the live run and wait for it to retire.
    ///
    /// Returns the status the run actually settled with. A run that
    /// finished before the cancellation was seen reports `Completed` and
    /// keeps its output. Returns `None` when nothing was left to settle.
    pub fn abort_processing(&mut self) -> Option<CompletionStatus> {
        self.executor.abort();
        let mut status = None;
        while let Some(outcome) = self.executor.poll() {
            status = Some(self.keep(outcome));
        }
        status
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
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

    pub fn set_progress_handler(&mut self, handler: impl FnMut(RunId, &ProgressEvent) + 'static) {
        self.executor.set_progress_handler(handler);
    }

    pub fn set_completion_handler(
        &mut self,
        handler: impl FnMut(RunId, CompletionStatus) + 'static,
    ) {
        self.executor.set_completion_handler(handler);
    }

    fn keep(&mut self, outcome: RunOutcome<Mono32FImage>) -> CompletionStatus {
        let status = outcome.status();
        match outcome.result {
            Ok(output) => self.output = Some(output),
            Err(reason) => {
                log::info!("processing {} aborted: {reason}", outcome.run);
                self.last_abort = Some(reason);
            }
        }
        status
    }
}
