//! Incremental processing of the visible selection.
//!
//! The display engine keeps the source image, the current settings, the
//! selection rectangle and the view transform. Any change that affects
//! the selection's pixels aborts the in-flight run and starts a new one
//! over the clipped selection only. When only late-stage settings change
//! (unsharp mask or tone curve) the new run resumes from the cached
//! intermediates of the last completed run for the same rectangle.
//!
//! Readers always get a completed result or the unprocessed crop, never
//! a partially written buffer.

use std::sync::Arc;

use stackpost_pipeline::histogram::DEFAULT_BINS;
use stackpost_pipeline::{
    Dimensions, Histogram, LucyRichardson, Mono32FImage, ProcessedImage, ProcessingRequest,
    ProcessingSettings, Rect, ToneCurve, UnsharpMask, rerun,
};

use crate::error::EngineError;
use crate::executor::{Executor, RunOutcome};
use crate::progress::{CompletionStatus, ProgressEvent};
use crate::task::RunId;

/// View transform of the image widget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub zoom: f64,
    pub scroll_x: i32,
    pub scroll_y: i32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            scroll_x: 0,
            scroll_y: 0,
        }
    }
}

/// A completed run over one selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedSelection {
    pub rect: Rect,
    pub settings: ProcessingSettings,
    pub processed: ProcessedImage,
}

/// Pixels to show for the selection.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionImage {
    pub rect: Rect,
    pub image: Mono32FImage,
    /// `false` when no completed run covers the selection yet.
    pub is_processed: bool,
}

#[derive(Debug)]
pub struct DisplayEngine {
    executor: Executor<ProcessedSelection>,
    image: Option<Arc<Mono32FImage>>,
    settings: ProcessingSettings,
    selection: Rect,
    viewport: Viewport,
    latest: Option<Arc<ProcessedSelection>>,
}

impl Default for DisplayEngine {
    fn default() -> Self {
        Self::new(ProcessingSettings::default())
    }
}

impl DisplayEngine {
    #[must_use]
    pub fn new(settings: ProcessingSettings) -> Self {
        Self {
            executor: Executor::new("display"),
            image: None,
            settings,
            selection: Rect::default(),
            viewport: Viewport::default(),
            latest: None,
        }
    }

    // ── Inputs ──────────────────────────────────────────────────────────

    /// Replace the source image. The selection defaults to the whole
    /// image; cached results are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Spawn`] if the worker thread cannot be
    /// created.
    pub fn set_image(
        &mut self,
        image: Arc<Mono32FImage>,
        selection: Option<Rect>,
    ) -> Result<Option<RunId>, EngineError> {
        self.abort_processing();
        let dimensions = Dimensions::of(&image);
        self.selection = selection
            .unwrap_or_else(|| Rect::covering(dimensions))
            .clipped_to(dimensions);
        self.image = Some(image);
        self.latest = None;
        self.restart(ProcessingRequest::Sharpening)
    }

    /// Move the selection; the rectangle is clipped to the image.
    ///
    /// # Errors
    ///
    /// See [`set_image`](Self::set_image).
    pub fn new_selection(&mut self, rect: Rect) -> Result<Option<RunId>, EngineError> {
        self.selection = match &self.image {
            Some(image) => rect.clipped_to(Dimensions::of(image)),
            None => rect,
        };
        log::debug!("selection {:?}", self.selection);
        self.restart(ProcessingRequest::Sharpening)
    }

    /// Replace every setting and reprocess from the first stage.
    ///
    /// # Errors
    ///
    /// See [`set_image`](Self::set_image).
    pub fn new_processing_settings(
        &mut self,
        settings: ProcessingSettings,
    ) -> Result<Option<RunId>, EngineError> {
        self.settings = settings;
        self.restart(ProcessingRequest::Sharpening)
    }

    /// # Errors
    ///
    /// See [`set_image`](Self::set_image).
    pub fn lr_settings_changed(
        &mut self,
        lucy_richardson: LucyRichardson,
    ) -> Result<Option<RunId>, EngineError> {
        self.settings.lucy_richardson = lucy_richardson;
        self.restart(ProcessingRequest::Sharpening)
    }

    /// # Errors
    ///
    /// See [`set_image`](Self::set_image).
    pub fn unsharp_settings_changed(
        &mut self,
        unsharp_mask: UnsharpMask,
    ) -> Result<Option<RunId>, EngineError> {
        self.settings.unsharp_mask = unsharp_mask;
        self.restart(ProcessingRequest::UnsharpMasking)
    }

    /// # Errors
    ///
    /// See [`set_image`](Self::set_image).
    pub fn tone_curve_changed(&mut self, tone_curve: ToneCurve) -> Result<Option<RunId>, EngineError> {
        self.settings.tone_curve = tone_curve;
        self.restart(ProcessingRequest::ToneCurve)
    }

    /// Non-positive or non-finite zoom factors are ignored.
    pub fn image_view_zoom_changed(&mut self, zoom: f64) {
        if zoom.is_finite() && zoom > 0.0 {
            self.viewport.zoom = zoom;
        } else {
            log::warn!("ignoring zoom factor {zoom}");
        }
    }

    pub const fn image_view_scrolled(&mut self, scroll_x: i32, scroll_y: i32) {
        self.viewport.scroll_x = scroll_x;
        self.viewport.scroll_y = scroll_y;
    }

    // ── Queries ─────────────────────────────────────────────────────────

    #[must_use]
    pub const fn settings(&self) -> &ProcessingSettings {
        &self.settings
    }

    /// Selection in image pixels.
    #[must_use]
    pub const fn selection(&self) -> Rect {
        self.selection
    }

    #[must_use]
    pub const fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Selection scaled by the view zoom.
    #[must_use]
    pub fn scaled_logical_selection(&self) -> Rect {
        self.selection.scaled(self.viewport.zoom)
    }

    /// Selection in widget coordinates: scaled, then shifted by the
    /// scroll offset.
    #[must_use]
    pub fn physical_selection(&self) -> Rect {
        self.scaled_logical_selection()
            .offset_back(self.viewport.scroll_x, self.viewport.scroll_y)
    }

    /// Histogram of the sharpened selection when a completed run covers
    /// it, otherwise of the raw selection.
    #[must_use]
    pub fn histogram(&self) -> Histogram {
        if let Some(latest) = self.latest_for_selection() {
            let sharpened = &latest.processed.sharpened;
            return Histogram::of_selection(sharpened, Rect::covering(Dimensions::of(sharpened)));
        }
        self.image.as_ref().map_or_else(
            || Histogram::empty(DEFAULT_BINS),
            |image| Histogram::of_selection(image, self.selection),
        )
    }

    /// The pixels to show for the selection.
    ///
    /// Aborts an in-flight run, then returns the last completed result
    /// for the current rectangle, or the unprocessed crop if there is
    /// none. `None` without a source image.
    pub fn processed_selection(&mut self) -> Option<SelectionImage> {
        self.abort_processing();
        if let Some(latest) = self.latest_for_selection() {
            return Some(SelectionImage {
                rect: latest.rect,
                image: latest.processed.output.clone(),
                is_processed: true,
            });
        }
        let image = self.image.as_ref()?;
        Some(SelectionImage {
            rect: self.selection,
            image: self.selection.crop(image),
            is_processed: false,
        })
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.executor.is_running()
    }

    pub fn abort_processing(&mut self) {
        self.executor.abort();
        self.harvest();
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

    pub fn set_progress_handler(&mut self, handler: impl FnMut(RunId, &ProgressEvent) + 'static) {
        self.executor.set_progress_handler(handler);
    }

    pub fn set_completion_handler(
        &mut self,
        handler: impl FnMut(RunId, CompletionStatus) + 'static,
    ) {
        self.executor.set_completion_handler(handler);
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn latest_for_selection(&self) -> Option<&ProcessedSelection> {
        self.latest
            .as_deref()
            .filter(|latest| latest.rect == self.selection)
    }

    /// Abort the live run and start a new one from `request`.
    fn restart(&mut self, request: ProcessingRequest) -> Result<Option<RunId>, EngineError> {
        self.abort_processing();
        let Some(image) = self.image.clone() else {
            return Ok(None);
        };
        if self.selection.is_empty() {
            log::debug!("empty selection, nothing to process");
            return Ok(None);
        }

        let rect = self.selection;
        let settings = self.settings.clone();
        let cached = self
            .latest
            .clone()
            .filter(|latest| latest.rect == rect && reusable(request, &latest.settings, &settings));
        let request = if cached.is_some() {
            request
        } else {
            ProcessingRequest::Sharpening
        };
        log::debug!("processing {rect:?} from {request:?}");

        self.executor
            .start(move |ctx| {
                let source = rect.crop(&image);
                let processed = rerun(
                    request,
                    &source,
                    cached.as_ref().map(|c| &c.processed),
                    &settings,
                    ctx.pipeline_checkpoint(),
                )?;
                Ok(ProcessedSelection {
                    rect,
                    settings,
                    processed,
                })
            })
            .map(Some)
    }

    fn harvest(&mut self) {
        while let Some(outcome) = self.executor.poll() {
            self.keep(outcome);
        }
    }

    fn keep(&mut self, outcome: RunOutcome<ProcessedSelection>) -> CompletionStatus {
        let status = outcome.status();
        match outcome.result {
            Ok(selection) => self.latest = Some(Arc::new(selection)),
            Err(reason) => log::debug!("display {} aborted: {reason}", outcome.run),
        }
        status
    }
}

/// Whether intermediates computed with `cached` settings can seed a run
/// starting at `request` with `current` settings.
fn reusable(
    request: ProcessingRequest,
    cached: &ProcessingSettings,
    current: &ProcessingSettings,
) -> bool {
    let early_stages_match = cached.normalization == current.normalization
        && cached.lucy_richardson == current.lucy_richardson;
    match request {
        ProcessingRequest::Sharpening => false,
        ProcessingRequest::UnsharpMasking => early_stages_match,
        ProcessingRequest::ToneCurve => {
            early_stages_match && cached.unsharp_mask == current.unsharp_mask
        }
    }
}
