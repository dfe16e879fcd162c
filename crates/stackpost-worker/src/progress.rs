//! Typed progress events from a worker to its owner.
//!
//! Each run gets its own single-producer channel. Events arrive in the
//! order the worker emitted them, and a run's last event is always
//! exactly one terminal event ([`ProgressEvent::Completed`] or
//! [`ProgressEvent::Aborted`]).

use std::path::PathBuf;

use crossbeam::channel::{self, Receiver, Sender};
use stackpost_pipeline::{PipelineError, Stage, Translation};

/// Why a run ended without completing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbortReason {
    /// The owner requested cancellation and the worker observed it.
    #[error("cancelled")]
    Cancelled,

    /// The job hit an unrecoverable error.
    #[error("{0}")]
    Failed(String),
}

impl From<PipelineError> for AbortReason {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Cancelled => Self::Cancelled,
            other => Self::Failed(other.to_string()),
        }
    }
}

/// Terminal status delivered to completion handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Completed,
    Aborted,
}

/// One progress notification.
///
/// `index` is zero-based; `total` is the range of the current phase.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Phase correlation measured frame `index` (1-based within a
    /// `total` of `frames - 1`); `translation` is cumulative relative to
    /// the first frame.
    TranslationComputed {
        index: usize,
        total: usize,
        translation: Translation,
    },
    /// An aligned frame was written.
    ImageSaved {
        index: usize,
        total: usize,
        path: PathBuf,
    },
    /// Limb alignment detected a disc.
    DiscRadiusFound {
        index: usize,
        total: usize,
        radius: f32,
    },
    /// Limb alignment will fit every frame with this radius.
    AverageRadiusUsed { radius: f32 },
    /// Limb alignment stabilized frame `index`.
    StabilizationProgress { index: usize, total: usize },
    /// A single frame could not be processed; the run continues.
    StabilizationFailure { index: usize, message: String },
    /// Pixel pipeline progress.
    StageProgress { stage: Stage, step: u32, total: u32 },
    /// Terminal: the run finished.
    Completed,
    /// Terminal: the run stopped early.
    Aborted { reason: AbortReason },
}

impl ProgressEvent {
    /// Whether this event ends a run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted { .. })
    }
}

/// Create the channel for one run.
pub(crate) fn channel() -> (ProgressSender, Receiver<ProgressEvent>) {
    let (tx, rx) = channel::unbounded();
    (ProgressSender { tx }, rx)
}

/// Worker side of a run's progress channel.
#[derive(Debug)]
pub struct ProgressSender {
    tx: Sender<ProgressEvent>,
}

impl ProgressSender {
    /// Send an event. An owner that has gone away is not an error for
    /// the worker; the event is dropped.
    pub fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("progress receiver dropped, discarding event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_events() {
        assert!(ProgressEvent::Completed.is_terminal());
        assert!(
            ProgressEvent::Aborted {
                reason: AbortReason::Cancelled
            }
            .is_terminal()
        );
        assert!(!ProgressEvent::AverageRadiusUsed { radius: 3.0 }.is_terminal());
    }

    #[test]
    fn channel_preserves_order() {
        let (tx, rx) = channel();
        for index in 0..5 {
            tx.send(ProgressEvent::StabilizationProgress { index, total: 5 });
        }
        tx.send(ProgressEvent::Completed);
        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received.len(), 6);
        assert_eq!(
            received[3],
            ProgressEvent::StabilizationProgress { index: 3, total: 5 }
        );
        assert_eq!(received.last(), Some(&ProgressEvent::Completed));
    }

    #[test]
    fn sending_after_receiver_drop_is_silent() {
        let (tx, rx) = channel();
        drop(rx);
        tx.send(ProgressEvent::Completed);
    }

    #[test]
    fn pipeline_cancellation_maps_to_cancelled() {
        assert_eq!(
            AbortReason::from(PipelineError::Cancelled),
            AbortReason::Cancelled
        );
        assert!(matches!(
            AbortReason::from(PipelineError::EmptyInput),
            AbortReason::Failed(_)
        ));
    }
}
