//! One background run: its identity, cancellation token, and thread.
//!
//! A run is registered in its engine's [`ExclusiveCell`] before the
//! thread starts and withdraws its own registration when it retires.
//! Retirement happens after the terminal event is sent, including when
//! the job panics, so an owner that waits for an empty slot never waits
//! forever on a dead thread.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam::channel::Receiver;
use stackpost_pipeline::StageProgress;

use crate::cell::ExclusiveCell;
use crate::error::EngineError;
use crate::progress::{self, AbortReason, ProgressEvent, ProgressSender};

/// Identity of one run of an engine. Ids increase per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(pub(crate) u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run#{}", self.0)
    }
}

/// Shared cancellation flag for one run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What the exclusive cell holds while a run is live.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub run: RunId,
    pub cancel: CancelToken,
}

/// The slot an engine shares with its worker thread.
pub type Registration = Arc<ExclusiveCell<Option<WorkerHandle>>>;

/// Everything a job sees of its run.
#[derive(Debug)]
pub struct RunContext {
    run: RunId,
    cancel: CancelToken,
    progress: ProgressSender,
}

impl RunContext {
    #[must_use]
    pub const fn run(&self) -> RunId {
        self.run
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancellation point between units of work.
    ///
    /// # Errors
    ///
    /// Returns [`AbortReason::Cancelled`] once the owner has requested
    /// cancellation.
    pub fn checkpoint(&self) -> Result<(), AbortReason> {
        if self.is_cancelled() {
            log::debug!("{} observed cancellation", self.run);
            return Err(AbortReason::Cancelled);
        }
        Ok(())
    }

    pub fn emit(&self, event: ProgressEvent) {
        self.progress.send(event);
    }

    /// Checkpoint callback for the pixel pipeline: forwards stage
    /// progress as events and stops the pipeline once cancelled.
    pub fn pipeline_checkpoint(&self) -> impl FnMut(StageProgress) -> ControlFlow<()> + '_ {
        move |progress| {
            self.emit(ProgressEvent::StageProgress {
                stage: progress.stage,
                step: progress.step,
                total: progress.total,
            });
            if self.is_cancelled() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }
    }
}

/// Clears the run's registration when dropped, whether the thread body
/// returned, unwound, or never started.
struct Retirement {
    registration: Registration,
    run: RunId,
}

impl Drop for Retirement {
    fn drop(&mut self) {
        let mut slot = self.registration.lock();
        if slot.as_ref().is_some_and(|handle| handle.run == self.run) {
            *slot = None;
            log::debug!("{} retired", self.run);
        }
    }
}

/// Owner side of a spawned run.
#[derive(Debug)]
pub struct WorkerTask<R> {
    pub(crate) run: RunId,
    pub(crate) cancel: CancelToken,
    pub(crate) thread: JoinHandle<Result<R, AbortReason>>,
    pub(crate) events: Receiver<ProgressEvent>,
    pub(crate) terminal_seen: bool,
}

/// Register `run` in `registration` and start its thread.
///
/// Blocks until any previous run has retired from the slot.
///
/// # Errors
///
/// Returns [`EngineError::Spawn`] if the OS refuses to create the thread;
/// the registration is withdrawn again in that case.
pub fn spawn<R, F>(
    name: &str,
    run: RunId,
    registration: &Registration,
    job: F,
) -> Result<WorkerTask<R>, EngineError>
where
    R: Send + 'static,
    F: FnOnce(&RunContext) -> Result<R, AbortReason> + Send + 'static,
{
    let cancel = CancelToken::default();
    {
        let mut slot = registration.wait_until(Option::is_none);
        *slot = Some(WorkerHandle {
            run,
            cancel: cancel.clone(),
        });
    }

    let (progress, events) = progress::channel();
    let retirement = Retirement {
        registration: Arc::clone(registration),
        run,
    };
    let context = RunContext {
        run,
        cancel: cancel.clone(),
        progress,
    };

    let thread = thread::Builder::new()
        .name(format!("{name}-{}", run.0))
        .spawn(move || {
            let _retirement = retirement;
            log::debug!("{} started", context.run);
            let outcome = job(&context);
            match &outcome {
                Ok(_) => context.emit(ProgressEvent::Completed),
                Err(reason) => context.emit(ProgressEvent::Aborted {
                    reason: reason.clone(),
                }),
            }
            outcome
        })?;

    Ok(WorkerTask {
        run,
        cancel,
        thread,
        events,
        terminal_seen: false,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn registration() -> Registration {
        Arc::new(ExclusiveCell::new(None))
    }

    #[test]
    fn run_registers_then_retires() {
        let slot = registration();
        let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(0);
        let task = spawn("test", RunId(1), &slot, move |_ctx| {
            release_rx.recv().ok();
            Ok(7)
        })
        .unwrap();

        assert_eq!(
            slot.lock().as_ref().map(|h| h.run),
            Some(RunId(1)),
            "handle must be registered while the job runs"
        );
        release_tx.send(()).unwrap();

        let retired = slot.wait_until(Option::is_none);
        assert!(retired.is_none());
        drop(retired);
        assert_eq!(task.thread.join().unwrap(), Ok(7));
        let events: Vec<_> = task.events.try_iter().collect();
        assert_eq!(events, vec![ProgressEvent::Completed]);
    }

    #[test]
    fn cancelled_job_emits_aborted() {
        let slot = registration();
        let task = spawn("test", RunId(2), &slot, |ctx| -> Result<(), _> {
            loop {
                ctx.checkpoint()?;
                thread::yield_now();
            }
        })
        .unwrap();

        task.cancel.cancel();
        assert_eq!(task.thread.join().unwrap(), Err(AbortReason::Cancelled));
        assert!(slot.lock().is_none(), "aborted run must retire");
        assert_eq!(
            task.events.try_iter().last(),
            Some(ProgressEvent::Aborted {
                reason: AbortReason::Cancelled
            })
        );
    }

    #[test]
    fn panicking_job_still_retires() {
        let slot = registration();
        #[allow(clippy::panic)]
        let task = spawn("test", RunId(3), &slot, |_ctx| -> Result<(), AbortReason> {
            panic!("job blew up");
        })
        .unwrap();

        assert!(task.thread.join().is_err());
        assert!(slot.lock().is_none(), "panicked run must retire");
        assert_eq!(task.events.try_iter().count(), 0);
    }

    #[test]
    fn pipeline_checkpoint_forwards_progress_and_breaks_when_cancelled() {
        let (progress, events) = progress::channel();
        let ctx = RunContext {
            run: RunId(4),
            cancel: CancelToken::default(),
            progress,
        };
        let step = StageProgress {
            stage: stackpost_pipeline::Stage::Deconvolution,
            step: 1,
            total: 3,
        };
        {
            let mut checkpoint = ctx.pipeline_checkpoint();
            assert_eq!(checkpoint(step), ControlFlow::Continue(()));
        }
        ctx.cancel.cancel();
        {
            let mut checkpoint = ctx.pipeline_checkpoint();
            assert_eq!(checkpoint(step), ControlFlow::Break(()));
        }
        assert_eq!(events.try_iter().count(), 2);
    }

    #[test]
    fn run_id_display() {
        assert_eq!(RunId(12).to_string(), "run#12");
    }
}
