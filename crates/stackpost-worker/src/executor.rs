//! Single-run executor shared by the display, processing and alignment
//! engines.
//!
//! An executor owns at most one live [`WorkerTask`]. Starting a run
//! first waits for the previous run to retire; aborting cancels the live
//! run and waits for it the same way. Settling a run joins its thread,
//! forwards any remaining progress events, and calls the completion
//! handler exactly once.
//!
//! The owner drives delivery: [`Executor::poll`] drains events without
//! blocking and [`Executor::wait`] blocks until the live run settles.
//! Handlers run on the owner's thread, never on the worker.

use std::collections::VecDeque;

use crossbeam::channel::{RecvTimeoutError, TryRecvError};

use crate::cell::ExclusiveCell;
use crate::error::EngineError;
use crate::progress::{AbortReason, CompletionStatus, ProgressEvent};
use crate::task::{self, Registration, RunContext, RunId, WorkerTask};

/// Callback for progress events, including the terminal one.
pub type ProgressHandler = Box<dyn FnMut(RunId, &ProgressEvent)>;

/// Callback for the end of a run.
pub type CompletionHandler = Box<dyn FnMut(RunId, CompletionStatus)>;

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome<R> {
    pub run: RunId,
    pub result: Result<R, AbortReason>,
}

impl<R> RunOutcome<R> {
    #[must_use]
    pub fn status(&self) -> CompletionStatus {
        match &self.result {
            Ok(_) => CompletionStatus::Completed,
            Err(_) => CompletionStatus::Aborted,
        }
    }
}

pub struct Executor<R> {
    name: &'static str,
    registration: Registration,
    current: Option<WorkerTask<R>>,
    settled: VecDeque<RunOutcome<R>>,
    next_run: u64,
    progress_handler: Option<ProgressHandler>,
    completion_handler: Option<CompletionHandler>,
}

impl<R> std::fmt::Debug for Executor<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.name)
            .field("current", &self.current.as_ref().map(|task| task.run))
            .field("settled", &self.settled.len())
            .finish_non_exhaustive()
    }
}

impl<R: Send + 'static> Executor<R> {
    /// Start `job` on a new worker thread.
    ///
    /// A run that is still live is not cancelled: this waits for it to
    /// retire and settles it first. Call [`Executor::abort`] beforehand
    /// to replace a run instead of waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Spawn`] if the worker thread cannot be
    /// created.
    pub fn start<F>(&mut self, job: F) -> Result<RunId, EngineError>
    where
        F: FnOnce(&RunContext) -> Result<R, AbortReason> + Send + 'static,
    {
        if let Some(previous) = self.current.take() {
            log::debug!("{}: waiting for {} before starting", self.name, previous.run);
            self.settle(previous);
        }

        self.next_run += 1;
        let run = RunId(self.next_run);
        let task = task::spawn(self.name, run, &self.registration, job)?;
        log::info!("{}: started {run}", self.name);
        self.current = Some(task);
        Ok(run)
    }
}

impl<R> Executor<R> {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            registration: std::sync::Arc::new(ExclusiveCell::new(None)),
            current: None,
            settled: VecDeque::new(),
            next_run: 0,
            progress_handler: None,
            completion_handler: None,
        }
    }

    pub fn set_progress_handler(&mut self, handler: impl FnMut(RunId, &ProgressEvent) + 'static) {
        self.progress_handler = Some(Box::new(handler));
    }

    pub fn set_completion_handler(
        &mut self,
        handler: impl FnMut(RunId, CompletionStatus) + 'static,
    ) {
        self.completion_handler = Some(Box::new(handler));
    }

    /// Whether a worker is registered. Turns false only once the worker
    /// has retired, which may be after its terminal event was sent.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.registration.lock().is_some()
    }

    /// Id of the live run, if any has not been settled yet.
    #[must_use]
    pub fn current_run(&self) -> Option<RunId> {
        self.current.as_ref().map(|task| task.run)
    }

    /// Cancel the live run and wait for it to retire.
    ///
    /// Does nothing when idle. Safe to call any number of times.
    pub fn abort(&mut self) {
        let Some(task) = self.current.take() else {
            return;
        };
        log::info!("{}: aborting {}", self.name, task.run);
        task.cancel.cancel();
        self.settle(task);
    }

    /// Deliver pending events without blocking and return the next
    /// settled outcome, if any.
    pub fn poll(&mut self) -> Option<RunOutcome<R>> {
        if let Some(mut task) = self.current.take() {
            let finished = loop {
                match task.events.try_recv() {
                    Ok(event) => {
                        if self.deliver(task.run, &mut task.terminal_seen, &event) {
                            break true;
                        }
                    }
                    Err(TryRecvError::Empty) => break false,
                    Err(TryRecvError::Disconnected) => break true,
                }
            };
            if finished {
                self.settle(task);
            } else {
                self.current = Some(task);
            }
        }
        self.settled.pop_front()
    }

    /// Block until the live run settles, delivering its events, and
    /// return the oldest settled outcome.
    ///
    /// Returns `None` when there is neither a live run nor an unclaimed
    /// outcome.
    pub fn wait(&mut self) -> Option<RunOutcome<R>> {
        if let Some(mut task) = self.current.take() {
            while let Ok(event) = task.events.recv() {
                if self.deliver(task.run, &mut task.terminal_seen, &event) {
                    break;
                }
            }
            self.settle(task);
        }
        self.settled.pop_front()
    }

    /// Like [`Executor::wait`] but gives up after `timeout`, leaving the
    /// run live. A timeout too large to represent waits without limit.
    pub fn wait_timeout(&mut self, timeout: std::time::Duration) -> Option<RunOutcome<R>> {
        let Some(deadline) = std::time::Instant::now().checked_add(timeout) else {
            return self.wait();
        };
        if let Some(mut task) = self.current.take() {
            let finished = loop {
                match task.events.recv_deadline(deadline) {
                    Ok(event) => {
                        if self.deliver(task.run, &mut task.terminal_seen, &event) {
                            break true;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => break false,
                    Err(RecvTimeoutError::Disconnected) => break true,
                }
            };
            if finished {
                self.settle(task);
            } else {
                self.current = Some(task);
            }
        }
        self.settled.pop_front()
    }

    /// Forward one event to the progress handler. Returns whether it
    /// was terminal.
    fn deliver(&mut self, run: RunId, terminal_seen: &mut bool, event: &ProgressEvent) -> bool {
        if let Some(handler) = self.progress_handler.as_mut() {
            handler(run, event);
        }
        if event.is_terminal() {
            *terminal_seen = true;
        }
        *terminal_seen
    }

    fn settle(&mut self, mut task: WorkerTask<R>) {
        let run = task.run;
        drop(self.registration.wait_until(|slot| {
            slot.as_ref().is_none_or(|handle| handle.run != run)
        }));

        let result = task.thread.join().unwrap_or_else(|_| {
            log::error!("{}: worker thread of {run} panicked", self.name);
            Err(AbortReason::Failed("worker thread panicked".to_string()))
        });

        let remaining: Vec<_> = task.events.try_iter().collect();
        for event in &remaining {
            if task.terminal_seen {
                break;
            }
            self.deliver(task.run, &mut task.terminal_seen, event);
        }
        if !task.terminal_seen {
            let reason = match &result {
                Ok(_) => None,
                Err(reason) => Some(reason.clone()),
            };
            let event = reason.map_or(ProgressEvent::Completed, |reason| ProgressEvent::Aborted {
                reason,
            });
            self.deliver(task.run, &mut task.terminal_seen, &event);
        }

        let outcome = RunOutcome { run, result };
        let status = outcome.status();
        log::info!("{}: {run} settled as {status:?}", self.name);
        if let Some(handler) = self.completion_handler.as_mut() {
            handler(run, status);
        }
        self.settled.push_back(outcome);
    }
}

impl<R> Drop for Executor<R> {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn recorded<R>(executor: &mut Executor<R>) -> Rc<RefCell<Vec<(RunId, CompletionStatus)>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        executor.set_completion_handler(move |run, status| sink.borrow_mut().push((run, status)));
        log
    }

    #[test]
    fn completed_run_yields_result_and_one_completion() {
        let mut executor = Executor::new("test");
        let completions = recorded(&mut executor);

        let run = executor.start(|_ctx| Ok(21 * 2)).unwrap();
        let outcome = executor.wait().unwrap();

        assert_eq!(outcome.run, run);
        assert_eq!(outcome.result, Ok(42));
        assert!(!executor.is_running());
        assert_eq!(*completions.borrow(), vec![(run, CompletionStatus::Completed)]);

        assert!(executor.wait().is_none(), "outcome must be claimed once");
        executor.abort();
        assert_eq!(completions.borrow().len(), 1, "no second completion");
    }

    #[test]
    fn abort_when_idle_is_a_no_op() {
        let mut executor: Executor<()> = Executor::new("test");
        let completions = recorded(&mut executor);
        executor.abort();
        executor.abort();
        assert!(!executor.is_running());
        assert!(executor.poll().is_none());
        assert!(completions.borrow().is_empty());
    }

    #[test]
    fn abort_cancels_looping_job() {
        let mut executor: Executor<()> = Executor::new("test");
        let completions = recorded(&mut executor);
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        executor.set_progress_handler(move |_, event| sink.borrow_mut().push(event.clone()));

        let run = executor
            .start(|ctx| loop {
                ctx.checkpoint()?;
                thread::sleep(Duration::from_millis(1));
            })
            .unwrap();
        assert!(executor.is_running());

        executor.abort();
        assert!(!executor.is_running(), "abort returns only after retirement");
        let outcome = executor.poll().unwrap();
        assert_eq!(outcome.result, Err(AbortReason::Cancelled));
        assert_eq!(*completions.borrow(), vec![(run, CompletionStatus::Aborted)]);
        assert_eq!(
            events.borrow().last(),
            Some(&ProgressEvent::Aborted {
                reason: AbortReason::Cancelled
            })
        );
    }

    #[test]
    fn start_waits_for_previous_run_to_retire() {
        let mut executor = Executor::new("test");
        let first_done = Arc::new(AtomicBool::new(false));

        let done = Arc::clone(&first_done);
        executor
            .start(move |_ctx| {
                thread::sleep(Duration::from_millis(50));
                done.store(true, Ordering::SeqCst);
                Ok(1)
            })
            .unwrap();

        let observed = Arc::clone(&first_done);
        executor
            .start(move |_ctx| Ok(if observed.load(Ordering::SeqCst) { 2 } else { 0 }))
            .unwrap();

        let first = executor.wait().unwrap();
        assert_eq!(first.result, Ok(1), "first run is settled, not cancelled");
        let second = executor.wait().unwrap();
        assert_eq!(second.result, Ok(2), "second run started after the first retired");
    }

    #[test]
    fn failing_job_reports_failure() {
        let mut executor: Executor<()> = Executor::new("test");
        executor
            .start(|_ctx| Err(AbortReason::Failed("bad frame".to_string())))
            .unwrap();
        let outcome = executor.wait().unwrap();
        assert_eq!(outcome.status(), CompletionStatus::Aborted);
        assert_eq!(outcome.result, Err(AbortReason::Failed("bad frame".to_string())));
    }

    #[test]
    #[allow(clippy::panic)]
    fn panicking_job_is_aborted_with_synthesized_event() {
        let mut executor: Executor<()> = Executor::new("test");
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        executor.set_progress_handler(move |_, event| sink.borrow_mut().push(event.clone()));

        executor.start(|_ctx| panic!("worker exploded")).unwrap();
        let outcome = executor.wait().unwrap();

        assert_eq!(
            outcome.result,
            Err(AbortReason::Failed("worker thread panicked".to_string()))
        );
        assert!(!executor.is_running());
        let terminals = events.borrow().iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1, "exactly one terminal event per run");
    }

    #[test]
    fn events_arrive_in_emission_order_before_the_terminal_event() {
        let mut executor = Executor::new("test");
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        executor.set_progress_handler(move |_, event| sink.borrow_mut().push(event.clone()));

        executor
            .start(|ctx| {
                for index in 0..4 {
                    ctx.emit(ProgressEvent::StabilizationProgress { index, total: 4 });
                }
                Ok(())
            })
            .unwrap();
        executor.wait().unwrap();

        let events = events.borrow();
        assert_eq!(events.len(), 5);
        for (i, event) in events.iter().take(4).enumerate() {
            assert_eq!(
                *event,
                ProgressEvent::StabilizationProgress { index: i, total: 4 }
            );
        }
        assert_eq!(events[4], ProgressEvent::Completed);
    }

    #[test]
    fn poll_eventually_settles_a_finished_run() {
        let mut executor = Executor::new("test");
        let completions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&completions);
        executor.set_completion_handler(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        executor.start(|_ctx| Ok("done")).unwrap();

        let outcome = loop {
            if let Some(outcome) = executor.poll() {
                break outcome;
            }
            thread::sleep(Duration::from_millis(1));
        };
        assert_eq!(outcome.result, Ok("done"));
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert!(executor.poll().is_none());
    }

    #[test]
    fn wait_timeout_leaves_slow_run_live() {
        let mut executor: Executor<()> = Executor::new("test");
        executor
            .start(|ctx| loop {
                ctx.checkpoint()?;
                thread::sleep(Duration::from_millis(1));
            })
            .unwrap();
        assert!(executor.wait_timeout(Duration::from_millis(20)).is_none());
        assert!(executor.current_run().is_some());
        executor.abort();
        assert_eq!(executor.poll().unwrap().status(), CompletionStatus::Aborted);
    }

    #[test]
    fn wait_timeout_with_unbounded_budget_waits_for_completion() {
        let mut executor: Executor<u8> = Executor::new("test");
        executor.start(|_| Ok(7)).unwrap();
        let outcome = executor.wait_timeout(Duration::MAX).unwrap();
        assert_eq!(outcome.result, Ok(7));
    }
}
