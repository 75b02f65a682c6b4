//! Workflow session state machine.
//!
//! `Idle → Running → {Succeeded, Failed, Canceled}`. The session owns the pending queue and
//! is mutated only by its controller; it never performs I/O. Dispatching the invocation
//! returned by [`WorkflowSession::start_next`] is the caller's job.

use crate::error::SessionError;
use crate::model::{ExecEvent, ExitStatusKind, Invocation, SessionStatus};
use std::collections::VecDeque;

/// Log lines kept per session; older lines are evicted first.
pub const MAX_LOG_LINES: usize = 300;
/// Progress bump per output line while the real duration is unknown.
pub const OUTPUT_PROGRESS_STEP: f64 = 0.02;
/// Highest progress reachable before the workflow reaches a terminal status.
pub const PROGRESS_CAP: f64 = 0.95;

/// Fixed-capacity FIFO of log lines.
#[derive(Debug, Clone)]
pub struct BoundedLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl BoundedLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        self.lines.push_back(line.into());
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &String> + ExactSizeIterator {
        self.lines.iter()
    }

    /// Replace the contents with `lines`, keeping only the newest `capacity` of them.
    pub fn replace_with<I>(&mut self, lines: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.lines.clear();
        for line in lines {
            self.push(line);
        }
    }
}

impl Default for BoundedLog {
    fn default() -> Self {
        Self::new(MAX_LOG_LINES)
    }
}

/// What the controller should do after feeding an event to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Keep reading the current invocation's events.
    Continue,
    /// The current invocation succeeded and more are queued; call `start_next`.
    Advance,
    /// The workflow reached a terminal status.
    Finished(SessionStatus),
    /// Nothing is in flight; the event was dropped.
    Ignored,
}

#[derive(Debug)]
pub struct WorkflowSession {
    status: SessionStatus,
    queue: VecDeque<Invocation>,
    in_flight: Option<Invocation>,
    total: usize,
    dispatched: usize,
    completed: usize,
    progress: f64,
    log: BoundedLog,
    cancel_requested: bool,
    last_read_error: Option<String>,
}

impl WorkflowSession {
    pub fn new() -> Self {
        Self::with_log_capacity(MAX_LOG_LINES)
    }

    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            status: SessionStatus::Idle,
            queue: VecDeque::new(),
            in_flight: None,
            total: 0,
            dispatched: 0,
            completed: 0,
            progress: 0.0,
            log: BoundedLog::new(capacity),
            cancel_requested: false,
            last_read_error: None,
        }
    }

    /// Return to `Idle`, dropping any queue, counters and log from the previous workflow.
    pub fn reset(&mut self) {
        let capacity = self.log.capacity();
        *self = Self::with_log_capacity(capacity);
    }

    /// Append invocations to the queue. Starting from a terminal status begins a fresh
    /// workflow; queues are never merged across workflows.
    pub fn enqueue<I>(&mut self, invocations: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = Invocation>,
    {
        if self.status.is_running() {
            return Err(SessionError::AlreadyRunning);
        }
        if self.status.is_terminal() {
            self.reset();
        }
        let before = self.queue.len();
        self.queue.extend(invocations);
        self.total += self.queue.len() - before;
        Ok(())
    }

    /// Pop the next invocation for dispatch.
    ///
    /// Returns `None` without changing state when the queue is empty, when something is
    /// already in flight, or when the workflow has already ended.
    pub fn start_next(&mut self) -> Option<Invocation> {
        if self.status.is_terminal() || self.in_flight.is_some() {
            return None;
        }
        let next = self.queue.pop_front()?;
        self.status = SessionStatus::Running;
        self.dispatched += 1;
        self.log.push(format!("$ {next}"));
        tracing::debug!(
            step = self.dispatched,
            total = self.total,
            pending = self.queue.len(),
            invocation = %next,
            "dispatching"
        );
        self.in_flight = Some(next.clone());
        Some(next)
    }

    pub fn on_event(&mut self, event: ExecEvent) -> Step {
        if self.in_flight.is_none() {
            return Step::Ignored;
        }
        match event {
            ExecEvent::Output { line, .. } => {
                self.log.push(line);
                self.bump_progress(self.progress + OUTPUT_PROGRESS_STEP);
                Step::Continue
            }
            ExecEvent::Error(err) if err.is_fatal() => {
                self.in_flight = None;
                if self.cancel_requested {
                    return self.finish(SessionStatus::Canceled);
                }
                self.finish(SessionStatus::Failed {
                    cause: err.to_string(),
                    exit_code: None,
                })
            }
            ExecEvent::Error(err) => {
                let msg = err.to_string();
                self.log.push(format!("warning: {msg}"));
                self.last_read_error = Some(msg);
                Step::Continue
            }
            ExecEvent::Completed { status, cause } => {
                self.in_flight = None;
                if self.cancel_requested || status == ExitStatusKind::Cancelled {
                    return self.finish(SessionStatus::Canceled);
                }
                if let Some(cause) = cause {
                    return self.finish(SessionStatus::Failed {
                        cause: cause.to_string(),
                        exit_code: status.code(),
                    });
                }
                if !status.is_success() {
                    let mut cause = failure_summary(status);
                    if let Some(read_err) = self.last_read_error.take() {
                        cause = format!("{cause} after {read_err}");
                    }
                    return self.finish(SessionStatus::Failed {
                        cause,
                        exit_code: status.code(),
                    });
                }

                self.completed += 1;
                self.last_read_error = None;
                self.log.push("process completed successfully");
                if self.queue.is_empty() {
                    return self.finish(SessionStatus::Succeeded);
                }
                let done = self.completed as f64 / self.total.max(1) as f64;
                self.bump_progress(done);
                Step::Advance
            }
        }
    }

    /// The runner closed the stream. Normally a terminal event came first; if one did not,
    /// the invocation is failed so nothing waits forever.
    pub fn on_stream_closed(&mut self) -> Option<Step> {
        self.in_flight.take()?;
        if self.cancel_requested {
            return Some(self.finish(SessionStatus::Canceled));
        }
        Some(self.finish(SessionStatus::Failed {
            cause: "process output stream closed before completion".into(),
            exit_code: None,
        }))
    }

    /// Request cancellation. Returns `false` (and changes nothing) unless running.
    ///
    /// With an invocation in flight the session ends `Canceled` once its terminal event
    /// arrives; between steps it ends immediately.
    pub fn cancel(&mut self) -> bool {
        if !self.status.is_running() {
            return false;
        }
        self.cancel_requested = true;
        self.queue.clear();
        if self.in_flight.is_none() {
            self.finish(SessionStatus::Canceled);
        }
        true
    }

    /// Record a workflow-level note in the log.
    pub fn note(&mut self, line: impl Into<String>) {
        self.log.push(line);
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn log(&self) -> &BoundedLog {
        &self.log
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    fn bump_progress(&mut self, target: f64) {
        self.progress = self.progress.max(target.min(PROGRESS_CAP));
    }

    fn finish(&mut self, status: SessionStatus) -> Step {
        self.queue.clear();
        self.progress = 1.0;
        match &status {
            SessionStatus::Failed { cause, .. } => {
                tracing::warn!(dispatched = self.dispatched, %cause, "workflow failed")
            }
            other => tracing::info!(
                dispatched = self.dispatched,
                status = other.label(),
                "workflow finished"
            ),
        }
        self.status = status.clone();
        Step::Finished(status)
    }
}

impl Default for WorkflowSession {
    fn default() -> Self {
        Self::new()
    }
}

fn failure_summary(status: ExitStatusKind) -> String {
    match status {
        ExitStatusKind::Exited(code) => format!("process failed (exit code {code})"),
        ExitStatusKind::Terminated => "process terminated without an exit code".to_string(),
        ExitStatusKind::Cancelled => "process cancelled".to_string(),
    }
}
