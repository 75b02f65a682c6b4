//! External process execution.
//!
//! [`ProcessRunner::run`] launches one command on a background task and returns an
//! [`ExecutionHandle`] that yields [`ExecEvent`]s until the process is done. The event
//! channel closing is the end-of-stream signal; it closes exactly once on every path.

mod lines;

use crate::error::RunnerError;
use crate::model::{ExecEvent, ExitStatusKind, Invocation, OutputStream};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

/// How long readers may keep draining after the process was told to terminate.
/// Grandchildren can hold the pipes open; past this the readers are dropped.
const READER_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// What to do when reading a process output stream fails mid-run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadErrorPolicy {
    /// Report the error and let the process keep running.
    #[default]
    Continue,
    /// Report the error and terminate the process.
    Abort,
}

#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    pub working_dir: Option<PathBuf>,
    pub read_error_policy: ReadErrorPolicy,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    cfg: RunnerConfig,
}

impl ProcessRunner {
    pub fn new(cfg: RunnerConfig) -> Self {
        Self { cfg }
    }

    /// Spawn `invocation` in the background and return its event stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run(&self, signal: &CancellationToken, invocation: Invocation) -> ExecutionHandle {
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ExecEvent>();
        let task = ExecTask {
            invocation,
            cfg: self.cfg.clone(),
            signal: signal.clone(),
            event_tx,
        };
        tokio::spawn(task.run());
        ExecutionHandle {
            event_rx,
            signal: signal.clone(),
        }
    }
}

/// Live event stream of one running invocation plus its cancel signal.
pub struct ExecutionHandle {
    event_rx: mpsc::UnboundedReceiver<ExecEvent>,
    signal: CancellationToken,
}

impl ExecutionHandle {
    /// Next event, or `None` once the runner has closed the stream.
    pub async fn next_event(&mut self) -> Option<ExecEvent> {
        self.event_rx.recv().await
    }

    pub fn cancel(&self) {
        self.signal.cancel();
    }
}

struct ExecTask {
    invocation: Invocation,
    cfg: RunnerConfig,
    signal: CancellationToken,
    event_tx: mpsc::UnboundedSender<ExecEvent>,
}

impl ExecTask {
    async fn run(self) {
        let ExecTask {
            invocation,
            cfg,
            signal,
            event_tx,
        } = self;
        let program = invocation.program().to_string();

        if signal.is_cancelled() {
            tracing::debug!(%program, "cancelled before launch");
            let _ = event_tx.send(ExecEvent::Completed {
                status: ExitStatusKind::Cancelled,
                cause: None,
            });
            return;
        }

        let mut cmd = Command::new(invocation.program());
        cmd.args(invocation.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cfg.working_dir.as_deref() {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(%program, error = %e, "failed to start process");
                let _ = event_tx.send(ExecEvent::Error(RunnerError::Launch {
                    program,
                    source: Arc::new(e),
                }));
                return;
            }
        };
        tracing::info!(%program, pid = ?child.id(), "process started");

        let Some(stdout) = child.stdout.take() else {
            return fail_stream_open(child, program, OutputStream::Stdout, &event_tx).await;
        };
        let Some(stderr) = child.stderr.take() else {
            return fail_stream_open(child, program, OutputStream::Stderr, &event_tx).await;
        };

        // Readers share the channel; each stream stays ordered, interleaving between them does not.
        let read_failed = Arc::new(Notify::new());
        let policy = cfg.read_error_policy;
        let out_task = tokio::spawn(lines::forward_lines(
            stdout,
            OutputStream::Stdout,
            event_tx.clone(),
            policy,
            read_failed.clone(),
        ));
        let err_task = tokio::spawn(lines::forward_lines(
            stderr,
            OutputStream::Stderr,
            event_tx.clone(),
            policy,
            read_failed.clone(),
        ));
        let reader_aborts = [out_task.abort_handle(), err_task.abort_handle()];
        let readers = futures::future::join(out_task, err_task);
        tokio::pin!(readers);

        // Both readers must finish before waiting so no buffered output is lost.
        let mut cancelled = false;
        let mut kill_sent = false;
        let drained = loop {
            tokio::select! {
                _ = &mut readers => break true,
                _ = signal.cancelled(), if !cancelled => {
                    cancelled = true;
                    terminate(&mut child, &program, "cancel requested");
                    kill_sent = true;
                }
                _ = read_failed.notified(), if !kill_sent => {
                    terminate(&mut child, &program, "output read failed");
                    kill_sent = true;
                }
                _ = tokio::time::sleep(READER_DRAIN_GRACE), if kill_sent => break false,
            }
        };
        if !drained {
            tracing::warn!(%program, "output readers still blocked after terminate, dropping them");
            for handle in &reader_aborts {
                handle.abort();
            }
        }

        let waited = if cancelled {
            child.wait().await
        } else {
            let outcome = tokio::select! {
                res = child.wait() => Some(res),
                _ = signal.cancelled() => None,
            };
            match outcome {
                Some(res) => res,
                None => {
                    cancelled = true;
                    terminate(&mut child, &program, "cancel requested");
                    child.wait().await
                }
            }
        };

        let event = match waited {
            Ok(status) => {
                let status = if cancelled {
                    ExitStatusKind::Cancelled
                } else {
                    classify(status)
                };
                tracing::info!(%program, ?status, "process exited");
                ExecEvent::Completed {
                    status,
                    cause: None,
                }
            }
            Err(e) => {
                tracing::warn!(%program, error = %e, "waiting on process failed");
                ExecEvent::Completed {
                    status: if cancelled {
                        ExitStatusKind::Cancelled
                    } else {
                        ExitStatusKind::Terminated
                    },
                    cause: Some(RunnerError::Wait {
                        program,
                        source: Arc::new(e),
                    }),
                }
            }
        };
        let _ = event_tx.send(event);
    }
}

fn classify(status: ExitStatus) -> ExitStatusKind {
    match status.code() {
        Some(code) => ExitStatusKind::Exited(code),
        None => ExitStatusKind::Terminated,
    }
}

fn terminate(child: &mut Child, program: &str, reason: &str) {
    tracing::info!(%program, reason, "terminating process");
    if let Err(e) = child.start_kill() {
        // Already exited; the wait below still collects its status.
        tracing::debug!(%program, error = %e, "kill failed");
    }
}

async fn fail_stream_open(
    mut child: Child,
    program: String,
    stream: OutputStream,
    event_tx: &mpsc::UnboundedSender<ExecEvent>,
) {
    tracing::warn!(%program, %stream, "output pipe unavailable");
    let _ = child.start_kill();
    let _ = child.wait().await;
    let _ = event_tx.send(ExecEvent::Error(RunnerError::StreamOpen { program, stream }));
}
