use crate::error::RunnerError;
use std::fmt;

/// One external command request: an executable resolved against `PATH` plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => f.write_str("stdout"),
            OutputStream::Stderr => f.write_str("stderr"),
        }
    }
}

/// How a process ended, as observed by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatusKind {
    /// Exited on its own with an OS exit code.
    Exited(i32),
    /// Ended without an exit code (killed by a signal we did not send, or unobtainable).
    Terminated,
    /// Terminated because the invocation's cancel signal fired.
    Cancelled,
}

impl ExitStatusKind {
    pub fn is_success(self) -> bool {
        matches!(self, ExitStatusKind::Exited(0))
    }

    pub fn code(self) -> Option<i32> {
        match self {
            ExitStatusKind::Exited(code) => Some(code),
            _ => None,
        }
    }
}

/// Events produced by the process runner for a single invocation.
#[derive(Debug, Clone)]
pub enum ExecEvent {
    Output {
        stream: OutputStream,
        line: String,
    },
    Error(RunnerError),
    Completed {
        status: ExitStatusKind,
        // Set only when waiting on the process failed; a non-zero exit is not a cause.
        cause: Option<RunnerError>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Idle,
    Running,
    Succeeded,
    Failed {
        cause: String,
        exit_code: Option<i32>,
    },
    Canceled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Succeeded | SessionStatus::Failed { .. } | SessionStatus::Canceled
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, SessionStatus::Running)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Succeeded => "succeeded",
            SessionStatus::Failed { .. } => "failed",
            SessionStatus::Canceled => "canceled",
        }
    }

    /// Process exit code a front end should report for this status.
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionStatus::Idle | SessionStatus::Running | SessionStatus::Succeeded => 0,
            SessionStatus::Failed { exit_code, .. } => match exit_code {
                Some(code) if *code != 0 => *code,
                _ => 1,
            },
            SessionStatus::Canceled => 130,
        }
    }
}

/// Events emitted by the workflow controller and consumed by UI/CLI layers.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    WorkflowStarted {
        name: String,
        steps: usize,
    },
    StepStarted {
        // 1-based position within the workflow.
        index: usize,
        total: usize,
        invocation: Invocation,
    },
    Output {
        stream: OutputStream,
        line: String,
    },
    Warning(String),
    StepCompleted {
        // Same position as the matching `StepStarted`.
        index: usize,
        status: ExitStatusKind,
    },
    Progress(f64),
    Finished {
        status: SessionStatus,
        // Snapshot of the session log, oldest line first.
        log: Vec<String>,
    },
    Info(InfoEvent),
}

/// Structured notices from the controller that are not tied to process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoEvent {
    Message(String),
    AlreadyRunning,
    NothingToRun,
    Cancelling,
    StillCancelling,
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::AlreadyRunning => "A workflow is already running".to_string(),
            InfoEvent::NothingToRun => "Nothing to run".to_string(),
            InfoEvent::Cancelling => "Cancelling…".to_string(),
            InfoEvent::StillCancelling => "Still cancelling…".to_string(),
        }
    }
}
