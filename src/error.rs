use crate::model::OutputStream;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Failures reported by the process runner.
///
/// I/O sources are shared behind `Arc` so events stay cheap to clone and forward.
#[derive(Debug, Clone, Error)]
pub enum RunnerError {
    #[error("start process {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("open {stream} pipe for {program}")]
    StreamOpen {
        program: String,
        stream: OutputStream,
    },

    #[error("read process output ({stream}): {source}")]
    Read {
        stream: OutputStream,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("wait process {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: Arc<io::Error>,
    },
}

impl RunnerError {
    /// Fatal errors end the invocation; no `Completed` event follows them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RunnerError::Launch { .. } | RunnerError::StreamOpen { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("a workflow is already running")]
    AlreadyRunning,
}
