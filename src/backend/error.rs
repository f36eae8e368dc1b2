// ABOUTME: Deployment backend error types with SNAFU pattern.
// ABOUTME: Classifies command, parse and probe failures for programmatic handling.

use crate::http::HttpError;
use snafu::Snafu;
use std::time::Duration;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BackendError {
    #[snafu(display("failed to run {program}: {source}"))]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[snafu(display("{program} {args} exited with {code:?}: {stderr}"))]
    CommandFailed {
        program: String,
        args: String,
        code: Option<i32>,
        stderr: String,
    },

    #[snafu(display("{program} timed out after {timeout:?}"))]
    Timeout { program: String, timeout: Duration },

    #[snafu(display("unexpected output from {program}: {source}"))]
    Parse {
        program: String,
        source: serde_json::Error,
    },

    #[snafu(display("access probe failed: {source}"))]
    Probe { source: HttpError },

    #[snafu(display("{message}"))]
    Unavailable { message: String },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The backend tool could not be started.
    Spawn,
    /// The backend tool ran and reported failure.
    CommandFailed,
    /// The backend tool did not finish in time.
    Timeout,
    /// The backend tool's output could not be understood.
    Parse,
    /// The access probe could not be attempted.
    Probe,
    /// The backend refused the operation.
    Unavailable,
}

impl BackendError {
    pub fn kind(&self) -> BackendErrorKind {
        match self {
            BackendError::Spawn { .. } => BackendErrorKind::Spawn,
            BackendError::CommandFailed { .. } => BackendErrorKind::CommandFailed,
            BackendError::Timeout { .. } => BackendErrorKind::Timeout,
            BackendError::Parse { .. } => BackendErrorKind::Parse,
            BackendError::Probe { .. } => BackendErrorKind::Probe,
            BackendError::Unavailable { .. } => BackendErrorKind::Unavailable,
        }
    }

    /// Stderr of a failed command, if this is one.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            BackendError::CommandFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        BackendError::Unavailable {
            message: message.into(),
        }
    }
}
