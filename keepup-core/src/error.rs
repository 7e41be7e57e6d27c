use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::command::CommandResult;
use crate::process::ExitStatus;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No command")]
    NoCommand,

    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("No process")]
    NoProcess,

    #[error("Command {command} timed out after {timeout:?}")]
    TimedOut {
        command: String,
        timeout: Duration,
        result: Box<CommandResult>,
    },

    #[error("Command {command} failed with {status}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        result: Box<CommandResult>,
    },

    #[error("Process {0} not found")]
    ProcessNotFound(u32),

    #[error("Process spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Process enumeration failed: {0}")]
    Enumerate(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Signal handling error: {0}")]
    Signal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(unix)]
    #[error("Unix error: {0}")]
    Unix(#[from] nix::errno::Errno),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Output captured before a command failed or was stopped.
    pub fn command_result(&self) -> Option<&CommandResult> {
        match self {
            Error::TimedOut { result, .. } | Error::CommandFailed { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Error::TimedOut { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Find,
    Prompt,
    Digest,
    Download,
    Signature,
    Apply,
    Restart,
    Config,
    Unpack,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Find => "find",
            ErrorKind::Prompt => "prompt",
            ErrorKind::Digest => "digest",
            ErrorKind::Download => "download",
            ErrorKind::Signature => "signature",
            ErrorKind::Apply => "apply",
            ErrorKind::Restart => "restart",
            ErrorKind::Config => "config",
            ErrorKind::Unpack => "unpack",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one update run, tagged with the step that failed.
///
/// `cancel` marks runs the user deliberately stopped (snooze, cancel). Those
/// are returned to the caller but never reported as failures.
#[derive(Error, Debug)]
#[error("Update Error ({kind}): {source:#}")]
pub struct UpdateError {
    kind: ErrorKind,
    cancel: bool,
    source: anyhow::Error,
}

impl UpdateError {
    pub fn new(kind: ErrorKind, source: impl Into<anyhow::Error>) -> Self {
        Self {
            kind,
            cancel: false,
            source: source.into(),
        }
    }

    pub fn cancel(kind: ErrorKind, source: impl Into<anyhow::Error>) -> Self {
        Self {
            kind,
            cancel: true,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_cancel(&self) -> bool {
        self.cancel
    }

    /// The underlying failure without the kind prefix.
    pub fn message(&self) -> String {
        format!("{:#}", self.source)
    }

    /// Classifies an arbitrary error, keeping the kind of an `UpdateError` found
    /// at its root.
    pub fn classify(err: &anyhow::Error) -> ErrorKind {
        err.downcast_ref::<UpdateError>()
            .map(UpdateError::kind)
            .unwrap_or(ErrorKind::Unknown)
    }
}
