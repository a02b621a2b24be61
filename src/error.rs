//! Error taxonomy for the download engine.
//!
//! Only [`ConfigError`] escapes a batch. Everything else is caught at the task
//! boundary and folded into the [`crate::model::BatchResult`].

use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Configuration-level failures. These abort a batch before any task runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("save directory must not be empty")]
    EmptySaveDirectory,
    #[error("no inputs were provided")]
    EmptyInput,
    #[error("offset map must contain exactly one reference, found {0}")]
    OffsetMapSize(usize),
    #[error("playlist start must be at least 1 (got {0})")]
    InvalidStart(usize),
    #[error("save directory {path} is not writable")]
    RootNotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not load completion ledger {path}")]
    Ledger {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Raised by the resolver when an input cannot be expanded into tasks.
#[derive(Debug, Clone, Error)]
#[error("could not resolve {reference}: {reason}")]
pub struct ResolutionError {
    pub reference: String,
    pub reason: String,
}

/// Broad classification of a failed remote fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchFailureKind {
    Network,
    Unavailable,
    ResolutionUnavailable,
    RegionLocked,
    AgeRestricted,
    LoginRequired,
    RateLimited,
    Other,
}

impl FetchFailureKind {
    /// Failures worth another attempt within the same batch.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FetchFailureKind::Network | FetchFailureKind::RateLimited | FetchFailureKind::Other
        )
    }
}

/// A remote capability call that did not succeed.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct FetchError {
    pub kind: FetchFailureKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Why a single task ended up in the failure column.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "stage", rename_all = "kebab-case")]
pub enum TaskFailure {
    #[error("input resolution failed: {reason}")]
    InputResolution { reason: String },
    #[error("media fetch failed ({kind:?}): {message}")]
    MediaFetch {
        kind: FetchFailureKind,
        message: String,
    },
    #[error("filesystem error during {operation} on {path}: {message}")]
    Filesystem {
        operation: &'static str,
        path: PathBuf,
        message: String,
    },
}

impl TaskFailure {
    pub(crate) fn filesystem(operation: &'static str, path: impl Into<PathBuf>, err: &io::Error) -> Self {
        TaskFailure::Filesystem {
            operation,
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl From<FetchError> for TaskFailure {
    fn from(err: FetchError) -> Self {
        TaskFailure::MediaFetch {
            kind: err.kind,
            message: err.message,
        }
    }
}

impl From<ResolutionError> for TaskFailure {
    fn from(err: ResolutionError) -> Self {
        TaskFailure::InputResolution { reason: err.reason }
    }
}
