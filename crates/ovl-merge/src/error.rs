//! The merge engine's single error type.

use std::fmt;

use ovl_repo::{BoxError, RepoError};
use thiserror::Error;

/// What went wrong, at the granularity callers act on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A store transaction could not be started or committed.
    Transaction,
    /// Directory contents could not be ingested.
    TreeWrite,
    /// A tree or commit object could not be written.
    CommitWrite,
    /// A branch or commit id did not resolve.
    RefResolution,
    /// Materializing a commit into the scratch directory failed.
    Checkout,
    /// Anything else.
    Merge,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transaction => "transaction",
            Self::TreeWrite => "tree write",
            Self::CommitWrite => "commit write",
            Self::RefResolution => "ref resolution",
            Self::Checkout => "checkout",
            Self::Merge => "merge",
        };
        f.write_str(name)
    }
}

impl From<&RepoError> for ErrorKind {
    fn from(err: &RepoError) -> Self {
        match err {
            RepoError::Transaction { .. } => Self::Transaction,
            RepoError::TreeWrite { .. } => Self::TreeWrite,
            RepoError::MtreeFinalize { .. } | RepoError::CommitWrite { .. } => Self::CommitWrite,
            RepoError::RefResolution { .. } => Self::RefResolution,
            RepoError::Checkout { .. } => Self::Checkout,
            _ => Self::Merge,
        }
    }
}

/// A failed merge: a short message, an optional longer detail, and the
/// underlying cause.
#[derive(Debug, Error)]
#[error("{message}{}", .detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
pub struct MergeError {
    kind: ErrorKind,
    message: String,
    detail: Option<String>,
    #[source]
    source: Option<BoxError>,
}

impl MergeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
            source: None,
        }
    }

    /// Wrap a store error under a step-specific message. The error's own
    /// text becomes the detail.
    pub fn from_repo(message: impl Into<String>, err: RepoError) -> Self {
        Self {
            kind: ErrorKind::from(&err),
            message: message.into(),
            detail: Some(err.to_string()),
            source: Some(Box::new(err)),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl From<RepoError> for MergeError {
    fn from(err: RepoError) -> Self {
        Self {
            kind: ErrorKind::from(&err),
            message: err.to_string(),
            detail: None,
            source: Some(Box::new(err)),
        }
    }
}

impl From<std::io::Error> for MergeError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Merge, err.to_string()).with_source(err)
    }
}

/// Result alias for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;
