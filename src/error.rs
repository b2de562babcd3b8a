//! Error types shared by the resource store, scenario store and resolver.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the mock API core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("resource not found: {id}")]
    NotFound { id: String },

    #[error("nothing found at path: {path}")]
    PathNotFound { path: String },

    #[error("identifier already in use: {id}")]
    Conflict { id: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("malformed JSON body: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("malformed XML body: {0}")]
    MalformedXml(#[from] roxmltree::Error),

    #[error("storage error: {0}")]
    Storage(anyhow::Error),
}

/// Coarse classification of an [`Error`], used when mapping to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidRequest,
    Storage,
}

impl Error {
    pub fn not_found(id: impl Into<String>) -> Self {
        Error::NotFound { id: id.into() }
    }

    pub fn conflict(id: impl Into<String>) -> Self {
        Error::Conflict { id: id.into() }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Error::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub(crate) fn poisoned() -> Self {
        Error::Storage(anyhow::anyhow!("lock poisoned"))
    }

    /// The kind tag of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } | Error::PathNotFound { .. } => ErrorKind::NotFound,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::InvalidRequest { .. } | Error::MalformedJson(_) | Error::MalformedXml(_) => {
                ErrorKind::InvalidRequest
            }
            Error::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl ErrorKind {
    /// Machine-readable code used in error bodies.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
