//! Workspace-wide error taxonomy.
//!
//! The variants follow the failure kinds the platform actually
//! distinguishes at its boundaries: validation and not-found surface to
//! HTTP callers as 400/404, upstream failures as 5xx, and everything an
//! export worker hits lands in the dead-letter queue as a message string.

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error kind, used by the HTTP layers to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad request shape or parameter.
    Validation,
    /// A referenced entity does not exist.
    NotFound,
    /// Misconfiguration detected at startup or call time.
    Configuration,
    /// An upstream service rejected or failed the call.
    Api,
    /// An upstream call timed out or the connection dropped.
    Timeout,
    /// A storage backend (S3, Postgres, Milvus) failed a write or read.
    Storage,
    /// An internal consistency check failed.
    Integrity,
    /// Anything else.
    Other,
}

/// Errors produced by the Maktaba adapters and services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Upstream error: {0}")]
    Api(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Error::Integrity(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// The coarse kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Api(_) => ErrorKind::Api,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Storage(_) => ErrorKind::Storage,
            Error::Integrity(_) => ErrorKind::Integrity,
            Error::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether retrying the operation could plausibly succeed.
    ///
    /// Only transport-level timeouts and dropped connections qualify;
    /// upstream 4xx/5xx responses are surfaced as [`Error::Api`] and are
    /// not retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Other(format!("JSON error: {err}"))
    }
}
