//! Error taxonomy shared by every component of the skills manager.
//!
//! A single tagged error type carries a [`ErrorKind`] plus a human-readable
//! message. Per-source and per-entry errors are aggregated into sync reports;
//! persistence and query errors propagate to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of every failure the manager can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network or transport failure, or an unparseable source document.
    SourceUnavailable,
    /// Remote API refused the request because of rate limiting.
    RateLimited,
    /// Remote resource does not exist. Not retryable.
    NotFound,
    /// Credential rejected, or rotated while the request was in flight.
    Authentication,
    /// A single record inside a source failed to parse.
    MalformedEntry,
    /// A record has no derivable canonical URL.
    InvalidIdentifier,
    /// Disk write or rename failed.
    PersistenceFailure,
    /// Empty query, unknown field, or out-of-range threshold.
    QueryError,
    /// Work was not started because the pass was cancelled.
    Cancelled,
    /// A per-source fetch exceeded its deadline.
    Timeout,
    /// Invalid settings or unknown appstore name.
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceUnavailable => "source_unavailable",
            Self::RateLimited => "rate_limited",
            Self::NotFound => "not_found",
            Self::Authentication => "authentication",
            Self::MalformedEntry => "malformed_entry",
            Self::InvalidIdentifier => "invalid_identifier",
            Self::PersistenceFailure => "persistence_failure",
            Self::QueryError => "query_error",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Config => "config",
        }
    }

    /// Whether an operation failing with this kind may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SourceUnavailable | Self::RateLimited)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged error: a kind plus context.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SourceUnavailable, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn malformed_entry(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedEntry, message)
    }

    pub fn invalid_identifier(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidIdentifier, message)
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PersistenceFailure, message)
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QueryError, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}
