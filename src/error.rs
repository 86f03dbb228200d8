//! Core error types shared by every subsystem.
//!
//! A `CoreError`/`CoreResult` pair with `thiserror`-derived variants and
//! `From` conversions for lower-level errors, covering not-found, conflict,
//! validation, transient, timeout, cancellation, and fatal cases rather than
//! workflow-engine-specific ones.

use thiserror::Error;

/// Result type used by every public operation in this crate.
pub type CoreResult<T> = Result<T, CoreError>;

/// The closed set of error kinds the specification requires: each admin
/// operation, subsystem loop, and handler conversion maps into one of these.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Referenced entity absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique/state precondition violated (e.g. starting a terminal execution).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed input; never retried, surfaced to caller.
    #[error("validation error: {0}")]
    Validation(String),

    /// I/O, store, or external-service error; retried with backoff where applicable.
    #[error("transient error: {0}")]
    Transient(String),

    /// Operation exceeded its bound. Treated as `Transient` unless a hard cap is reached.
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Cooperative cancellation observed. Terminal, not reported as failure.
    #[error("cancelled")]
    Cancelled,

    /// Data corruption, schema mismatch, or invariant violation. Escalates to
    /// process shutdown in dispatcher loops.
    #[error("fatal error: {0}")]
    Fatal(String),
}

/// Stable machine-readable discriminant, exposed to the admin surface so
/// error payloads carry a stable `kind` alongside the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Transient,
    Timeout,
    Cancelled,
    Fatal,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::Transient(_) => ErrorKind::Transient,
            CoreError::Timeout(_) => ErrorKind::Timeout,
            CoreError::Cancelled => ErrorKind::Cancelled,
            CoreError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether a dispatcher loop should retry the operation that produced
    /// this error rather than surface it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_) | CoreError::Timeout(_))
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Validation(format!("json error: {err}"))
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CoreError::Timeout(std::time::Duration::from_secs(0))
        } else {
            CoreError::Transient(err.to_string())
        }
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Validation(err.to_string())
    }
}
