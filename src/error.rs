//! Error taxonomy shared by the ledger, sync engine and OTP flow.
//!
//! Command handlers still return `Result<Value, String>`; this enum exists so
//! the sync engine can decide between "retry later" and "give up" without
//! string matching on its own errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("remote service error (HTTP {status}): {message}")]
    Remote { status: u16, message: String },

    #[error("credential store: {0}")]
    Credential(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    State(String),
}

/// Coarse classification used to pick a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Timeout,
    Auth,
    Permanent,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Timeout)
    }
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network(_) => ErrorKind::Network,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Auth(_) => ErrorKind::Auth,
            Error::Remote { status, message } => match *status {
                401 | 403 => ErrorKind::Auth,
                408 => ErrorKind::Timeout,
                429 => ErrorKind::Network,
                s if s >= 500 => ErrorKind::Network,
                _ => classify_message(message),
            },
            _ => ErrorKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Error::Timeout(err.to_string());
        }
        if err.is_connect() || err.is_request() {
            return Error::Network(err.to_string());
        }
        if let Some(status) = err.status() {
            return Error::Remote {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        Error::Network(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::State(format!("lock poisoned: {err}"))
    }
}

impl From<keyring::Error> for Error {
    fn from(err: keyring::Error) -> Self {
        Error::Credential(err.to_string())
    }
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}

/// Classify a free-form error message coming back from a remote service.
///
/// Firebase reports auth problems as `auth/...` codes and transport trouble
/// only as text, so matching on the message is the best signal available.
pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("auth/")
        || lower.contains("unauthenticated")
        || lower.contains("permission_denied")
        || lower.contains("permission denied")
    {
        return ErrorKind::Auth;
    }
    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("deadline") {
        return ErrorKind::Timeout;
    }
    if lower.contains("network")
        || lower.contains("unavailable")
        || lower.contains("connection")
        || lower.contains("offline")
    {
        return ErrorKind::Network;
    }
    ErrorKind::Permanent
}
