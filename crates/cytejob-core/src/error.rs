use std::fmt;

use thiserror::Error;

/// Failure classes a job lifecycle call can end in.
///
/// A kind is attached where the failure is first detected and is never
/// reclassified further up the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// HTTP 401/403. Never retried.
    Auth,
    /// Connectivity failure below HTTP (DNS, refused connection, timeout, TLS).
    Network,
    /// Protocol or application failure: unexpected status, malformed body,
    /// job reported as failed.
    Api,
    /// The overall polling budget was exceeded.
    Timeout,
    /// The job or its results are not visible (yet).
    NotFound,
    /// The caller cancelled polling.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Network => "network",
            ErrorKind::Api => "api",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified failure. Outer layers propagate it as-is with `?`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Api, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Classify a transport-level failure from its message alone.
    pub fn from_transport_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(classify_failure_message(&message), message)
    }

    /// Returns true if the polling loop should retry after this error.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Network
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::api(format!("JSON error: {err}"))
    }
}

const NETWORK_VOCABULARY: &[&str] = &["network", "connection", "resolve", "timeout"];

/// Map a transport failure message to an [`ErrorKind`].
///
/// Messages mentioning connectivity (`network`, `connection`, `resolve`,
/// `timeout`, case-insensitive) are [`ErrorKind::Network`]; everything else
/// is [`ErrorKind::Api`]. Transports with structured error codes should
/// check those first and only fall back to this.
pub fn classify_failure_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if NETWORK_VOCABULARY.iter().any(|word| lower.contains(word)) {
        ErrorKind::Network
    } else {
        ErrorKind::Api
    }
}
