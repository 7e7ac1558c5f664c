//! Error types and transport error mapping

use thiserror::Error;

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building clients or resolving configuration.
///
/// Request outcomes are never reported through this type; `Dispatcher::send`
/// folds failures into [`ErrorKind`] on the returned response instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid URL
    #[error("Invalid URL")]
    InvalidUrl,

    /// Configuration rejected during validation or loading
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error reported by the transport
    #[error("Network error: {message} (code: {code})")]
    Network {
        /// Transport specific error code, `-1` when unknown
        code: i64,
        /// Error message
        message: String,
    },

    /// TLS/Certificate error
    #[error("TLS error: {message}")]
    Tls {
        /// Error message
        message: String,
    },

    /// Timeout error
    #[error("Request timed out")]
    Timeout,

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures where no HTTP response was received.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Network { .. } | Error::Tls { .. } | Error::Timeout | Error::InvalidUrl
        )
    }
}

#[cfg(feature = "backend-reqwest")]
impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Error::Timeout;
        }

        let message = error.to_string();
        if error.is_builder() {
            return Error::Internal(message);
        }

        // reqwest does not expose TLS failures as a kind; the source chain does.
        let mut source = std::error::Error::source(&error);
        while let Some(inner) = source {
            let text = inner.to_string().to_ascii_lowercase();
            if text.contains("certificate") || text.contains("tls") {
                return Error::Tls { message };
            }
            source = inner.source();
        }

        Error::Network { code: -1, message }
    }
}

/// Error attached to a [`NetworkResponse`](crate::NetworkResponse).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// No response was received (DNS, connect, TLS, timeout, unusable URL)
    Transport {
        /// Human readable cause
        message: String,
    },
    /// A response was received with a non-2xx status
    Http,
}

impl ErrorKind {
    pub(crate) fn transport(error: &Error) -> Self {
        ErrorKind::Transport {
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Transport { message } => write!(f, "transport error: {}", message),
            ErrorKind::Http => write!(f, "http error"),
        }
    }
}

/// Failure to obtain extended background execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrantError {
    /// The host declined the request, usually because no background time remains
    #[error("Background execution unavailable: {0}")]
    Unavailable(String),
}
