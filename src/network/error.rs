//! Error types for the sender engine.
//!
//! Transport failures are split by kind so the retry policy can decide which
//! ones are worth another attempt:
//! - I/O failures (connection closed or reset before a full response)
//! - connection setup failures (refused, unknown host, TLS)
//! - protocol failures (malformed response, invalid request)

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single exchange with the remote side.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection failed while writing the request or reading the response.
    #[error("I/O error: {0}")]
    Io(String),

    /// The host could not be resolved.
    #[error("Unknown host '{host}'")]
    UnknownHost {
        /// The host that failed to resolve.
        host: String,
        /// Whether the host is the configured outgoing proxy rather than the target.
        from_outgoing_proxy: bool,
    },

    /// The connection could not be established.
    #[error("Failed to connect to '{target}': {message}")]
    Connect {
        /// The target (or proxy) we tried to connect to.
        target: String,
        /// Error message.
        message: String,
    },

    /// No response within the configured timeout.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// TLS handshake or client identity failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The response could not be parsed.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The request could not be turned into a valid exchange.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The response body could not be written to the requested file.
    #[error("Failed to write response body to '{}': {source}", path.display())]
    Download {
        /// Destination file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    /// Whether the exchange should be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Io(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Failure of a logical send (one call, possibly many hops).
#[derive(Debug, Error)]
pub enum SendError {
    /// The last attempt of the failing hop ended with a transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A redirect response carried a `Location` that is not a valid URI.
    #[error("Invalid redirect location '{location}': {source}")]
    InvalidRedirectLocation {
        /// Raw header value.
        location: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },

    /// A listener was added or removed while a notification round was running.
    #[error("Listener collection modified during notification")]
    ConcurrentModification,
}

/// Result type for send operations.
pub type SendResult<T> = Result<T, SendError>;

/// Invalid proxy or exclusion configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProxyConfigError {
    #[error("Proxy host must not be empty")]
    EmptyHost,

    #[error("Invalid proxy port {0}, expected 1-65535")]
    InvalidPort(u32),

    #[error("Invalid host pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}
