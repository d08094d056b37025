//! Error types for the transport module.
//!
//! This module defines structured errors for unary requests, downloads and
//! stream sessions, keeping the URL or path that failed alongside the cause.

use std::path::PathBuf;

use thiserror::Error;

use super::files::StageError;

/// Errors that can occur while talking to the server or persisting a response.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// A decode-and-persist request answered with something other than 200.
    #[error("unexpected HTTP {status} for file payload at {url}")]
    UnexpectedStatus {
        /// The URL of the payload request.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The operation was cancelled through its cancel token.
    #[error("request cancelled")]
    Cancelled,

    /// File system error while persisting a response.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The resolved URL is malformed or relative without a base URL.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// A header name or value cannot be sent over HTTP.
    #[error("invalid header {name}")]
    InvalidHeader {
        /// The offending header name.
        name: String,
    },

    /// The response body could not be decoded as expected.
    #[error("undecodable response from {url}: {reason}")]
    Decode {
        /// The URL whose body failed to decode.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// Destination path could not be determined.
    #[error(transparent)]
    Stage(#[from] StageError),
}

impl TransportError {
    /// Creates a network error from a reqwest error, promoting timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::timeout(url);
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an invalid header error.
    pub fn invalid_header(name: impl Into<String>) -> Self {
        Self::InvalidHeader { name: name.into() }
    }

    /// Creates a body decode error.
    pub fn decode(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Returns the HTTP status carried by this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } | Self::UnexpectedStatus { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_timeout_display() {
        let error = TransportError::timeout("https://api.example.com/users");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://api.example.com/users"));
    }

    #[test]
    fn test_transport_error_http_status_display() {
        let error = TransportError::http_status("https://api.example.com/users", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(
            msg.contains("https://api.example.com/users"),
            "Expected URL in: {msg}"
        );
        assert_eq!(error.status(), Some(404));
    }

    #[test]
    fn test_transport_error_io_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = TransportError::io(PathBuf::from("/tmp/report.pdf"), io_error);
        let msg = error.to_string();
        assert!(msg.contains("/tmp/report.pdf"), "Expected path in: {msg}");
        assert_eq!(error.status(), None);
    }

    #[test]
    fn test_transport_error_invalid_url_display() {
        let error = TransportError::invalid_url("users/1");
        let msg = error.to_string();
        assert!(msg.contains("invalid URL"), "Expected 'invalid URL' in: {msg}");
        assert!(msg.contains("users/1"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_transport_error_stage_is_transparent() {
        let error = TransportError::from(StageError::NoFileName);
        assert_eq!(error.to_string(), StageError::NoFileName.to_string());
    }
}
