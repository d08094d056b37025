//! The closed error taxonomy returned by every call.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::validator::ValidationError;
use crate::request::MapError;
use crate::transport::TransportError;

/// Category of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// No connectivity, transport failure or non-success HTTP status.
    Network,
    /// The request or response took too long.
    Timeout,
    /// The caller cancelled the call.
    Cancelled,
    /// The payload did not match the declared shape or could not be mapped.
    InvalidResponse,
    /// Storage permission was denied before writing a file.
    PermissionDenied,
    /// Anything else, including server error events.
    Unknown,
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::InvalidResponse => "invalid response",
            Self::PermissionDenied => "permission denied",
            Self::Unknown => "unknown",
        })
    }
}

/// Classified failure of a call.
///
/// Cheap to clone so the same value can go to the caller and to every
/// subscriber of the error feed.
#[derive(Debug, Clone)]
pub struct ApiError {
    kind: ApiErrorKind,
    message: String,
    status: Option<u16>,
    correlation_id: Option<String>,
    cause: Option<Arc<dyn StdError + Send + Sync>>,
}

impl ApiError {
    /// Creates an error without status, correlation id or cause.
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            correlation_id: None,
            cause: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: Option<u16>) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    #[must_use]
    pub fn kind(&self) -> ApiErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status of the failing response, when there was one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Correlation id of the call, matching its log span.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error", self.kind)?;
        if let Some(status) = self.status {
            write!(f, " (HTTP {status})")?;
        }
        write!(f, ": {}", self.message)
    }
}

impl StdError for ApiError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

/// Everything that can go wrong inside a call, before classification.
#[derive(Debug, Error)]
pub(crate) enum CallFailure {
    #[error("client session not initialized")]
    NotInitialized,

    #[error("no network connection")]
    Offline,

    #[error("storage permission denied")]
    PermissionDenied,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Mapping(#[from] MapError),

    /// The server sent an `error` event on a stream.
    #[error("{data}")]
    StreamEvent { data: String },
}

impl CallFailure {
    pub(crate) fn is_cancellation(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Cancelled))
    }
}
