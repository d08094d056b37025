//! Failure classification and the broadcast error feed.

use tokio::sync::broadcast;
use tracing::{debug, error};

use super::error::{ApiError, ApiErrorKind, CallFailure};
use crate::request::CancelToken;
use crate::transport::TransportError;

/// Turns call failures into [`ApiError`]s and republishes them.
#[derive(Debug)]
pub(crate) struct ErrorTranslator {
    feed: broadcast::Sender<ApiError>,
}

impl ErrorTranslator {
    pub(crate) fn new(capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity);
        Self { feed }
    }

    /// Subscribes to errors translated from now on.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ApiError> {
        self.feed.subscribe()
    }

    /// Classifies `failure`, rearms `token`, logs and broadcasts the result.
    ///
    /// A failure counts as cancelled when it came from the cancel signal or the
    /// token was cancelled by the time the call failed.
    pub(crate) fn translate(
        &self,
        failure: CallFailure,
        token: Option<&CancelToken>,
        correlation_id: &str,
    ) -> ApiError {
        let cancelled = failure.is_cancellation() || token.is_some_and(CancelToken::is_cancelled);
        let api_error = classify(failure, cancelled).with_correlation_id(correlation_id);

        if let Some(token) = token {
            token.rearm();
        }

        error!(
            kind = %api_error.kind(),
            status = ?api_error.status(),
            "{}",
            api_error.message()
        );
        if self.feed.send(api_error.clone()).is_err() {
            debug!("no error feed subscribers");
        }
        api_error
    }
}

/// Maps a failure onto the closed error taxonomy.
pub(crate) fn classify(failure: CallFailure, cancelled: bool) -> ApiError {
    if cancelled {
        return ApiError::new(ApiErrorKind::Cancelled, "request cancelled");
    }

    let message = failure.to_string();
    match failure {
        CallFailure::Offline => ApiError::new(ApiErrorKind::Network, message),
        CallFailure::PermissionDenied => ApiError::new(ApiErrorKind::PermissionDenied, message),
        CallFailure::NotInitialized => ApiError::new(ApiErrorKind::Unknown, message),
        CallFailure::StreamEvent { data } => ApiError::new(ApiErrorKind::Unknown, data),
        CallFailure::Validation(error) => {
            ApiError::new(ApiErrorKind::InvalidResponse, message).with_cause(error)
        }
        CallFailure::Mapping(error) => {
            ApiError::new(ApiErrorKind::InvalidResponse, message).with_cause(error)
        }
        CallFailure::Transport(error) => {
            let status = error.status();
            let kind = match &error {
                TransportError::Network { .. } | TransportError::HttpStatus { .. } => {
                    ApiErrorKind::Network
                }
                TransportError::Timeout { .. } => ApiErrorKind::Timeout,
                TransportError::Cancelled => ApiErrorKind::Cancelled,
                TransportError::Decode { .. } => ApiErrorKind::InvalidResponse,
                TransportError::UnexpectedStatus { .. }
                | TransportError::Io { .. }
                | TransportError::InvalidUrl { .. }
                | TransportError::InvalidHeader { .. }
                | TransportError::Stage(_) => ApiErrorKind::Unknown,
            };
            ApiError::new(kind, message)
                .with_status(status)
                .with_cause(error)
        }
    }
}
