//! Retry logic for transient failures of unary calls.
//!
//! This module provides the [`RetryPolicy`] and [`FailureType`] types for
//! classifying transport errors and determining retry behavior.
//!
//! # Overview
//!
//! When a unary call fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - Temporary failures that may succeed on retry
//! - [`FailureType::Permanent`] - Failures that won't succeed regardless of retries
//! - [`FailureType::NeedsAuth`] - Authentication required (credentials must change first)
//! - [`FailureType::RateLimited`] - Server rate limiting (retries, honoring Retry-After)
//! - [`FailureType::Cancelled`] - The caller gave up; never retried
//!
//! The [`RetryPolicy`] then determines whether to retry based on failure type
//! and attempt count. Delays come from an ordered list; attempts beyond the
//! list reuse its last entry.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use courier_core::transport::{FailureType, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::new(Some(2), vec![Duration::from_secs(1), Duration::from_secs(2)]);
//!
//! match policy.should_retry(FailureType::Transient, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(delay, Duration::from_secs(1));
//!         assert_eq!(attempt, 2);
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("unexpected: {reason}"),
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::TransportError;
use super::constants::{DEFAULT_RETRY_DELAYS, MAX_RETRY_AFTER};

/// Classification of transport failure types.
///
/// Used to determine whether a failed call should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, 5xx server errors, connection refused.
    Transient,

    /// Permanent failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, 400 Bad Request, invalid URL.
    Permanent,

    /// Authentication or authorization required.
    NeedsAuth,

    /// Server rate limiting (HTTP 429).
    RateLimited,

    /// The call was cancelled by its caller.
    Cancelled,
}

/// Decision on whether to retry a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the call after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry the call.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Retry configuration for unary calls.
///
/// # Default Values
///
/// - `max_retries`: `None` (retries disabled)
/// - `delays`: 1s, 2s, 3s
///
/// # Delay Selection
///
/// ```text
/// delay(retry n) = delays[min(n, delays.len()) - 1]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt; `None` disables retries.
    max_retries: Option<u32>,

    /// Ordered delays between attempts.
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: None,
            delays: DEFAULT_RETRY_DELAYS.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy.
    ///
    /// An empty `delays` list falls back to the default ascending sequence.
    #[must_use]
    pub fn new(max_retries: Option<u32>, delays: Vec<Duration>) -> Self {
        let delays = if delays.is_empty() {
            DEFAULT_RETRY_DELAYS.to_vec()
        } else {
            delays
        };
        Self {
            max_retries,
            delays,
        }
    }

    /// Creates a policy retrying up to `max_retries` times with default delays.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries: Some(max_retries),
            ..Self::default()
        }
    }

    /// Returns the maximum number of retries, if enabled.
    #[must_use]
    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// Returns the configured delays.
    #[must_use]
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Determines whether to retry a failed call.
    ///
    /// # Arguments
    ///
    /// * `failure_type` - Classification of the failure
    /// * `attempt` - The attempt number that just failed (1-indexed)
    #[instrument(level = "debug", skip(self), fields(max_retries = ?self.max_retries))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::NeedsAuth => {
                return RetryDecision::DoNotRetry {
                    reason: "authentication required - retry with same credentials would not help"
                        .to_string(),
                };
            }
            FailureType::Cancelled => {
                return RetryDecision::DoNotRetry {
                    reason: "call cancelled".to_string(),
                };
            }
            FailureType::Transient | FailureType::RateLimited => {}
        }

        let Some(max_retries) = self.max_retries.filter(|max| *max > 0) else {
            return RetryDecision::DoNotRetry {
                reason: "retries disabled".to_string(),
            };
        };

        if attempt > max_retries {
            debug!(attempt, max_retries, "max retries reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max retries ({max_retries}) exhausted"),
            };
        }

        RetryDecision::Retry {
            delay: self.delay_for(attempt),
            attempt: attempt + 1,
        }
    }

    /// Returns the delay before retry number `retry` (1-indexed), clamped to the list.
    fn delay_for(&self, retry: u32) -> Duration {
        let index = usize::try_from(retry.saturating_sub(1)).unwrap_or(usize::MAX);
        self.delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(DEFAULT_RETRY_DELAYS[0])
    }

    /// Runs `operation` until it succeeds, fails permanently, or retries run out.
    ///
    /// Waiting between attempts is abandoned as soon as `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns the last [`TransportError`] when no further retry is allowed,
    /// or [`TransportError::Cancelled`] when cancelled during a wait.
    pub async fn run<F, Fut, R>(
        &self,
        cancel: Option<&CancellationToken>,
        mut operation: F,
    ) -> Result<R, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, TransportError>>,
    {
        let mut attempt = 1;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let failure_type = classify_error(&error);
            let (delay, next_attempt) = match self.should_retry(failure_type, attempt) {
                RetryDecision::Retry { delay, attempt } => (delay, attempt),
                RetryDecision::DoNotRetry { reason } => {
                    debug!(attempt, reason = %reason, "not retrying");
                    return Err(error);
                }
            };

            let delay = retry_after_floor(&error, failure_type)
                .map_or(delay, |retry_after| retry_after.max(delay));
            warn!(
                attempt = next_attempt,
                delay_ms = delay.as_millis(),
                error = %error,
                "retrying after transient failure"
            );

            match cancel {
                Some(token) => {
                    tokio::select! {
                        biased;
                        () = token.cancelled() => return Err(TransportError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
            attempt = next_attempt;
        }
    }
}

/// Returns the server-requested wait for rate-limited or unavailable responses.
fn retry_after_floor(error: &TransportError, failure_type: FailureType) -> Option<Duration> {
    match error {
        TransportError::HttpStatus {
            status,
            retry_after: Some(value),
            ..
        } if failure_type == FailureType::RateLimited || *status == 503 => {
            parse_retry_after(value)
        }
        _ => None,
    }
}

/// Parses a Retry-After header value (delta-seconds or HTTP-date), capped at one hour.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    // Try parsing as integer seconds first (most common)
    if let Ok(seconds) = header_value.parse::<u64>() {
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    // Try parsing as HTTP-date
    let datetime = httpdate::parse_http_date(header_value).ok()?;
    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
        Err(_) => {
            debug!(header_value, "Retry-After date is in the past, ignoring");
            None
        }
    }
}

/// Classifies a transport error into a failure type for retry decisions.
///
/// # HTTP Status Code Classification
///
/// | Status | Type | Rationale |
/// |--------|------|-----------|
/// | 401, 403, 407 | NeedsAuth | Credentials must change first |
/// | 408 | Transient | Request timeout - may succeed |
/// | 429 | RateLimited | Rate limited - retry with backoff |
/// | other 4xx | Permanent | Client error - won't succeed on retry |
/// | 5xx | Transient | Server error - may be temporary |
///
/// # Non-HTTP Errors
///
/// | Error | Type | Rationale |
/// |-------|------|-----------|
/// | Timeout | Transient | Network may recover |
/// | Network | Transient | Server may come back |
/// | Cancelled | Cancelled | Caller gave up |
/// | everything else | Permanent | Local or payload problem |
#[must_use]
pub fn classify_error(error: &TransportError) -> FailureType {
    match error {
        TransportError::HttpStatus { status, .. } => classify_http_status(*status),
        TransportError::Timeout { .. } | TransportError::Network { .. } => FailureType::Transient,
        TransportError::Cancelled => FailureType::Cancelled,
        TransportError::UnexpectedStatus { .. }
        | TransportError::Io { .. }
        | TransportError::InvalidUrl { .. }
        | TransportError::InvalidHeader { .. }
        | TransportError::Decode { .. }
        | TransportError::Stage(_) => FailureType::Permanent,
    }
}

/// Classifies an HTTP status code into a failure type.
fn classify_http_status(status: u16) -> FailureType {
    match status {
        401 | 403 | 407 => FailureType::NeedsAuth,
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        500..=599 => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}
