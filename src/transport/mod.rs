//! HTTP transport: unary requests, downloads, decode-and-persist and SSE.
//!
//! This module executes fully prepared requests. It knows nothing about the
//! session or the caller's output types; the [`crate::api`] layer resolves a
//! descriptor into a [`PreparedRequest`] and interprets the result.
//!
//! # Features
//!
//! - One pooled client per certificate policy, chosen per call
//! - Streaming downloads with collision-free file naming
//! - Retry with ordered delays and Retry-After awareness
//! - Server-sent event framing over a long-lived response body
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use courier_core::transport::{PreparedRequest, TlsPolicy, TransportClient};
//! use courier_core::ResponseShape;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = TransportClient::new(Duration::from_secs(30))?;
//! let request = PreparedRequest {
//!     method: reqwest::Method::GET,
//!     url: url::Url::parse("https://api.example.com/health")?,
//!     headers: reqwest::header::HeaderMap::new(),
//!     body: None,
//!     timeout: Some(Duration::from_secs(10)),
//!     tls: TlsPolicy::Verify,
//!     shape: ResponseShape::Text,
//!     log_body: false,
//! };
//! let response = transport.execute(&request, None).await?;
//! println!("HTTP {}", response.status);
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
mod files;
mod retry;
mod sse;

pub use client::{PreparedRequest, RawResponse, TlsPolicy, TransportClient};
pub use error::TransportError;
pub use files::{FileStager, StageError};
pub use retry::{FailureType, RetryDecision, RetryPolicy, classify_error, parse_retry_after};
pub use sse::{DEFAULT_EVENT_TYPE, SseEvent, SseParser, StreamSession};
