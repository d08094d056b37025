//! Courier Core Library
//!
//! This library provides a resilient HTTP/SSE client facade: one call contract
//! covering request execution, retries, cancellation, server-sent event
//! streaming, file transfer and structured error reporting.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`session`] - Session configuration, credentials, connectivity and permission gates
//! - [`request`] - Request descriptors, cancel tokens and call results
//! - [`transport`] - HTTP execution, retries, downloads, file staging and SSE sessions
//! - [`api`] - The [`ApiClient`] entry point, error taxonomy and error feed
//!
//! # Example
//!
//! ```no_run
//! use courier_core::{ApiClient, CallResult, FromPayload, RequestDescriptor, SessionConfig};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! impl FromPayload for User {}
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new();
//! client.setup(SessionConfig::new("https://api.example.com"))?;
//! client.set_bearer_auth_token(Some("secret"));
//!
//! let descriptor = RequestDescriptor::get("/users/1").decode_json::<User>().build();
//! match client.call(&descriptor, None).await {
//!     CallResult::Success(user) => println!("{user:?}"),
//!     CallResult::Failure(error) => eprintln!("{error}"),
//! }
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod request;
pub mod session;
pub mod transport;
mod user_agent;

// Re-export commonly used types
pub use api::{ApiClient, ApiClientBuilder, ApiError, ApiErrorKind};
pub use request::{
    CallResult, CancelState, CancelToken, DescriptorBuilder, FromPayload, HttpMethod, MapError,
    Payload, QueryValue, RequestBody, RequestDescriptor, ResponseShape,
};
pub use session::{
    AssumeOnline, ConnectivityGate, CredentialStore, GrantedPermissions, PermissionGate,
    RetryConfig, SessionConfig, SetupError, TcpReachability, Timeouts,
};
pub use transport::{FileStager, RetryPolicy, SseEvent, StageError, TransportError};
