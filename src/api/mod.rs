//! Public call surface: the [`ApiClient`], its error taxonomy and error feed.
//!
//! Every failure inside a call is caught here and classified into an
//! [`ApiError`]; no other error type crosses [`ApiClient::call`] or
//! [`ApiClient::call_stream`].

mod error;
mod orchestrator;
mod translator;
mod validator;

pub use error::{ApiError, ApiErrorKind};
pub use orchestrator::{ApiClient, ApiClientBuilder};
pub use validator::ValidationError;
