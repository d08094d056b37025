//! Raw response payloads and the typed call result.

use std::path::PathBuf;

use bytes::Bytes;
use serde_json::Value;

use crate::api::ApiError;

/// Response body as read by the transport, before any mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// No body.
    Empty,
    /// Decoded JSON document.
    Json(Value),
    /// Text body (also used for JSON-shaped responses that failed to parse).
    Text(String),
    /// Raw bytes.
    Bytes(Bytes),
    /// Path of a file written by a download or decode-and-persist call.
    File(PathBuf),
}

impl Payload {
    /// Short name of the variant, used in validation messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Json(_) => "json",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::File(_) => "file",
        }
    }
}

/// Conversion from a raw payload into a call's output type.
///
/// Used whenever no mapper applies: text and bytes responses, saved files and
/// raw SSE data. Types that are only ever produced by a mapper can rely on the
/// default method, which yields no value:
///
/// ```
/// use courier_core::FromPayload;
///
/// struct Profile {
///     name: String,
/// }
///
/// impl FromPayload for Profile {}
/// ```
pub trait FromPayload: Sized {
    /// Converts `payload`, returning `None` when it has no meaning for this type.
    fn from_payload(payload: Payload) -> Option<Self> {
        let _ = payload;
        None
    }
}

impl FromPayload for () {}

impl FromPayload for Payload {
    fn from_payload(payload: Payload) -> Option<Self> {
        Some(payload)
    }
}

impl FromPayload for String {
    fn from_payload(payload: Payload) -> Option<Self> {
        match payload {
            Payload::Empty => None,
            Payload::Json(value) => Some(value.to_string()),
            Payload::Text(text) => Some(text),
            Payload::Bytes(bytes) => String::from_utf8(bytes.to_vec()).ok(),
            Payload::File(path) => Some(path.display().to_string()),
        }
    }
}

impl FromPayload for Bytes {
    fn from_payload(payload: Payload) -> Option<Self> {
        match payload {
            Payload::Bytes(bytes) => Some(bytes),
            Payload::Text(text) => Some(Bytes::from(text)),
            Payload::Json(value) => serde_json::to_vec(&value).ok().map(Bytes::from),
            Payload::Empty | Payload::File(_) => None,
        }
    }
}

impl FromPayload for Vec<u8> {
    fn from_payload(payload: Payload) -> Option<Self> {
        Bytes::from_payload(payload).map(|bytes| bytes.to_vec())
    }
}

impl FromPayload for PathBuf {
    fn from_payload(payload: Payload) -> Option<Self> {
        match payload {
            Payload::File(path) => Some(path),
            _ => None,
        }
    }
}

impl FromPayload for Value {
    fn from_payload(payload: Payload) -> Option<Self> {
        match payload {
            Payload::Empty | Payload::Bytes(_) => None,
            Payload::Json(value) => Some(value),
            Payload::Text(text) => Some(Value::String(text)),
            Payload::File(path) => Some(Value::String(path.display().to_string())),
        }
    }
}

/// Scalars read from a JSON document or parsed from text.
macro_rules! impl_from_payload_scalar {
    ($($ty:ty),*) => {
        $(
            impl FromPayload for $ty {
                fn from_payload(payload: Payload) -> Option<Self> {
                    match payload {
                        Payload::Json(value) => serde_json::from_value(value).ok(),
                        Payload::Text(text) => text.trim().parse().ok(),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_from_payload_scalar!(bool, i32, i64, u32, u64, f64);

/// Outcome of a call: a value (possibly absent) or a classified error.
#[derive(Debug, Clone)]
pub enum CallResult<T> {
    /// The call succeeded. `None` for fire-and-forget calls.
    Success(Option<T>),
    /// The call failed.
    Failure(ApiError),
}

impl<T> CallResult<T> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns the success value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success(value) => value.as_ref(),
            Self::Failure(_) => None,
        }
    }

    /// Returns the error of a failed call.
    #[must_use]
    pub fn error(&self) -> Option<&ApiError> {
        match self {
            Self::Success(_) => None,
            Self::Failure(error) => Some(error),
        }
    }

    /// Converts into a standard `Result`.
    ///
    /// # Errors
    ///
    /// Returns the [`ApiError`] of a failed call.
    pub fn into_result(self) -> Result<Option<T>, ApiError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(error) => Err(error),
        }
    }

    /// Maps the success value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> CallResult<U> {
        match self {
            Self::Success(value) => CallResult::Success(value.map(f)),
            Self::Failure(error) => CallResult::Failure(error),
        }
    }
}

impl<T> From<Result<Option<T>, ApiError>> for CallResult<T> {
    fn from(result: Result<Option<T>, ApiError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::Failure(error),
        }
    }
}
