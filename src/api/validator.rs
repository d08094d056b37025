//! Checks raw payloads against the declared response shape.

use serde_json::Value;
use thiserror::Error;

use crate::request::{Payload, ResponseShape};

/// The payload does not have the declared shape.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("expected {expected} response, got {actual}")]
pub struct ValidationError {
    /// Declared shape.
    pub expected: ResponseShape,
    /// Kind of payload actually received.
    pub actual: &'static str,
}

/// Validates payloads before they are mapped.
pub(crate) struct ResponseValidator;

impl ResponseValidator {
    /// Accepts `payload` when it matches `shape`.
    pub(crate) fn check(shape: ResponseShape, payload: &Payload) -> Result<(), ValidationError> {
        let matches = matches!(
            (shape, payload),
            (ResponseShape::Json, Payload::Json(_))
                | (ResponseShape::Text, Payload::Text(_))
                | (ResponseShape::Bytes, Payload::Bytes(_))
        );
        if matches {
            Ok(())
        } else {
            Err(ValidationError {
                expected: shape,
                actual: payload.kind(),
            })
        }
    }

    /// Extracts the JSON document a mapper consumes.
    pub(crate) fn json(payload: Payload) -> Result<Value, ValidationError> {
        match payload {
            Payload::Json(value) => Ok(value),
            other => Err(ValidationError {
                expected: ResponseShape::Json,
                actual: other.kind(),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    #[test]
    fn test_check_matching_shapes() {
        assert!(ResponseValidator::check(ResponseShape::Json, &Payload::Json(json!(1))).is_ok());
        assert!(ResponseValidator::check(ResponseShape::Text, &Payload::Text("a".into())).is_ok());
        assert!(
            ResponseValidator::check(ResponseShape::Bytes, &Payload::Bytes(Bytes::new())).is_ok()
        );
    }

    #[test]
    fn test_check_mismatch_reports_both_sides() {
        let error =
            ResponseValidator::check(ResponseShape::Json, &Payload::Text("<html>".into()))
                .unwrap_err();
        assert_eq!(error.to_string(), "expected json response, got text");
    }

    #[test]
    fn test_json_rejects_empty_body() {
        let error = ResponseValidator::json(Payload::Empty).unwrap_err();
        assert_eq!(error.actual, "empty");
    }
}
