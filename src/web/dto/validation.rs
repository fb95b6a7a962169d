//! Validation utilities for Web API DTOs.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors};

use crate::web::error::ApiError;
use crate::web::middleware::trace_id_of;

/// A JSON extractor that validates the request body.
///
/// Deserialization and validation failures are both reported as
/// validation errors carrying the request's trace ID.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let trace_id = trace_id_of(req.extensions());

        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
            ApiError::bad_request(format!("Invalid JSON: {}", e.body_text())).with_trace(&trace_id)
        })?;

        value
            .validate()
            .map_err(|e| ApiError::bad_request(validation_message(&e)).with_trace(&trace_id))?;

        Ok(ValidatedJson(value))
    }
}

/// Flatten field errors into one message, fields in name order.
pub fn validation_message(errors: &ValidationErrors) -> String {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    fields
        .into_iter()
        .flat_map(|(field, field_errors)| {
            field_errors.iter().map(move |e| {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "Invalid value".to_string());
                format!("{field}: {message}")
            })
        })
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Custom Validators
// ============================================================================

/// Validate that a string does not contain control characters or NULL bytes.
pub fn no_control_chars(value: &str) -> Result<(), validator::ValidationError> {
    if value.chars().any(char::is_control) {
        return Err(validator::ValidationError::new("no_control_chars")
            .with_message("Must not contain control characters".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::dto::PathRequest;

    #[test]
    fn test_no_control_chars_valid() {
        assert!(no_control_chars("/docs/a.txt").is_ok());
        assert!(no_control_chars("/日本語/ファイル.txt").is_ok());
    }

    #[test]
    fn test_no_control_chars_invalid() {
        assert!(no_control_chars("Hello\x00World").is_err()); // NULL byte
        assert!(no_control_chars("Line 1\nLine 2").is_err());
        assert!(no_control_chars("Hello\x1bWorld").is_err()); // Escape
    }

    #[test]
    fn test_validation_message() {
        let req = PathRequest {
            path: "/a\u{7}".to_string(),
        };
        let errors = req.validate().unwrap_err();
        assert_eq!(
            validation_message(&errors),
            "path: Must not contain control characters"
        );
    }
}
