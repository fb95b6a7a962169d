//! API error handling for fast-storage.
//!
//! This is the only place where [`StorageError`] is translated into what
//! callers see: one stable status code per failure kind and a message that
//! never carries physical paths or backend detail.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::auth::TraceId;
use crate::web::dto::Envelope;
use crate::StorageError;

/// Externally visible failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed request input (400).
    Validation,
    /// Missing or invalid identity (401).
    Unauthorized,
    /// Path escapes the owner root (403).
    PathTraversal,
    /// Node absent or of the wrong kind (404).
    NotFound,
    /// Node exists, or folder not empty (409).
    Conflict,
    /// Allotment would be exceeded (507).
    QuotaExceeded,
    /// Anything else (500).
    Internal,
}

impl ErrorCode {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Validation => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::PathTraversal => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::QuotaExceeded => StatusCode::INSUFFICIENT_STORAGE,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error type.
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    trace_id: Option<TraceId>,
}

impl ApiError {
    /// Create a new API error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            trace_id: None,
        }
    }

    /// Create a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    /// Create an unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Create an internal server error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Attach the request's trace ID.
    pub fn with_trace(mut self, trace_id: &TraceId) -> Self {
        self.trace_id = Some(trace_id.clone());
        self
    }

    /// Map a storage error for the given request, logging it.
    pub fn from_storage(err: StorageError, trace_id: &TraceId) -> Self {
        if err.is_client_error() {
            tracing::warn!(trace_id = %trace_id, "Request failed: {}", err);
        } else {
            tracing::error!(trace_id = %trace_id, "Internal error: {}", err);
        }
        Self::from(err).with_trace(trace_id)
    }

    /// Error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Caller-facing message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status_code();
        let body = Envelope::<()> {
            status_code: status.as_u16(),
            data: None,
            error_message: Some(self.message),
            trace_id: self
                .trace_id
                .map(|t| t.to_string())
                .unwrap_or_default(),
        };
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Validation(msg) => ApiError::bad_request(msg),
            StorageError::Unauthorized(_) => ApiError::unauthorized("Authentication required"),
            StorageError::PathTraversal(_) => ApiError::new(
                ErrorCode::PathTraversal,
                "Path resolves outside your storage root",
            ),
            StorageError::NotFound(what) => {
                ApiError::new(ErrorCode::NotFound, format!("{what} not found"))
            }
            StorageError::Conflict(msg) => ApiError::new(ErrorCode::Conflict, msg),
            StorageError::QuotaExceeded {
                requested,
                available,
            } => ApiError::new(
                ErrorCode::QuotaExceeded,
                format!(
                    "Storage quota exceeded: {requested} bytes requested, {available} bytes available"
                ),
            ),
            StorageError::Internal(_)
            | StorageError::Database(_)
            | StorageError::Io(_)
            | StorageError::Config(_) => ApiError::internal("An internal error occurred"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status() {
        assert_eq!(ErrorCode::Validation.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ErrorCode::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ErrorCode::PathTraversal.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::Conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::QuotaExceeded.status_code().as_u16(), 507);
        assert_eq!(
            ErrorCode::Internal.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_storage_error_mapping() {
        let cases = [
            (StorageError::Validation("bad".into()), ErrorCode::Validation),
            (StorageError::Unauthorized("expired".into()), ErrorCode::Unauthorized),
            (StorageError::PathTraversal("../x".into()), ErrorCode::PathTraversal),
            (StorageError::NotFound("file /a".into()), ErrorCode::NotFound),
            (StorageError::Conflict("exists".into()), ErrorCode::Conflict),
            (
                StorageError::QuotaExceeded {
                    requested: 2,
                    available: 1,
                },
                ErrorCode::QuotaExceeded,
            ),
            (StorageError::Database("locked".into()), ErrorCode::Internal),
        ];
        for (err, code) in cases {
            assert_eq!(ApiError::from(err).code(), code);
        }
    }

    #[test]
    fn test_internal_details_hidden() {
        let io = std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/srv/storage/users/alice/secret: permission denied",
        );
        let err = ApiError::from(StorageError::Io(io));
        assert_eq!(err.message(), "An internal error occurred");
        assert!(!err.message().contains("/srv"));

        let err = ApiError::from(StorageError::PathTraversal("../../etc/passwd".into()));
        assert!(!err.message().contains("etc"));
    }

    #[tokio::test]
    async fn test_error_envelope_body() {
        use http_body_util::BodyExt;

        let trace = TraceId::from_inbound(Some("t-42"));
        let response =
            ApiError::from_storage(StorageError::Conflict("/docs already exists".into()), &trace)
                .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["statusCode"], 409);
        assert!(json["data"].is_null());
        assert_eq!(json["errorMessage"], "/docs already exists");
        assert_eq!(json["traceId"], "t-42");
    }
}
