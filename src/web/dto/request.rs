//! Request DTOs for Web API.

use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use super::validation::no_control_chars;

/// Body of every single-path request (list, download, create folder).
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PathRequest {
    /// Logical path relative to the caller's storage root.
    #[validate(
        length(max = 4096, message = "Path must be at most 4096 characters"),
        custom(function = "no_control_chars")
    )]
    #[schema(example = "/docs")]
    pub path: String,
}

/// Remove request.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RemoveRequest {
    /// Logical path of the file or folder.
    #[validate(
        length(max = 4096, message = "Path must be at most 4096 characters"),
        custom(function = "no_control_chars")
    )]
    #[schema(example = "/docs/a.txt")]
    pub path: String,
    /// Also remove a folder that still has children.
    #[serde(default)]
    pub recursive: bool,
}

/// Multipart form accepted by the upload endpoint.
///
/// Only used to describe the form in the API document; the handler reads
/// the fields as a stream.
#[derive(Debug, ToSchema)]
pub struct UploadForm {
    /// Target file path. Must precede `file`.
    pub path: String,
    /// Declared size in bytes. Without it the upload may use whatever
    /// quota is free when it starts.
    pub size: Option<u64>,
    /// File content.
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MAX_PATH_LENGTH;

    #[test]
    fn test_path_request_validation() {
        let req: PathRequest = serde_json::from_str(r#"{"path": "/docs"}"#).unwrap();
        assert!(req.validate().is_ok());

        let req = PathRequest {
            path: "/docs/\u{0}".to_string(),
        };
        assert!(req.validate().is_err());

        let req = PathRequest {
            path: "a".repeat(MAX_PATH_LENGTH + 1),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_remove_request_defaults() {
        let req: RemoveRequest = serde_json::from_str(r#"{"path": "/docs"}"#).unwrap();
        assert!(!req.recursive);

        let req: RemoveRequest =
            serde_json::from_str(r#"{"path": "/docs", "recursive": true}"#).unwrap();
        assert!(req.recursive);
    }

    #[test]
    fn test_missing_path_rejected() {
        assert!(serde_json::from_str::<PathRequest>("{}").is_err());
    }
}
