//! Response DTOs for Web API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::TraceId;
use crate::datetime::to_rfc3339;
use crate::quota::{QuotaRecord, SystemStorageStatus};
use crate::storage::{NodeKind, RemoveOutcome, StorageNode, UploadOutcome};

// ============================================================================
// Envelope
// ============================================================================

/// Uniform response wrapper.
///
/// Every field is always serialized: `data` is null on failure and
/// `errorMessage` is null on success.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T: Serialize> {
    /// HTTP status code, repeated in the body.
    pub status_code: u16,
    /// Operation result.
    pub data: Option<T>,
    /// Caller-facing failure message.
    pub error_message: Option<String>,
    /// Correlation ID of the request.
    pub trace_id: String,
}

impl<T: Serialize> Envelope<T> {
    /// Successful envelope.
    pub fn ok(data: T, trace_id: &TraceId) -> Self {
        Self {
            status_code: StatusCode::OK.as_u16(),
            data: Some(data),
            error_message: None,
            trace_id: trace_id.to_string(),
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

// ============================================================================
// Storage
// ============================================================================

/// A file or folder.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeResponse {
    /// Final path segment (empty for the root).
    #[schema(example = "report.pdf")]
    pub name: String,
    /// Owner-relative logical path.
    #[schema(example = "/docs/report.pdf")]
    pub path: String,
    /// `file` or `folder`.
    #[serde(rename = "type")]
    #[schema(value_type = String, example = "file")]
    pub kind: NodeKind,
    /// Size in bytes (0 for folders).
    pub size: u64,
    /// Creation time (RFC 3339).
    pub created_at: String,
    /// Last modification time (RFC 3339).
    pub modified_at: String,
}

impl From<&StorageNode> for NodeResponse {
    fn from(node: &StorageNode) -> Self {
        Self {
            name: node.name().to_string(),
            path: node.path.to_string(),
            kind: node.kind,
            size: node.size_bytes,
            created_at: to_rfc3339(&node.created_at),
            modified_at: to_rfc3339(&node.modified_at),
        }
    }
}

impl From<StorageNode> for NodeResponse {
    fn from(node: StorageNode) -> Self {
        Self::from(&node)
    }
}

/// Quota status of the calling user.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserStorageStatusResponse {
    pub user_id: String,
    pub allotted_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    /// Used share of the allotment, 0-100.
    pub usage_percent: f64,
}

impl From<QuotaRecord> for UserStorageStatusResponse {
    fn from(record: QuotaRecord) -> Self {
        Self {
            available_bytes: record.available_bytes(),
            usage_percent: record.usage_percent(),
            user_id: record.owner_id,
            allotted_bytes: record.allotted_bytes,
            used_bytes: record.used_bytes,
        }
    }
}

/// Totals across all owners.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SystemStorageStatusResponse {
    /// Sum of all allotments.
    pub total_capacity_bytes: u64,
    pub total_used_bytes: u64,
    /// Number of owners with a quota record.
    pub user_count: u64,
}

impl From<SystemStorageStatus> for SystemStorageStatusResponse {
    fn from(status: SystemStorageStatus) -> Self {
        Self {
            total_capacity_bytes: status.total_capacity_bytes,
            total_used_bytes: status.total_used_bytes,
            user_count: status.user_count,
        }
    }
}

/// Result of an upload.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file: NodeResponse,
    /// Whether an existing file was overwritten.
    pub replaced: bool,
}

impl From<UploadOutcome> for UploadResponse {
    fn from(outcome: UploadOutcome) -> Self {
        Self {
            file: NodeResponse::from(&outcome.node),
            replaced: outcome.replaced,
        }
    }
}

/// Result of a removal.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoveResponse {
    pub path: String,
    #[serde(rename = "type")]
    #[schema(value_type = String, example = "folder")]
    pub kind: NodeKind,
    /// Bytes returned to the quota.
    pub released_bytes: u64,
}

impl From<RemoveOutcome> for RemoveResponse {
    fn from(outcome: RemoveOutcome) -> Self {
        Self {
            path: outcome.path.to_string(),
            kind: outcome.kind,
            released_bytes: outcome.released_bytes,
        }
    }
}
