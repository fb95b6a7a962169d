//! Storage handlers for Web API.

use axum::{
    body::Body,
    extract::{multipart::MultipartError, Multipart, State},
    http::header,
    response::Response,
};
use std::sync::Arc;

use crate::auth::TraceId;
use crate::web::dto::{
    Envelope, NodeResponse, PathRequest, RemoveRequest, RemoveResponse,
    SystemStorageStatusResponse, UploadForm, UploadResponse, UserStorageStatusResponse,
    ValidatedJson,
};
use crate::web::error::ApiError;
use crate::web::handlers::AppState;
use crate::web::middleware::{Authenticated, SystemContext};

/// Generate a safe Content-Disposition header value for file downloads.
///
/// Control characters are dropped, quotes and backslashes are replaced in
/// the ASCII fallback, and non-ASCII names get an RFC 5987 `filename*`.
fn content_disposition_header(filename: &str) -> String {
    let plain = filename.is_ascii()
        && !filename
            .chars()
            .any(|c| c.is_control() || c == '"' || c == '\\');
    if plain {
        return format!("attachment; filename=\"{filename}\"");
    }

    let fallback: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '"' | '\\' => '_',
            c if !c.is_ascii() => '_',
            c => c,
        })
        .collect();
    let clean: String = filename.chars().filter(|c| !c.is_control()).collect();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(&clean)
    )
}

fn multipart_error(e: MultipartError, trace_id: &TraceId) -> ApiError {
    tracing::warn!(trace_id = %trace_id, "Failed to read multipart field: {}", e);
    ApiError::bad_request("Invalid multipart data").with_trace(trace_id)
}

/// GET /storage/system_storage_status - Totals across all users.
#[utoipa::path(
    get,
    path = "/storage/system_storage_status",
    tag = "storage",
    responses(
        (status = 200, description = "System storage status", body = SystemStorageStatusResponse),
        (status = 401, description = "Unauthorized (only when identity is required)")
    )
)]
pub async fn system_storage_status(
    State(state): State<Arc<AppState>>,
    SystemContext(ctx): SystemContext,
) -> Result<Envelope<SystemStorageStatusResponse>, ApiError> {
    let status = state
        .storage
        .system_storage_status(&ctx)
        .await
        .map_err(|e| ApiError::from_storage(e, ctx.trace_id()))?;

    Ok(Envelope::ok(status.into(), ctx.trace_id()))
}

/// GET /storage/user_storage_status - Quota of the calling user.
#[utoipa::path(
    get,
    path = "/storage/user_storage_status",
    tag = "storage",
    responses(
        (status = 200, description = "User storage status", body = UserStorageStatusResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn user_storage_status(
    State(state): State<Arc<AppState>>,
    Authenticated(ctx): Authenticated,
) -> Result<Envelope<UserStorageStatusResponse>, ApiError> {
    let record = state
        .storage
        .user_storage_status(&ctx)
        .await
        .map_err(|e| ApiError::from_storage(e, ctx.trace_id()))?;

    Ok(Envelope::ok(record.into(), ctx.trace_id()))
}

/// POST /storage/get_all_element_in_specific_directory - List a folder.
#[utoipa::path(
    post,
    path = "/storage/get_all_element_in_specific_directory",
    tag = "storage",
    request_body = PathRequest,
    responses(
        (status = 200, description = "Folder children, sorted by name", body = Vec<NodeResponse>),
        (status = 400, description = "Invalid path"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Path escapes the storage root"),
        (status = 404, description = "Folder not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_directory(
    State(state): State<Arc<AppState>>,
    Authenticated(ctx): Authenticated,
    ValidatedJson(req): ValidatedJson<PathRequest>,
) -> Result<Envelope<Vec<NodeResponse>>, ApiError> {
    let nodes = state
        .storage
        .list_directory(&ctx, &req.path)
        .await
        .map_err(|e| ApiError::from_storage(e, ctx.trace_id()))?;

    let items = nodes.iter().map(NodeResponse::from).collect();
    Ok(Envelope::ok(items, ctx.trace_id()))
}

/// POST /storage/create_folder - Create a folder.
#[utoipa::path(
    post,
    path = "/storage/create_folder",
    tag = "storage",
    request_body = PathRequest,
    responses(
        (status = 200, description = "Folder created", body = NodeResponse),
        (status = 400, description = "Invalid path"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Path escapes the storage root"),
        (status = 409, description = "Node already exists")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_folder(
    State(state): State<Arc<AppState>>,
    Authenticated(ctx): Authenticated,
    ValidatedJson(req): ValidatedJson<PathRequest>,
) -> Result<Envelope<NodeResponse>, ApiError> {
    let node = state
        .storage
        .create_folder(&ctx, &req.path)
        .await
        .map_err(|e| ApiError::from_storage(e, ctx.trace_id()))?;

    Ok(Envelope::ok(node.into(), ctx.trace_id()))
}

/// POST /storage/upload_file - Upload a file.
///
/// Request body: multipart/form-data with "path", optional "size" and
/// "file" fields, in that order. The file part is streamed to disk.
#[utoipa::path(
    post,
    path = "/storage/upload_file",
    tag = "storage",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "File stored", body = UploadResponse),
        (status = 400, description = "Invalid input or file too large"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Path escapes the storage root"),
        (status = 409, description = "Target is a folder"),
        (status = 507, description = "Storage quota exceeded")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Authenticated(ctx): Authenticated,
    mut multipart: Multipart,
) -> Result<Envelope<UploadResponse>, ApiError> {
    let trace_id = ctx.trace_id().clone();
    let mut path: Option<String> = None;
    let mut size: Option<u64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, &trace_id))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "path" => {
                path = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| multipart_error(e, &trace_id))?,
                );
            }
            "size" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| multipart_error(e, &trace_id))?;
                let parsed = text.trim().parse::<u64>().map_err(|_| {
                    ApiError::bad_request("size must be a non-negative integer")
                        .with_trace(&trace_id)
                })?;
                size = Some(parsed);
            }
            "file" => {
                let path = path.take().ok_or_else(|| {
                    ApiError::bad_request("path field must precede the file").with_trace(&trace_id)
                })?;
                let outcome = state
                    .storage
                    .upload_file(&ctx, &path, size, field)
                    .await
                    .map_err(|e| ApiError::from_storage(e, &trace_id))?;

                return Ok(Envelope::ok(outcome.into(), &trace_id));
            }
            _ => {}
        }
    }

    Err(ApiError::bad_request("No file provided").with_trace(&trace_id))
}

/// POST /storage/download_file - Download a file.
#[utoipa::path(
    post,
    path = "/storage/download_file",
    tag = "storage",
    request_body = PathRequest,
    responses(
        (status = 200, description = "File content", content_type = "application/octet-stream"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Path escapes the storage root"),
        (status = 404, description = "File not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Authenticated(ctx): Authenticated,
    ValidatedJson(req): ValidatedJson<PathRequest>,
) -> Result<Response<Body>, ApiError> {
    let download = state
        .storage
        .download_file(&ctx, &req.path)
        .await
        .map_err(|e| ApiError::from_storage(e, ctx.trace_id()))?;

    let filename = download.node.name().to_string();
    let content_type = mime_guess::from_path(&filename)
        .first_or_octet_stream()
        .to_string();
    let size = download.node.size_bytes;

    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition_header(&filename),
        )
        .header(header::CONTENT_LENGTH, size)
        .body(Body::from_stream(download.into_stream()))
        .map_err(|e| {
            tracing::error!(trace_id = %ctx.trace_id(), "Failed to build response: {}", e);
            ApiError::internal("Failed to build response").with_trace(ctx.trace_id())
        })
}

/// POST /storage/remove_file - Remove a file or folder.
#[utoipa::path(
    post,
    path = "/storage/remove_file",
    tag = "storage",
    request_body = RemoveRequest,
    responses(
        (status = 200, description = "Node removed", body = RemoveResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Path escapes the storage root"),
        (status = 404, description = "Node not found"),
        (status = 409, description = "Folder not empty, or the root folder")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn remove_file(
    State(state): State<Arc<AppState>>,
    Authenticated(ctx): Authenticated,
    ValidatedJson(req): ValidatedJson<RemoveRequest>,
) -> Result<Envelope<RemoveResponse>, ApiError> {
    let outcome = state
        .storage
        .remove(&ctx, &req.path, req.recursive)
        .await
        .map_err(|e| ApiError::from_storage(e, ctx.trace_id()))?;

    Ok(Envelope::ok(outcome.into(), ctx.trace_id()))
}
