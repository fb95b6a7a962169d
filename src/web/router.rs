//! Router configuration for Web API.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers::{
    create_folder, download_file, health_check, list_directory, remove_file,
    system_storage_status, upload_file, user_storage_status, AppState,
};
use super::middleware::{create_cors_layer, security_headers, trace_id};
use super::openapi::create_openapi_router;
use crate::config::WebConfig;

/// Allowance for multipart framing on top of the file size limit.
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Create the main API router.
///
/// Storage routes live under `{base_path}/storage`; `/health` and the
/// OpenAPI document are always at the top level.
pub fn create_router(app_state: Arc<AppState>, config: &WebConfig) -> Router {
    let body_limit = app_state
        .storage
        .max_upload_bytes()
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    let storage_routes = Router::new()
        .route("/system_storage_status", get(system_storage_status))
        .route("/user_storage_status", get(user_storage_status))
        .route(
            "/get_all_element_in_specific_directory",
            post(list_directory),
        )
        .route("/create_folder", post(create_folder))
        .route("/upload_file", post(upload_file))
        .route("/download_file", post(download_file))
        .route("/remove_file", post(remove_file))
        .layer(DefaultBodyLimit::max(body_limit));

    let api_routes = Router::new().nest("/storage", storage_routes);
    let api_routes = if config.base_path.is_empty() {
        api_routes
    } else {
        Router::new().nest(&config.base_path, api_routes)
    };

    api_routes
        .with_state(app_state)
        .merge(create_health_router())
        .merge(create_openapi_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer(&config.cors_origins))
                .layer(middleware::from_fn(trace_id))
                .layer(middleware::from_fn(security_headers)),
        )
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}
