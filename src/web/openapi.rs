//! OpenAPI document for the storage API.

use axum::{routing::get, Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use super::dto::{
    NodeResponse, PathRequest, RemoveRequest, RemoveResponse, SystemStorageStatusResponse,
    UploadForm, UploadResponse, UserStorageStatusResponse,
};
use super::handlers::storage;

/// Generated API description.
#[derive(OpenApi)]
#[openapi(
    info(title = "fast-storage", description = "Per-user file storage with quota accounting"),
    paths(
        storage::system_storage_status,
        storage::user_storage_status,
        storage::list_directory,
        storage::create_folder,
        storage::upload_file,
        storage::download_file,
        storage::remove_file,
    ),
    components(schemas(
        PathRequest,
        RemoveRequest,
        UploadForm,
        NodeResponse,
        UploadResponse,
        RemoveResponse,
        UserStorageStatusResponse,
        SystemStorageStatusResponse,
    )),
    modifiers(&BearerAuth),
    tags((name = "storage", description = "Files, folders and quota"))
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Router serving the OpenAPI document.
pub fn create_openapi_router() -> Router {
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDoc::openapi()) }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_document() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let paths = doc["paths"].as_object().unwrap();
        assert_eq!(paths.len(), 7);
        assert!(paths.contains_key("/storage/upload_file"));
        assert!(doc["components"]["securitySchemes"]["bearer_auth"].is_object());
    }
}
