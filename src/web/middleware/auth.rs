//! Bearer authentication extractors.

use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

use super::trace::trace_id_of;
use crate::auth::{IdentityRequirement, RequestContext};
use crate::web::error::ApiError;
use crate::web::handlers::AppState;

/// Bearer token of the request, if the header is present and well formed.
async fn bearer_token(parts: &mut Parts, state: &Arc<AppState>) -> Option<String> {
    TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
        .await
        .ok()
        .map(|TypedHeader(Authorization(bearer))| bearer.token().to_string())
}

async fn build_context(
    parts: &mut Parts,
    state: &Arc<AppState>,
    requirement: IdentityRequirement,
) -> Result<RequestContext, ApiError> {
    let trace_id = trace_id_of(&parts.extensions);
    let token = bearer_token(parts, state).await;

    RequestContext::build(&state.gate, token.as_deref(), trace_id.clone(), requirement)
        .await
        .map_err(|e| ApiError::from_storage(e, &trace_id))
}

/// Extractor for an authenticated request.
///
/// Rejects with 401 unless the bearer token is valid.
#[derive(Debug)]
pub struct Authenticated(pub RequestContext);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        build_context(parts, state, IdentityRequirement::Required)
            .await
            .map(Authenticated)
    }
}

/// Extractor for the system status endpoint.
///
/// Identity is required only when configured; otherwise the request
/// proceeds anonymously.
#[derive(Debug)]
pub struct SystemContext(pub RequestContext);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for SystemContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let requirement = if state.system_status_requires_identity {
            IdentityRequirement::Required
        } else {
            IdentityRequirement::Optional
        };
        build_context(parts, state, requirement)
            .await
            .map(SystemContext)
    }
}
