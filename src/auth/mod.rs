//! Authentication module for fast-storage.
//!
//! This module provides identity provider adapters (token introspection
//! and locally verified JWTs), the authentication gate that turns a bearer
//! credential into a typed identity, and the per-request context.

mod context;
mod gate;
mod identity;
mod provider;

pub use context::{IdentityRequirement, RequestContext, TraceId, TRACE_ID_HEADER};
pub use gate::AuthenticationGate;
pub(crate) use gate::is_safe_user_id;
pub use identity::{RealmAccess, TokenIntrospection, UserIdentity};
pub use provider::{IdentityProvider, JwtClaims, JwtIdentityProvider, KeycloakIntrospector};

use std::sync::Arc;

use crate::config::{IdentityConfig, IdentityMode};
use crate::Result;

/// Build the identity provider selected by configuration.
pub fn provider_from_config(config: &IdentityConfig) -> Result<Arc<dyn IdentityProvider>> {
    Ok(match config.mode {
        IdentityMode::Introspection => Arc::new(KeycloakIntrospector::from_config(config)?),
        IdentityMode::Jwt => Arc::new(JwtIdentityProvider::new(&config.jwt_secret)),
    })
}
