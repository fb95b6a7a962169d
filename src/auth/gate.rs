//! Authentication gate.

use std::sync::Arc;

use super::identity::{TokenIntrospection, UserIdentity};
use super::provider::IdentityProvider;
use crate::{Result, StorageError};

/// Maximum length of a user ID.
const MAX_USER_ID_LENGTH: usize = 128;

/// Turns a bearer credential into a [`UserIdentity`] or `Unauthorized`.
///
/// The gate never touches storage or quota.
#[derive(Clone)]
pub struct AuthenticationGate {
    provider: Arc<dyn IdentityProvider>,
}

impl AuthenticationGate {
    /// Create a gate over an identity provider.
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    /// Validate a credential.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<UserIdentity> {
        let token = credential
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| StorageError::Unauthorized("missing credential".to_string()))?;

        let info = self.provider.introspect(token).await?;
        identity_from(info, chrono::Utc::now().timestamp())
    }
}

/// Check an introspection result at time `now` (Unix seconds).
fn identity_from(info: TokenIntrospection, now: i64) -> Result<UserIdentity> {
    if !info.active {
        return Err(StorageError::Unauthorized("token is not active".to_string()));
    }

    match info.exp {
        Some(exp) if exp > now => {}
        Some(_) => return Err(StorageError::Unauthorized("token has expired".to_string())),
        None => {
            return Err(StorageError::Unauthorized(
                "token has no expiry".to_string(),
            ))
        }
    }

    let user_id = info
        .sub
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StorageError::Unauthorized("token has no subject".to_string()))?;
    if !is_safe_user_id(user_id) {
        return Err(StorageError::Unauthorized(
            "token subject is not a valid user ID".to_string(),
        ));
    }

    let username = info
        .display_name()
        .ok_or_else(|| StorageError::Unauthorized("token has no username".to_string()))?;

    Ok(UserIdentity {
        user_id: user_id.to_string(),
        username: username.to_string(),
        roles: info.roles(),
    })
}

/// A user ID names the owner's root directory, so it must be one plain segment.
pub(crate) fn is_safe_user_id(user_id: &str) -> bool {
    !user_id.is_empty()
        && user_id.len() <= MAX_USER_ID_LENGTH
        && user_id != "."
        && user_id != ".."
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
