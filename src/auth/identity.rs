//! Identity types.

use serde::{Deserialize, Serialize};

/// Authenticated principal. Only the gate constructs these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserIdentity {
    /// Stable user ID; also the owner ID of the user's storage.
    pub user_id: String,
    /// Display name.
    pub username: String,
    /// Realm roles granted by the identity provider.
    pub roles: Vec<String>,
}

/// Realm role claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Token introspection result (RFC 7662, Keycloak flavour).
///
/// Every field is optional on the wire; the gate decides which ones it needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenIntrospection {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    /// Expiry, seconds since the Unix epoch.
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub realm_access: Option<RealmAccess>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

impl TokenIntrospection {
    /// Username claim, preferring `preferred_username`.
    pub fn display_name(&self) -> Option<&str> {
        self.preferred_username
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.username.as_deref().filter(|s| !s.is_empty()))
    }

    /// Realm roles, empty when the claim is absent.
    pub fn roles(&self) -> Vec<String> {
        self.realm_access
            .as_ref()
            .map(|r| r.roles.clone())
            .unwrap_or_default()
    }
}
