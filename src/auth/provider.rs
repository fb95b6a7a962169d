//! Identity provider adapters.

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::identity::{RealmAccess, TokenIntrospection};
use crate::config::IdentityConfig;
use crate::{Result, StorageError};

/// User agent presented to the identity provider.
const USER_AGENT: &str = "fast-storage/0.1 (token introspection)";

/// Source of truth for bearer credentials.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Look up what the identity provider knows about a token.
    ///
    /// Any failure to obtain an answer is reported as `Unauthorized`.
    async fn introspect(&self, token: &str) -> Result<TokenIntrospection>;
}

/// RFC 7662 token introspection against a Keycloak realm.
pub struct KeycloakIntrospector {
    client: Client,
    introspection_url: String,
    client_id: String,
    client_secret: String,
}

impl KeycloakIntrospector {
    /// Create an introspector.
    pub fn new(
        introspection_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| StorageError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            introspection_url: introspection_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }

    /// Create an introspector from the `[identity]` section.
    pub fn from_config(config: &IdentityConfig) -> Result<Self> {
        Self::new(
            config.introspection_url.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
            Duration::from_secs(config.timeout_secs.max(1)),
        )
    }
}

#[async_trait]
impl IdentityProvider for KeycloakIntrospector {
    async fn introspect(&self, token: &str) -> Result<TokenIntrospection> {
        let response = self
            .client
            .post(&self.introspection_url)
            .form(&[
                ("token", token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Token introspection request failed: {}", e);
                StorageError::Unauthorized("identity provider unavailable".to_string())
            })?;

        if !response.status().is_success() {
            tracing::warn!("Token introspection returned HTTP {}", response.status());
            return Err(StorageError::Unauthorized(
                "identity provider rejected the request".to_string(),
            ));
        }

        response.json::<TokenIntrospection>().await.map_err(|e| {
            tracing::warn!("Token introspection response could not be decoded: {}", e);
            StorageError::Unauthorized("invalid introspection response".to_string())
        })
    }
}

/// Claims of a locally signed access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID).
    pub sub: String,
    /// Username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    /// Issued at timestamp.
    pub iat: i64,
    /// Expiration timestamp.
    pub exp: i64,
    /// Realm roles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm_access: Option<RealmAccess>,
    /// Granted scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl JwtClaims {
    /// Claims for a user, valid for `ttl_secs` from now.
    pub fn for_user(user_id: &str, username: &str, ttl_secs: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id.to_string(),
            preferred_username: Some(username.to_string()),
            iat: now,
            exp: now + ttl_secs,
            realm_access: None,
            scope: None,
        }
    }
}

/// Verifies HS256 tokens with a shared secret.
#[derive(Clone)]
pub struct JwtIdentityProvider {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityProvider {
    /// Create a provider from a secret key.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Sign claims with the shared secret.
    pub fn sign(&self, claims: &JwtClaims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| StorageError::Internal(format!("failed to sign token: {}", e)))
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn introspect(&self, token: &str) -> Result<TokenIntrospection> {
        let data = decode::<JwtClaims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            tracing::debug!("JWT validation failed: {}", e);
            StorageError::Unauthorized("invalid or expired token".to_string())
        })?;

        let claims = data.claims;
        Ok(TokenIntrospection {
            active: true,
            sub: Some(claims.sub),
            preferred_username: claims.preferred_username,
            username: None,
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            realm_access: claims.realm_access,
            scope: claims.scope,
            client_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthenticationGate;
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Form, Router};
    use std::collections::HashMap;
    use std::sync::Arc;

    const ACTIVE_BODY: &str = r#"{
        "exp": 4102444800,
        "iat": 1700000000,
        "iss": "http://localhost:8180/realms/fast",
        "sub": "8f0c1d7e-0000-4000-8000-000000000001",
        "typ": "Bearer",
        "realm_access": {"roles": ["offline_access", "uma_authorization"]},
        "scope": "openid profile",
        "preferred_username": "alice",
        "client_id": "fast-storage",
        "username": "alice",
        "active": true
    }"#;

    async fn introspect_endpoint(Form(form): Form<HashMap<String, String>>) -> impl IntoResponse {
        let authorized = form.get("client_id").map(String::as_str) == Some("fast-storage")
            && form.get("client_secret").map(String::as_str) == Some("secret");
        if !authorized {
            return (StatusCode::UNAUTHORIZED, [(header::CONTENT_TYPE, "application/json")], "{}");
        }
        let body = match form.get("token").map(String::as_str) {
            Some("live-token") => ACTIVE_BODY,
            _ => r#"{"active":false}"#,
        };
        (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], body)
    }

    /// Serve a stand-in introspection endpoint and return its URL.
    async fn spawn_introspection_server() -> String {
        let app = Router::new().route("/introspect", post(introspect_endpoint));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/introspect")
    }

    #[tokio::test]
    async fn test_introspection_decodes_keycloak_body() {
        let url = spawn_introspection_server().await;
        let introspector =
            KeycloakIntrospector::new(url, "fast-storage", "secret", Duration::from_secs(5))
                .unwrap();

        let info = introspector.introspect("live-token").await.unwrap();
        assert!(info.active);
        assert_eq!(info.sub.as_deref(), Some("8f0c1d7e-0000-4000-8000-000000000001"));
        assert_eq!(info.preferred_username.as_deref(), Some("alice"));
        assert_eq!(info.roles(), vec!["offline_access", "uma_authorization"]);
        assert_eq!(info.exp, Some(4102444800));

        let info = introspector.introspect("revoked-token").await.unwrap();
        assert!(!info.active);
    }

    #[tokio::test]
    async fn test_gate_over_introspection() {
        let url = spawn_introspection_server().await;
        let introspector =
            KeycloakIntrospector::new(url.clone(), "fast-storage", "secret", Duration::from_secs(5))
                .unwrap();
        let gate = AuthenticationGate::new(Arc::new(introspector));

        let identity = gate.authenticate(Some("live-token")).await.unwrap();
        assert_eq!(identity.user_id, "8f0c1d7e-0000-4000-8000-000000000001");
        assert_eq!(identity.username, "alice");

        assert!(matches!(
            gate.authenticate(Some("revoked-token")).await,
            Err(StorageError::Unauthorized(_))
        ));

        // Wrong client credentials: the endpoint answers 401.
        let introspector =
            KeycloakIntrospector::new(url, "fast-storage", "wrong", Duration::from_secs(5))
                .unwrap();
        let gate = AuthenticationGate::new(Arc::new(introspector));
        assert!(matches!(
            gate.authenticate(Some("live-token")).await,
            Err(StorageError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_jwt_roundtrip() {
        let provider = JwtIdentityProvider::new("test-secret");
        let token = provider
            .sign(&JwtClaims::for_user("u-1", "alice", 3600))
            .unwrap();

        let info = provider.introspect(&token).await.unwrap();
        assert!(info.active);
        assert_eq!(info.sub.as_deref(), Some("u-1"));
        assert_eq!(info.display_name(), Some("alice"));
    }

    #[tokio::test]
    async fn test_jwt_expired_token() {
        let provider = JwtIdentityProvider::new("test-secret");
        let token = provider
            .sign(&JwtClaims::for_user("u-1", "alice", -3600))
            .unwrap();

        assert!(matches!(
            provider.introspect(&token).await,
            Err(StorageError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_jwt_wrong_secret() {
        let signer = JwtIdentityProvider::new("secret1");
        let verifier = JwtIdentityProvider::new("secret2");
        let token = signer
            .sign(&JwtClaims::for_user("u-1", "alice", 3600))
            .unwrap();

        assert!(verifier.introspect(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_jwt_garbage_token() {
        let provider = JwtIdentityProvider::new("test-secret");
        assert!(matches!(
            provider.introspect("not-a-jwt").await,
            Err(StorageError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_introspection_unreachable_is_unauthorized() {
        let introspector = KeycloakIntrospector::new(
            "http://127.0.0.1:9/introspect",
            "fast-storage",
            "secret",
            Duration::from_millis(500),
        )
        .unwrap();

        assert!(matches!(
            introspector.introspect("token").await,
            Err(StorageError::Unauthorized(_))
        ));
    }
}
