//! Configuration module for fast-storage.

use serde::Deserialize;
use std::path::Path;

use crate::{Result, StorageError};

/// Web API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    /// Host address to bind.
    #[serde(default = "default_web_host")]
    pub host: String,
    /// Port number for the Web API.
    #[serde(default = "default_web_port")]
    pub port: u16,
    /// CORS allowed origins.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Prefix mounted in front of the storage routes (e.g. "/api").
    #[serde(default)]
    pub base_path: String,
}

fn default_web_host() -> String {
    "0.0.0.0".to_string()
}

fn default_web_port() -> u16 {
    8080
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
            cors_origins: vec![],
            base_path: String::new(),
        }
    }
}

/// What to do when an upload targets an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    /// Replace the file, charging only the size difference.
    #[default]
    Replace,
    /// Refuse the upload with a conflict.
    Reject,
}

/// File storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding every owner root and the upload staging area.
    #[serde(default = "default_root_path")]
    pub root_path: String,
    /// Allotment given to an owner the first time they are seen.
    #[serde(default = "default_quota_bytes")]
    pub default_quota_bytes: u64,
    /// Maximum upload size in megabytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_mb: u64,
    /// Upload overwrite behaviour.
    #[serde(default)]
    pub overwrite_policy: OverwritePolicy,
    /// Chunk size in bytes used when streaming downloads.
    #[serde(default = "default_chunk_size")]
    pub upload_chunk_size: usize,
}

fn default_root_path() -> String {
    "data/storage".to_string()
}

fn default_quota_bytes() -> u64 {
    1024 * 1024 * 1024 // 1GB
}

fn default_max_upload_size() -> u64 {
    100
}

fn default_chunk_size() -> usize {
    64 * 1024
}

impl StorageConfig {
    /// Maximum upload size in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_size_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_path: default_root_path(),
            default_quota_bytes: default_quota_bytes(),
            max_upload_size_mb: default_max_upload_size(),
            overwrite_policy: OverwritePolicy::default(),
            upload_chunk_size: default_chunk_size(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL for the quota ledger.
    #[serde(default = "default_db_url")]
    pub url: String,
}

fn default_db_url() -> String {
    "sqlite://data/fast-storage.db?mode=rwc".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
        }
    }
}

/// How bearer tokens are validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMode {
    /// Ask the identity provider's token introspection endpoint.
    #[default]
    Introspection,
    /// Verify HS256 tokens locally with a shared secret.
    Jwt,
}

/// Identity provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Validation mode.
    #[serde(default)]
    pub mode: IdentityMode,
    /// Token introspection endpoint (introspection mode).
    #[serde(default)]
    pub introspection_url: String,
    /// Client ID presented to the introspection endpoint.
    #[serde(default)]
    pub client_id: String,
    /// Client secret presented to the introspection endpoint.
    #[serde(default)]
    pub client_secret: String,
    /// Introspection request timeout in seconds.
    #[serde(default = "default_identity_timeout")]
    pub timeout_secs: u64,
    /// Shared HS256 secret (jwt mode).
    #[serde(default)]
    pub jwt_secret: String,
    /// Whether the aggregate system status also needs a valid identity.
    #[serde(default)]
    pub system_status_requires_identity: bool,
}

fn default_identity_timeout() -> u64 {
    5
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            mode: IdentityMode::default(),
            introspection_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            timeout_secs: default_identity_timeout(),
            jwt_secret: String::new(),
            system_status_requires_identity: false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/fast-storage.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Web API configuration.
    #[serde(default)]
    pub web: WebConfig,
    /// File storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Identity provider configuration.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(StorageError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| StorageError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FAST_STORAGE_JWT_SECRET`: Override the HS256 secret
    /// - `FAST_STORAGE_INTROSPECTION_CLIENT_SECRET`: Override the introspection client secret
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("FAST_STORAGE_JWT_SECRET") {
            if !secret.is_empty() {
                self.identity.jwt_secret = secret;
            }
        }
        if let Ok(secret) = std::env::var("FAST_STORAGE_INTROSPECTION_CLIENT_SECRET") {
            if !secret.is_empty() {
                self.identity.client_secret = secret;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - jwt mode is selected without a secret
    /// - introspection mode is selected without a valid endpoint URL or client ID
    /// - the upload chunk size is zero
    pub fn validate(&self) -> Result<()> {
        match self.identity.mode {
            IdentityMode::Jwt => {
                if self.identity.jwt_secret.is_empty() {
                    return Err(StorageError::Config(
                        "identity mode is jwt but jwt_secret is not set. \
                         Set it in config.toml or via FAST_STORAGE_JWT_SECRET."
                            .to_string(),
                    ));
                }
            }
            IdentityMode::Introspection => {
                url::Url::parse(&self.identity.introspection_url).map_err(|e| {
                    StorageError::Config(format!("invalid introspection_url: {e}"))
                })?;
                if self.identity.client_id.is_empty() {
                    return Err(StorageError::Config(
                        "identity mode is introspection but client_id is not set".to_string(),
                    ));
                }
            }
        }

        if !self.web.base_path.is_empty()
            && (!self.web.base_path.starts_with('/') || self.web.base_path.ends_with('/'))
        {
            return Err(StorageError::Config(format!(
                "web.base_path must start with '/' and not end with '/': {}",
                self.web.base_path
            )));
        }

        if self.storage.upload_chunk_size == 0 {
            return Err(StorageError::Config(
                "storage.upload_chunk_size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.web.host, "0.0.0.0");
        assert_eq!(config.web.port, 8080);
        assert!(config.web.cors_origins.is_empty());
        assert!(config.web.base_path.is_empty());

        assert_eq!(config.storage.root_path, "data/storage");
        assert_eq!(config.storage.default_quota_bytes, 1024 * 1024 * 1024);
        assert_eq!(config.storage.max_upload_size_mb, 100);
        assert_eq!(config.storage.overwrite_policy, OverwritePolicy::Replace);
        assert_eq!(config.storage.upload_chunk_size, 64 * 1024);

        assert_eq!(config.database.url, "sqlite://data/fast-storage.db?mode=rwc");

        assert_eq!(config.identity.mode, IdentityMode::Introspection);
        assert_eq!(config.identity.timeout_secs, 5);
        assert!(!config.identity.system_status_requires_identity);

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/fast-storage.log");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[web]
host = "127.0.0.1"
port = 3000
cors_origins = ["http://localhost:4200"]
base_path = "/api"

[storage]
root_path = "/srv/storage"
default_quota_bytes = 1000
max_upload_size_mb = 5
overwrite_policy = "reject"
upload_chunk_size = 4096

[database]
url = "sqlite::memory:"

[identity]
mode = "jwt"
jwt_secret = "secret"
system_status_requires_identity = true

[logging]
level = "debug"
file = "custom/app.log"
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.web.host, "127.0.0.1");
        assert_eq!(config.web.port, 3000);
        assert_eq!(config.web.cors_origins, vec!["http://localhost:4200"]);
        assert_eq!(config.web.base_path, "/api");

        assert_eq!(config.storage.root_path, "/srv/storage");
        assert_eq!(config.storage.default_quota_bytes, 1000);
        assert_eq!(config.storage.max_upload_bytes(), 5 * 1024 * 1024);
        assert_eq!(config.storage.overwrite_policy, OverwritePolicy::Reject);
        assert_eq!(config.storage.upload_chunk_size, 4096);

        assert_eq!(config.database.url, "sqlite::memory:");

        assert_eq!(config.identity.mode, IdentityMode::Jwt);
        assert_eq!(config.identity.jwt_secret, "secret");
        assert!(config.identity.system_status_requires_identity);

        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_parse_partial_config_uses_defaults() {
        let config = Config::parse("[web]\nport = 9000\n").unwrap();
        assert_eq!(config.web.port, 9000);
        assert_eq!(config.web.host, "0.0.0.0");
        assert_eq!(config.storage.root_path, "data/storage");
    }

    #[test]
    fn test_parse_invalid_config() {
        let result = Config::parse("[storage]\noverwrite_policy = \"sometimes\"\n");
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    #[test]
    fn test_validate_jwt_requires_secret() {
        let mut config = Config::default();
        config.identity.mode = IdentityMode::Jwt;
        assert!(config.validate().is_err());

        config.identity.jwt_secret = "secret".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_introspection_requires_url_and_client() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.identity.introspection_url =
            "http://localhost:8180/realms/fast/protocol/openid-connect/token/introspect"
                .to_string();
        assert!(config.validate().is_err());

        config.identity.client_id = "fast-storage".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_base_path_shape() {
        let mut config = Config::default();
        config.identity.mode = IdentityMode::Jwt;
        config.identity.jwt_secret = "secret".to_string();

        config.web.base_path = "api".to_string();
        assert!(config.validate().is_err());
        config.web.base_path = "/api/".to_string();
        assert!(config.validate().is_err());
        config.web.base_path = "/api".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let mut config = Config::default();
        config.identity.mode = IdentityMode::Jwt;
        config.identity.jwt_secret = "secret".to_string();
        config.storage.upload_chunk_size = 0;
        assert!(config.validate().is_err());
    }
}
