//! Web server for fast-storage.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;

use crate::auth::{provider_from_config, AuthenticationGate};
use crate::config::{Config, WebConfig};
use crate::quota::{QuotaLedger, SqliteQuotaRepository};
use crate::storage::StorageService;
use crate::{Database, Result, StorageError};

use super::handlers::AppState;
use super::router::create_router;

/// Web server for the API.
pub struct WebServer {
    /// Server address.
    addr: SocketAddr,
    /// Application state.
    app_state: Arc<AppState>,
    /// Web configuration.
    web_config: WebConfig,
}

impl WebServer {
    /// Create a new web server over prepared state.
    pub fn new(config: &WebConfig, app_state: Arc<AppState>) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| {
                StorageError::Config(format!(
                    "invalid web address {}:{}: {e}",
                    config.host, config.port
                ))
            })?;

        Ok(Self {
            addr,
            app_state,
            web_config: config.clone(),
        })
    }

    /// Wire the database, quota ledger, storage and identity provider
    /// from configuration, then reconcile storage with the ledger.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let db = Database::open(&config.database.url).await?;
        let repo = Arc::new(SqliteQuotaRepository::new(db.pool().clone()));
        let ledger = QuotaLedger::new(repo, config.storage.default_quota_bytes);

        let storage = StorageService::new(&config.storage, ledger)?;
        storage.reconcile().await?;
        tracing::info!("File storage initialized at: {}", config.storage.root_path);

        let gate = AuthenticationGate::new(provider_from_config(&config.identity)?);
        let app_state = AppState::new(
            storage,
            gate,
            config.identity.system_status_requires_identity,
        );

        Self::new(&config.web, Arc::new(app_state))
    }

    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the application state.
    pub fn app_state(&self) -> &Arc<AppState> {
        &self.app_state
    }

    fn into_router(self) -> Router {
        create_router(self.app_state, &self.web_config).layer(CompressionLayer::new())
    }

    /// Run the web server.
    pub async fn run(self) -> std::result::Result<(), std::io::Error> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!("Web server listening on http://{}", listener.local_addr()?);

        axum::serve(listener, self.into_router()).await
    }

    /// Run the server and return the actual bound address.
    ///
    /// This is useful for testing when binding to port 0.
    pub async fn run_with_addr(self) -> std::result::Result<SocketAddr, std::io::Error> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Web server listening on http://{}", local_addr);

        let router = self.into_router();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("Web server error: {}", e);
            }
        });

        Ok(local_addr)
    }
}
