//! API handlers.

pub mod storage;

pub use storage::*;

use crate::auth::AuthenticationGate;
use crate::storage::StorageService;

/// Shared application state.
pub struct AppState {
    /// Storage operations.
    pub storage: StorageService,
    /// Bearer credential validation.
    pub gate: AuthenticationGate,
    /// Whether `/storage/system_storage_status` needs an identity.
    pub system_status_requires_identity: bool,
}

impl AppState {
    /// Create application state.
    pub fn new(
        storage: StorageService,
        gate: AuthenticationGate,
        system_status_requires_identity: bool,
    ) -> Self {
        Self {
            storage,
            gate,
            system_status_requires_identity,
        }
    }
}

/// Health check handler.
pub async fn health_check() -> &'static str {
    "OK"
}
