//! fast-storage - Per-user file storage with quota accounting
//!
//! Each authenticated user owns a private folder tree. Every write is
//! charged against the user's byte allotment before it reaches disk, and
//! every removal gives the bytes back.

pub mod auth;
pub mod config;
pub mod datetime;
pub mod db;
pub mod error;
pub mod locks;
pub mod logging;
pub mod quota;
pub mod storage;
pub mod web;

pub use auth::{
    AuthenticationGate, IdentityProvider, JwtClaims, JwtIdentityProvider, KeycloakIntrospector,
    RequestContext, TraceId, UserIdentity,
};
pub use config::Config;
pub use db::Database;
pub use error::{Result, StorageError};
pub use quota::{
    MemoryQuotaRepository, QuotaLedger, QuotaRecord, QuotaRepository, SqliteQuotaRepository,
    SystemStorageStatus,
};
pub use storage::{LogicalPath, NodeKind, PathResolver, StorageNode, StorageService};
pub use web::WebServer;
