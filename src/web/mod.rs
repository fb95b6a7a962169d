//! Web API module for fast-storage.
//!
//! This module exposes the storage operations over HTTP: every response is
//! a JSON envelope except file downloads, which stream the raw bytes.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod router;
pub mod server;

pub use error::{ApiError, ErrorCode};
pub use handlers::AppState;
pub use router::create_router;
pub use server::WebServer;
