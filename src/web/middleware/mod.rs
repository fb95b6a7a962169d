//! Middleware for Web API.

pub mod auth;
pub mod cors;
pub mod security;
pub mod trace;

pub use auth::{Authenticated, SystemContext};
pub use cors::create_cors_layer;
pub use security::security_headers;
pub use trace::{trace_id, trace_id_of};
