//! Per-user hierarchical file storage.
//!
//! This module provides:
//! - Traversal-safe path normalization and owner-scoped resolution
//! - The on-disk layout (owner roots and upload staging)
//! - The storage operations, composed with the quota ledger

mod disk;
mod node;
mod path;
mod service;

pub use disk::DiskStore;
pub use node::{NodeKind, StorageNode};
pub use path::{LogicalPath, PathResolver, MAX_PATH_LENGTH, MAX_SEGMENT_LENGTH};
pub use service::{FileDownload, ReconcileReport, RemoveOutcome, StorageService, UploadOutcome};
