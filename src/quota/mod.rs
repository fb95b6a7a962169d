//! Quota accounting for fast-storage.
//!
//! This module provides:
//! - Per-owner quota records (allotted and used bytes)
//! - A repository interface with SQLite and in-memory backends
//! - The ledger that serializes reserve/release per owner

mod ledger;
mod repository;

use async_trait::async_trait;
use serde::Serialize;

pub use ledger::QuotaLedger;
pub use repository::{MemoryQuotaRepository, SqliteQuotaRepository};

use crate::Result;

/// Byte budget and consumption of a single owner.
///
/// Invariant: `used_bytes <= allotted_bytes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaRecord {
    /// Owner (user) ID.
    pub owner_id: String,
    /// Total bytes the owner may store.
    pub allotted_bytes: u64,
    /// Bytes currently stored.
    pub used_bytes: u64,
}

impl QuotaRecord {
    /// Create a fresh record with nothing used.
    pub fn new(owner_id: impl Into<String>, allotted_bytes: u64) -> Self {
        Self {
            owner_id: owner_id.into(),
            allotted_bytes,
            used_bytes: 0,
        }
    }

    /// Bytes still available.
    pub fn available_bytes(&self) -> u64 {
        self.allotted_bytes.saturating_sub(self.used_bytes)
    }

    /// Usage percentage (0.0 - 100.0).
    pub fn usage_percent(&self) -> f64 {
        if self.allotted_bytes == 0 {
            0.0
        } else {
            (self.used_bytes as f64 / self.allotted_bytes as f64) * 100.0
        }
    }

    /// Check if adding the given number of bytes would exceed the allotment.
    pub fn would_exceed(&self, additional_bytes: u64) -> bool {
        self.used_bytes
            .checked_add(additional_bytes)
            .map_or(true, |total| total > self.allotted_bytes)
    }
}

/// Aggregate across all owners, computed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SystemStorageStatus {
    /// Sum of every owner's allotment.
    pub total_capacity_bytes: u64,
    /// Sum of every owner's used bytes.
    pub total_used_bytes: u64,
    /// Number of owners with a quota record.
    pub user_count: u64,
}

/// Persistence interface for quota records.
///
/// `try_increase` and `decrease` must each be atomic with respect to other
/// calls for the same owner.
#[async_trait]
pub trait QuotaRepository: Send + Sync {
    /// Get an owner's record.
    async fn get(&self, owner_id: &str) -> Result<Option<QuotaRecord>>;

    /// Create a record with the given allotment unless one already exists.
    async fn create_if_absent(&self, owner_id: &str, allotted_bytes: u64) -> Result<QuotaRecord>;

    /// Add `delta` to used bytes if the result stays within the allotment.
    ///
    /// Returns `None` (and changes nothing) when it would not.
    async fn try_increase(&self, owner_id: &str, delta: u64) -> Result<Option<QuotaRecord>>;

    /// Subtract `delta` from used bytes, flooring at zero.
    async fn decrease(&self, owner_id: &str, delta: u64) -> Result<QuotaRecord>;

    /// Overwrite used bytes with a measured value.
    ///
    /// The allotment is raised to match if the measurement exceeds it.
    async fn set_usage(&self, owner_id: &str, used_bytes: u64) -> Result<QuotaRecord>;

    /// Change an owner's allotment. Fails with `Conflict` below current usage.
    async fn set_allotment(&self, owner_id: &str, allotted_bytes: u64) -> Result<QuotaRecord>;

    /// Aggregate totals over all records.
    async fn totals(&self) -> Result<SystemStorageStatus>;

    /// IDs of every owner with a record.
    async fn owners(&self) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_and_percent() {
        let record = QuotaRecord {
            owner_id: "u1".to_string(),
            allotted_bytes: 1000,
            used_bytes: 250,
        };
        assert_eq!(record.available_bytes(), 750);
        assert!((record.usage_percent() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_allotment_percent() {
        let record = QuotaRecord::new("u1", 0);
        assert_eq!(record.usage_percent(), 0.0);
        assert_eq!(record.available_bytes(), 0);
    }

    #[test]
    fn test_would_exceed() {
        let record = QuotaRecord {
            owner_id: "u1".to_string(),
            allotted_bytes: 1000,
            used_bytes: 800,
        };
        assert!(!record.would_exceed(200));
        assert!(record.would_exceed(201));
        assert!(record.would_exceed(u64::MAX));
    }
}
