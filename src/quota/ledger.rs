//! Per-owner quota ledger.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{QuotaRecord, QuotaRepository, SystemStorageStatus};
use crate::locks::KeyedLocks;
use crate::{Result, StorageError};

/// Serializes quota changes per owner and creates records on first use.
///
/// Different owners never contend; calls for the same owner run one at a
/// time, so a reservation is either fully applied or not applied at all.
#[derive(Clone)]
pub struct QuotaLedger {
    repo: Arc<dyn QuotaRepository>,
    locks: Arc<KeyedLocks>,
    default_allotment: u64,
}

impl QuotaLedger {
    /// Create a ledger over a repository. New owners get `default_allotment` bytes.
    pub fn new(repo: Arc<dyn QuotaRepository>, default_allotment: u64) -> Self {
        Self {
            repo,
            locks: Arc::new(KeyedLocks::new()),
            default_allotment,
        }
    }

    /// Allotment given to owners seen for the first time.
    pub fn default_allotment(&self) -> u64 {
        self.default_allotment
    }

    async fn ensure(&self, owner_id: &str) -> Result<QuotaRecord> {
        match self.repo.get(owner_id).await? {
            Some(record) => Ok(record),
            None => {
                debug!(user_id = %owner_id, allotted = self.default_allotment, "Creating quota record");
                self.repo
                    .create_if_absent(owner_id, self.default_allotment)
                    .await
            }
        }
    }

    /// Current record for an owner, creating it with the default allotment.
    pub async fn status_for(&self, owner_id: &str) -> Result<QuotaRecord> {
        let _guard = self.locks.lock(owner_id).await;
        self.ensure(owner_id).await
    }

    /// Aggregate over every owner.
    pub async fn system_status(&self) -> Result<SystemStorageStatus> {
        self.repo.totals().await
    }

    /// Reserve `delta` bytes for an owner.
    ///
    /// Fails with `QuotaExceeded` (and changes nothing) if the reservation
    /// would take usage past the allotment. A zero delta always succeeds.
    pub async fn reserve(&self, owner_id: &str, delta: u64) -> Result<QuotaRecord> {
        let _guard = self.locks.lock(owner_id).await;
        let current = self.ensure(owner_id).await?;
        if delta == 0 {
            return Ok(current);
        }

        match self.repo.try_increase(owner_id, delta).await? {
            Some(record) => {
                debug!(user_id = %owner_id, delta, used = record.used_bytes, "Reserved quota");
                Ok(record)
            }
            None => {
                let available = self
                    .repo
                    .get(owner_id)
                    .await?
                    .map_or(0, |r| r.available_bytes());
                Err(StorageError::QuotaExceeded {
                    requested: delta,
                    available,
                })
            }
        }
    }

    /// Return `delta` bytes to an owner. Usage is floored at zero.
    pub async fn release(&self, owner_id: &str, delta: u64) -> Result<QuotaRecord> {
        let _guard = self.locks.lock(owner_id).await;
        let current = self.ensure(owner_id).await?;
        if delta == 0 {
            return Ok(current);
        }
        if delta > current.used_bytes {
            warn!(
                user_id = %owner_id,
                delta,
                used = current.used_bytes,
                "Release exceeds recorded usage, flooring at zero"
            );
        }

        let record = self.repo.decrease(owner_id, delta).await?;
        debug!(user_id = %owner_id, delta, used = record.used_bytes, "Released quota");
        Ok(record)
    }

    /// Overwrite an owner's usage with a measured value.
    pub async fn set_usage(&self, owner_id: &str, used_bytes: u64) -> Result<QuotaRecord> {
        let _guard = self.locks.lock(owner_id).await;
        let current = self.ensure(owner_id).await?;
        if current.used_bytes != used_bytes {
            warn!(
                user_id = %owner_id,
                recorded = current.used_bytes,
                measured = used_bytes,
                "Correcting recorded usage"
            );
        }
        self.repo.set_usage(owner_id, used_bytes).await
    }

    /// Change an owner's allotment.
    pub async fn set_allotment(&self, owner_id: &str, allotted_bytes: u64) -> Result<QuotaRecord> {
        let _guard = self.locks.lock(owner_id).await;
        self.ensure(owner_id).await?;
        self.repo.set_allotment(owner_id, allotted_bytes).await
    }

    /// IDs of every owner with a record.
    pub async fn owners(&self) -> Result<Vec<String>> {
        self.repo.owners().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::MemoryQuotaRepository;

    fn ledger(allotment: u64) -> QuotaLedger {
        QuotaLedger::new(Arc::new(MemoryQuotaRepository::new()), allotment)
    }

    #[tokio::test]
    async fn test_status_creates_record_lazily() {
        let ledger = ledger(1000);
        assert_eq!(ledger.system_status().await.unwrap().user_count, 0);

        let record = ledger.status_for("alice").await.unwrap();
        assert_eq!(record, QuotaRecord::new("alice", 1000));
        assert_eq!(ledger.system_status().await.unwrap().user_count, 1);
    }

    #[tokio::test]
    async fn test_reserve_within_allotment() {
        let ledger = ledger(1000);
        let record = ledger.reserve("alice", 400).await.unwrap();
        assert_eq!(record.used_bytes, 400);
    }

    #[tokio::test]
    async fn test_reserve_beyond_allotment_changes_nothing() {
        let ledger = ledger(1000);
        ledger.reserve("alice", 900).await.unwrap();

        let err = ledger.reserve("alice", 200).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::QuotaExceeded {
                requested: 200,
                available: 100
            }
        ));
        assert_eq!(ledger.status_for("alice").await.unwrap().used_bytes, 900);
    }

    #[tokio::test]
    async fn test_reserve_zero_is_noop() {
        let ledger = ledger(0);
        let record = ledger.reserve("alice", 0).await.unwrap();
        assert_eq!(record.used_bytes, 0);
    }

    #[tokio::test]
    async fn test_release_floors_at_zero() {
        let ledger = ledger(1000);
        ledger.reserve("alice", 100).await.unwrap();
        let record = ledger.release("alice", 500).await.unwrap();
        assert_eq!(record.used_bytes, 0);
    }

    #[tokio::test]
    async fn test_concurrent_reservations_respect_allotment() {
        let ledger = ledger(1000);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(
                async move { ledger.reserve("alice", 100).await },
            ));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                granted += 1;
            }
        }

        assert_eq!(granted, 10);
        assert_eq!(ledger.status_for("alice").await.unwrap().used_bytes, 1000);
    }

    #[tokio::test]
    async fn test_set_usage_and_allotment() {
        let ledger = ledger(1000);
        let record = ledger.set_usage("alice", 250).await.unwrap();
        assert_eq!(record.used_bytes, 250);

        assert!(matches!(
            ledger.set_allotment("alice", 100).await,
            Err(StorageError::Conflict(_))
        ));
        let record = ledger.set_allotment("alice", 5000).await.unwrap();
        assert_eq!(record.allotted_bytes, 5000);
        assert_eq!(ledger.owners().await.unwrap(), vec!["alice"]);
    }
}
