//! Quota record repositories.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{QuotaRecord, QuotaRepository, SystemStorageStatus};
use crate::db::DbPool;
use crate::{Result, StorageError};

/// Row shape of `quota_records`.
#[derive(Debug, sqlx::FromRow)]
struct QuotaRow {
    owner_id: String,
    allotted_bytes: i64,
    used_bytes: i64,
}

impl From<QuotaRow> for QuotaRecord {
    fn from(row: QuotaRow) -> Self {
        Self {
            owner_id: row.owner_id,
            allotted_bytes: row.allotted_bytes.max(0) as u64,
            used_bytes: row.used_bytes.max(0) as u64,
        }
    }
}

/// Convert a byte count for binding; SQLite integers are signed.
fn to_sql_bytes(bytes: u64) -> Result<i64> {
    i64::try_from(bytes)
        .map_err(|_| StorageError::Validation(format!("byte count {bytes} is out of range")))
}

/// Quota repository backed by the SQLite `quota_records` table.
///
/// Conditional updates run as single statements, so they are atomic even
/// across processes sharing the database file.
#[derive(Debug, Clone)]
pub struct SqliteQuotaRepository {
    pool: DbPool,
}

impl SqliteQuotaRepository {
    /// Create a new repository over the given pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaRepository for SqliteQuotaRepository {
    async fn get(&self, owner_id: &str) -> Result<Option<QuotaRecord>> {
        let row = sqlx::query_as::<_, QuotaRow>(
            "SELECT owner_id, allotted_bytes, used_bytes FROM quota_records WHERE owner_id = ?",
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(QuotaRecord::from))
    }

    async fn create_if_absent(&self, owner_id: &str, allotted_bytes: u64) -> Result<QuotaRecord> {
        sqlx::query(
            "INSERT INTO quota_records (owner_id, allotted_bytes, used_bytes) VALUES (?, ?, 0)
             ON CONFLICT(owner_id) DO NOTHING",
        )
        .bind(owner_id)
        .bind(to_sql_bytes(allotted_bytes)?)
        .execute(&self.pool)
        .await?;

        self.get(owner_id)
            .await?
            .ok_or_else(|| StorageError::Internal(format!("quota record for {owner_id} vanished")))
    }

    async fn try_increase(&self, owner_id: &str, delta: u64) -> Result<Option<QuotaRecord>> {
        let row = sqlx::query_as::<_, QuotaRow>(
            "UPDATE quota_records
             SET used_bytes = used_bytes + ?1, updated_at = datetime('now')
             WHERE owner_id = ?2 AND used_bytes + ?1 <= allotted_bytes
             RETURNING owner_id, allotted_bytes, used_bytes",
        )
        .bind(to_sql_bytes(delta)?)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(QuotaRecord::from))
    }

    async fn decrease(&self, owner_id: &str, delta: u64) -> Result<QuotaRecord> {
        let row = sqlx::query_as::<_, QuotaRow>(
            "UPDATE quota_records
             SET used_bytes = MAX(used_bytes - ?1, 0), updated_at = datetime('now')
             WHERE owner_id = ?2
             RETURNING owner_id, allotted_bytes, used_bytes",
        )
        .bind(to_sql_bytes(delta)?)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(QuotaRecord::from)
            .ok_or_else(|| StorageError::NotFound(format!("quota record for {owner_id}")))
    }

    async fn set_usage(&self, owner_id: &str, used_bytes: u64) -> Result<QuotaRecord> {
        let row = sqlx::query_as::<_, QuotaRow>(
            "UPDATE quota_records
             SET allotted_bytes = MAX(allotted_bytes, ?1), used_bytes = ?1,
                 updated_at = datetime('now')
             WHERE owner_id = ?2
             RETURNING owner_id, allotted_bytes, used_bytes",
        )
        .bind(to_sql_bytes(used_bytes)?)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(QuotaRecord::from)
            .ok_or_else(|| StorageError::NotFound(format!("quota record for {owner_id}")))
    }

    async fn set_allotment(&self, owner_id: &str, allotted_bytes: u64) -> Result<QuotaRecord> {
        let row = sqlx::query_as::<_, QuotaRow>(
            "UPDATE quota_records
             SET allotted_bytes = ?1, updated_at = datetime('now')
             WHERE owner_id = ?2 AND used_bytes <= ?1
             RETURNING owner_id, allotted_bytes, used_bytes",
        )
        .bind(to_sql_bytes(allotted_bytes)?)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into()),
            None => match self.get(owner_id).await? {
                Some(current) => Err(StorageError::Conflict(format!(
                    "allotment of {allotted_bytes} bytes is below the {} bytes in use",
                    current.used_bytes
                ))),
                None => Err(StorageError::NotFound(format!("quota record for {owner_id}"))),
            },
        }
    }

    async fn totals(&self) -> Result<SystemStorageStatus> {
        let (capacity, used, count): (i64, i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(allotted_bytes), 0), COALESCE(SUM(used_bytes), 0), COUNT(*)
             FROM quota_records",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(SystemStorageStatus {
            total_capacity_bytes: capacity.max(0) as u64,
            total_used_bytes: used.max(0) as u64,
            user_count: count.max(0) as u64,
        })
    }

    async fn owners(&self) -> Result<Vec<String>> {
        let owners = sqlx::query_scalar("SELECT owner_id FROM quota_records ORDER BY owner_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(owners)
    }
}

/// In-memory quota repository for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryQuotaRepository {
    records: Mutex<HashMap<String, QuotaRecord>>,
}

impl MemoryQuotaRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<T>(
        &self,
        owner_id: &str,
        f: impl FnOnce(&mut QuotaRecord) -> Result<T>,
    ) -> Result<T> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let record = records
            .get_mut(owner_id)
            .ok_or_else(|| StorageError::NotFound(format!("quota record for {owner_id}")))?;
        f(record)
    }
}

#[async_trait]
impl QuotaRepository for MemoryQuotaRepository {
    async fn get(&self, owner_id: &str) -> Result<Option<QuotaRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(owner_id).cloned())
    }

    async fn create_if_absent(&self, owner_id: &str, allotted_bytes: u64) -> Result<QuotaRecord> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .entry(owner_id.to_string())
            .or_insert_with(|| QuotaRecord::new(owner_id, allotted_bytes))
            .clone())
    }

    async fn try_increase(&self, owner_id: &str, delta: u64) -> Result<Option<QuotaRecord>> {
        self.with_record(owner_id, |record| {
            if record.would_exceed(delta) {
                return Ok(None);
            }
            record.used_bytes += delta;
            Ok(Some(record.clone()))
        })
    }

    async fn decrease(&self, owner_id: &str, delta: u64) -> Result<QuotaRecord> {
        self.with_record(owner_id, |record| {
            record.used_bytes = record.used_bytes.saturating_sub(delta);
            Ok(record.clone())
        })
    }

    async fn set_usage(&self, owner_id: &str, used_bytes: u64) -> Result<QuotaRecord> {
        self.with_record(owner_id, |record| {
            record.allotted_bytes = record.allotted_bytes.max(used_bytes);
            record.used_bytes = used_bytes;
            Ok(record.clone())
        })
    }

    async fn set_allotment(&self, owner_id: &str, allotted_bytes: u64) -> Result<QuotaRecord> {
        self.with_record(owner_id, |record| {
            if record.used_bytes > allotted_bytes {
                return Err(StorageError::Conflict(format!(
                    "allotment of {allotted_bytes} bytes is below the {} bytes in use",
                    record.used_bytes
                )));
            }
            record.allotted_bytes = allotted_bytes;
            Ok(record.clone())
        })
    }

    async fn totals(&self) -> Result<SystemStorageStatus> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .values()
            .fold(SystemStorageStatus::default(), |mut acc, record| {
                acc.total_capacity_bytes += record.allotted_bytes;
                acc.total_used_bytes += record.used_bytes;
                acc.user_count += 1;
                acc
            }))
    }

    async fn owners(&self) -> Result<Vec<String>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut owners: Vec<String> = records.keys().cloned().collect();
        owners.sort();
        Ok(owners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    async fn sqlite_repo() -> (Database, SqliteQuotaRepository) {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SqliteQuotaRepository::new(db.pool().clone());
        (db, repo)
    }

    /// Behaviour every backend must share.
    async fn exercise_repository(repo: &dyn QuotaRepository) {
        assert!(repo.get("alice").await.unwrap().is_none());

        let created = repo.create_if_absent("alice", 1000).await.unwrap();
        assert_eq!(created, QuotaRecord::new("alice", 1000));

        // A second create keeps the existing record.
        let again = repo.create_if_absent("alice", 5).await.unwrap();
        assert_eq!(again.allotted_bytes, 1000);

        let after = repo.try_increase("alice", 400).await.unwrap().unwrap();
        assert_eq!(after.used_bytes, 400);

        let after = repo.try_increase("alice", 600).await.unwrap().unwrap();
        assert_eq!(after.used_bytes, 1000);

        assert!(repo.try_increase("alice", 1).await.unwrap().is_none());
        assert_eq!(repo.get("alice").await.unwrap().unwrap().used_bytes, 1000);

        let after = repo.decrease("alice", 300).await.unwrap();
        assert_eq!(after.used_bytes, 700);

        let after = repo.decrease("alice", 5000).await.unwrap();
        assert_eq!(after.used_bytes, 0);

        assert!(matches!(
            repo.decrease("nobody", 1).await,
            Err(StorageError::NotFound(_))
        ));

        let measured = repo.set_usage("alice", 1500).await.unwrap();
        assert_eq!(measured.used_bytes, 1500);
        assert_eq!(measured.allotted_bytes, 1500);

        assert!(matches!(
            repo.set_allotment("alice", 1000).await,
            Err(StorageError::Conflict(_))
        ));
        let raised = repo.set_allotment("alice", 4000).await.unwrap();
        assert_eq!(raised.allotted_bytes, 4000);

        repo.create_if_absent("bob", 2000).await.unwrap();
        repo.try_increase("bob", 100).await.unwrap();

        let totals = repo.totals().await.unwrap();
        assert_eq!(totals.total_capacity_bytes, 6000);
        assert_eq!(totals.total_used_bytes, 1600);
        assert_eq!(totals.user_count, 2);

        assert_eq!(repo.owners().await.unwrap(), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_memory_repository() {
        let repo = MemoryQuotaRepository::new();
        exercise_repository(&repo).await;
    }

    #[tokio::test]
    async fn test_sqlite_repository() {
        let (_db, repo) = sqlite_repo().await;
        exercise_repository(&repo).await;
    }

    #[tokio::test]
    async fn test_sqlite_try_increase_missing_owner_is_none() {
        let (_db, repo) = sqlite_repo().await;
        assert!(repo.try_increase("ghost", 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_totals_empty() {
        let (_db, repo) = sqlite_repo().await;
        assert_eq!(repo.totals().await.unwrap(), SystemStorageStatus::default());
    }

    #[test]
    fn test_to_sql_bytes_range() {
        assert_eq!(to_sql_bytes(42).unwrap(), 42);
        assert!(to_sql_bytes(u64::MAX).is_err());
    }
}
