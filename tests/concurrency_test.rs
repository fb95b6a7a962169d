//! Concurrency tests for fast-storage.
//!
//! These tests verify that concurrent uploads for the same user can never
//! push usage past the allotment, and that the ledger matches the bytes on
//! disk once everything settles.

use std::sync::Arc;

use fast_storage::auth::{RequestContext, TraceId, UserIdentity};
use fast_storage::config::StorageConfig;
use fast_storage::quota::{QuotaLedger, SqliteQuotaRepository};
use fast_storage::storage::StorageService;
use fast_storage::{Database, StorageError};
use tempfile::TempDir;

const ALLOTMENT: u64 = 1000;

/// Setup a storage service over a file-backed SQLite ledger.
async fn setup_service(temp_dir: &TempDir) -> Arc<StorageService> {
    let url = format!(
        "sqlite://{}?mode=rwc",
        temp_dir.path().join("quota.db").display()
    );
    let db = Database::open(&url).await.unwrap();
    let repo = Arc::new(SqliteQuotaRepository::new(db.pool().clone()));
    let ledger = QuotaLedger::new(repo, ALLOTMENT);

    let config = StorageConfig {
        root_path: temp_dir.path().join("storage").to_string_lossy().into_owned(),
        default_quota_bytes: ALLOTMENT,
        ..StorageConfig::default()
    };
    Arc::new(StorageService::new(&config, ledger).unwrap())
}

fn ctx(user_id: &str) -> RequestContext {
    RequestContext::authenticated(
        UserIdentity {
            user_id: user_id.to_string(),
            username: user_id.to_string(),
            roles: vec![],
        },
        TraceId::generate(),
    )
}

fn chunks(size: usize) -> impl futures::Stream<Item = Result<Vec<u8>, std::io::Error>> + Send {
    futures::stream::iter(
        vec![7u8; size]
            .chunks(128)
            .map(|c| Ok(c.to_vec()))
            .collect::<Vec<_>>(),
    )
}

/// Two uploads of half the allotment plus one byte: exactly one wins.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_uploads_over_half_allotment() {
    let temp_dir = TempDir::new().unwrap();
    let service = setup_service(&temp_dir).await;
    let size = (ALLOTMENT / 2 + 1) as usize;

    let mut handles = Vec::new();
    for i in 0..2 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let alice = ctx("alice");
            service
                .upload_file(&alice, &format!("/file-{i}.bin"), Some(size as u64), chunks(size))
                .await
        }));
    }

    let mut successes = 0;
    let mut quota_failures = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(StorageError::QuotaExceeded { .. }) => quota_failures += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(quota_failures, 1);

    let status = service.user_storage_status(&ctx("alice")).await.unwrap();
    assert_eq!(status.used_bytes, size as u64);
    assert!(status.used_bytes <= status.allotted_bytes);
}

/// Many small concurrent uploads: usage never exceeds the allotment and
/// always equals the stored bytes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_uploads() {
    let temp_dir = TempDir::new().unwrap();
    let service = setup_service(&temp_dir).await;

    const NUM_UPLOADS: usize = 16;
    const SIZE: usize = 150;

    let mut handles = Vec::new();
    for i in 0..NUM_UPLOADS {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let alice = ctx("alice");
            service
                .upload_file(&alice, &format!("/batch/{i:02}.bin"), Some(SIZE as u64), chunks(SIZE))
                .await
        }));
    }

    let mut successes = 0u64;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(StorageError::QuotaExceeded { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(successes, ALLOTMENT / SIZE as u64);

    let alice = ctx("alice");
    let status = service.user_storage_status(&alice).await.unwrap();
    assert_eq!(status.used_bytes, successes * SIZE as u64);

    let listed: u64 = service
        .list_directory(&alice, "/batch")
        .await
        .unwrap()
        .iter()
        .map(|n| n.size_bytes)
        .sum();
    assert_eq!(listed, status.used_bytes);
}

/// Concurrent uploads by different users do not affect each other.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_users_isolated() {
    let temp_dir = TempDir::new().unwrap();
    let service = setup_service(&temp_dir).await;

    let mut handles = Vec::new();
    for user in ["alice", "bob", "carol"] {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let owner = ctx(user);
            service
                .upload_file(&owner, "/big.bin", Some(900), chunks(900))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let status = service
        .system_storage_status(&RequestContext::anonymous(TraceId::generate()))
        .await
        .unwrap();
    assert_eq!(status.user_count, 3);
    assert_eq!(status.total_used_bytes, 2700);
}
