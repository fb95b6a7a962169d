//! Database schema and migrations for fast-storage.
//!
//! Migrations are applied in order when the database is opened; the
//! `schema_version` table records which ones have run.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: quota ledger
    r#"
CREATE TABLE quota_records (
    owner_id        TEXT PRIMARY KEY NOT NULL,
    allotted_bytes  INTEGER NOT NULL CHECK (allotted_bytes >= 0),
    used_bytes      INTEGER NOT NULL DEFAULT 0 CHECK (used_bytes >= 0),
    created_at      TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
    CHECK (used_bytes <= allotted_bytes)
);
"#,
];
