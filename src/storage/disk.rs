//! Physical storage layout.
//!
//! ```text
//! {root}/
//! ├── users/
//! │   ├── {owner_id}/      owner root
//! │   └── ...
//! └── .staging/            in-flight uploads and removals
//!     └── {uuid}.part
//! ```
//!
//! Staging lives on the same filesystem as the owner roots, so moving a
//! node in or out of it is a single atomic rename.

use std::fmt;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use futures::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::{Result, StorageError};

/// Name of the owner-root container directory.
const USERS_DIR: &str = "users";

/// Name of the staging directory.
const STAGING_DIR: &str = ".staging";

/// Byte-level storage under a root directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
    users_root: PathBuf,
    staging: PathBuf,
}

impl DiskStore {
    /// Open a store at `root`, creating the layout if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let users_root = root.join(USERS_DIR);
        let staging = root.join(STAGING_DIR);
        fs::create_dir_all(&users_root)?;
        fs::create_dir_all(&staging)?;

        Ok(Self {
            root,
            users_root,
            staging,
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every owner root.
    pub fn users_root(&self) -> &Path {
        &self.users_root
    }

    /// Fresh, unused staging location.
    pub fn staging_path(&self) -> PathBuf {
        self.staging.join(format!("{}.part", Uuid::new_v4()))
    }

    /// Delete everything left in staging. Returns the number of entries removed.
    pub fn clear_staging(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.staging)? {
            let path = entry?.path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Failed to remove staged entry {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }

    /// Names of the directories under the users root.
    pub fn owner_dirs(&self) -> Result<Vec<String>> {
        let mut owners = Vec::new();
        for entry in fs::read_dir(&self.users_root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    owners.push(name.to_string());
                }
            }
        }
        owners.sort();
        Ok(owners)
    }

    /// Metadata of `path` without following symlinks; `None` if absent.
    pub async fn inspect(path: &Path) -> Result<Option<Metadata>> {
        match tokio::fs::symlink_metadata(path).await {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Stream bytes into a new file at `dest`.
    ///
    /// Returns the byte count, or `None` as soon as more than `limit` bytes
    /// arrive. A stream error fails with `Validation`. Either way the
    /// partial file is left for the caller to discard.
    pub async fn write_stream<S, B, E>(dest: &Path, stream: S, limit: u64) -> Result<Option<u64>>
    where
        S: Stream<Item = std::result::Result<B, E>> + Send,
        B: AsRef<[u8]> + Send,
        E: fmt::Display + Send,
    {
        futures::pin_mut!(stream);
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| StorageError::Validation(format!("upload interrupted: {e}")))?;
            let bytes = chunk.as_ref();
            written += bytes.len() as u64;
            if written > limit {
                return Ok(None);
            }
            file.write_all(bytes).await?;
        }

        file.sync_all().await?;
        Ok(Some(written))
    }

    /// Remove a file or a whole directory tree.
    pub async fn remove_tree(path: &Path) -> Result<()> {
        let meta = match Self::inspect(path).await? {
            Some(meta) => meta,
            None => return Ok(()),
        };
        if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    /// Whether a directory has no entries.
    pub async fn is_empty_dir(path: &Path) -> Result<bool> {
        let mut entries = tokio::fs::read_dir(path).await?;
        Ok(entries.next_entry().await?.is_none())
    }

    /// Total size of the regular files under `path`. Symlinks are not followed.
    pub fn tree_size(path: &Path) -> Result<u64> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if is_missing(&e) => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        if meta.is_file() {
            return Ok(meta.len());
        }
        if !meta.is_dir() {
            return Ok(0);
        }

        let mut total = 0;
        for entry in fs::read_dir(path)? {
            total += Self::tree_size(&entry?.path())?;
        }
        Ok(total)
    }

    /// [`Self::tree_size`] on the blocking pool.
    pub async fn tree_size_async(path: PathBuf) -> Result<u64> {
        tokio::task::spawn_blocking(move || Self::tree_size(&path))
            .await
            .map_err(|e| StorageError::Internal(format!("size task failed: {e}")))?
    }
}

/// Absent, or a file stands where a parent directory was expected.
fn is_missing(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}
