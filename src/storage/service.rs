//! Storage operations.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use futures::Stream;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use super::disk::DiskStore;
use super::node::{NodeKind, StorageNode};
use super::path::{LogicalPath, PathResolver};
use crate::auth::RequestContext;
use crate::config::{OverwritePolicy, StorageConfig};
use crate::locks::KeyedLocks;
use crate::quota::{QuotaLedger, QuotaRecord, SystemStorageStatus};
use crate::{Result, StorageError};

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub node: StorageNode,
    /// Whether an existing file was overwritten.
    pub replaced: bool,
}

/// Result of a successful removal.
#[derive(Debug, Clone)]
pub struct RemoveOutcome {
    pub path: LogicalPath,
    pub kind: NodeKind,
    /// Bytes returned to the owner's quota.
    pub released_bytes: u64,
}

/// Result of a start-up reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Staged entries discarded.
    pub staged_removed: usize,
    /// Owners whose usage was recomputed.
    pub owners_checked: usize,
}

/// An open file ready to be streamed to the caller.
pub struct FileDownload {
    pub node: StorageNode,
    file: tokio::fs::File,
    chunk_size: usize,
}

impl fmt::Debug for FileDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDownload")
            .field("node", &self.node)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl FileDownload {
    /// Read the whole file into memory.
    pub async fn read_all(mut self) -> Result<Vec<u8>> {
        let mut content = Vec::with_capacity(self.node.size_bytes as usize);
        self.file.read_to_end(&mut content).await?;
        Ok(content)
    }

    /// Stream the file in chunks.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Vec<u8>>> + Send {
        futures::stream::try_unfold(
            (self.file, self.chunk_size),
            |(mut file, chunk_size)| async move {
                let mut buf = vec![0u8; chunk_size];
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    return Ok(None);
                }
                buf.truncate(n);
                Ok(Some((buf, (file, chunk_size))))
            },
        )
    }
}

/// Quota held for an upload that has not committed yet.
///
/// Dropping it (for example when the client disconnects mid-stream)
/// deletes the staged bytes and gives the quota back.
struct PendingUpload {
    ledger: QuotaLedger,
    owner_id: String,
    held: u64,
    staged: Option<PathBuf>,
}

impl PendingUpload {
    /// Undo everything and return `err`.
    async fn abort<T>(mut self, err: StorageError) -> Result<T> {
        if let Some(path) = self.staged.take() {
            if let Err(e) = DiskStore::remove_tree(&path).await {
                warn!("Failed to discard staged upload {}: {}", path.display(), e);
            }
        }
        let held = std::mem::take(&mut self.held);
        if held > 0 {
            if let Err(e) = self.ledger.release(&self.owner_id, held).await {
                error!(user_id = %self.owner_id, held, "Failed to release upload reservation: {}", e);
            }
        }
        Err(err)
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if let Some(path) = self.staged.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to discard staged upload {}: {}", path.display(), e);
                }
            }
        }
        let held = std::mem::take(&mut self.held);
        if held == 0 {
            return;
        }

        let ledger = self.ledger.clone();
        let owner_id = std::mem::take(&mut self.owner_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(user_id = %owner_id, held, "Upload cancelled, releasing reservation");
                handle.spawn(async move {
                    if let Err(e) = ledger.release(&owner_id, held).await {
                        error!(user_id = %owner_id, held, "Failed to release upload reservation: {}", e);
                    }
                });
            }
            Err(_) => {
                error!(user_id = %owner_id, held, "Upload cancelled outside a runtime; usage stays reserved until reconcile");
            }
        }
    }
}

/// Per-user hierarchical storage.
///
/// Composes the path resolver, the quota ledger and the disk store. Quota
/// is reserved before any bytes are written and the per-path lock is only
/// held for the short commit step, never while streaming.
pub struct StorageService {
    resolver: PathResolver,
    disk: DiskStore,
    ledger: QuotaLedger,
    path_locks: KeyedLocks,
    overwrite_policy: OverwritePolicy,
    max_upload_bytes: u64,
    chunk_size: usize,
}

impl StorageService {
    /// Create the service, preparing the on-disk layout.
    pub fn new(config: &StorageConfig, ledger: QuotaLedger) -> Result<Self> {
        let disk = DiskStore::new(&config.root_path)?;
        let resolver = PathResolver::new(disk.users_root());

        Ok(Self {
            resolver,
            disk,
            ledger,
            path_locks: KeyedLocks::new(),
            overwrite_policy: config.overwrite_policy,
            max_upload_bytes: config.max_upload_bytes(),
            chunk_size: config.upload_chunk_size.max(1),
        })
    }

    /// The quota ledger.
    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    /// The maximum accepted upload size in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    fn too_large(&self) -> StorageError {
        StorageError::Validation(format!(
            "file is larger than the {} byte upload limit",
            self.max_upload_bytes
        ))
    }

    fn lock_key(owner_id: &str, path: &LogicalPath) -> String {
        format!("{owner_id}:{path}")
    }

    /// Aggregate allotted and used bytes over every owner.
    pub async fn system_storage_status(&self, ctx: &RequestContext) -> Result<SystemStorageStatus> {
        debug!(trace_id = %ctx.trace_id(), user_id = ?ctx.user_id(), "System storage status");
        self.ledger.system_status().await
    }

    /// The caller's quota record.
    pub async fn user_storage_status(&self, ctx: &RequestContext) -> Result<QuotaRecord> {
        let identity = ctx.identity()?;
        debug!(trace_id = %ctx.trace_id(), user_id = %identity.user_id, "User storage status");
        self.ledger.status_for(&identity.user_id).await
    }

    /// Direct children of a folder, sorted by name.
    ///
    /// The owner root always exists; it is created on first access.
    pub async fn list_directory(&self, ctx: &RequestContext, raw: &str) -> Result<Vec<StorageNode>> {
        let identity = ctx.identity()?;
        let owner_id = identity.user_id.as_str();
        let (logical, physical) = self.resolver.resolve(owner_id, raw)?;
        info!(trace_id = %ctx.trace_id(), user_id = %owner_id, path = %logical, "List directory");

        if logical.is_root() {
            tokio::fs::create_dir_all(&physical).await?;
        }
        match DiskStore::inspect(&physical).await? {
            Some(meta) if NodeKind::of(&meta) == Some(NodeKind::Folder) => {}
            _ => return Err(StorageError::NotFound(format!("folder {logical}"))),
        }

        let mut nodes = Vec::new();
        let mut entries = tokio::fs::read_dir(&physical).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(trace_id = %ctx.trace_id(), user_id = %owner_id, "Skipping entry with a non UTF-8 name");
                continue;
            };
            let meta = match tokio::fs::symlink_metadata(entry.path()).await {
                Ok(meta) => meta,
                // Removed between read_dir and stat.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if let Some(kind) = NodeKind::of(&meta) {
                nodes.push(StorageNode::from_metadata(
                    owner_id,
                    logical.child(&name),
                    kind,
                    &meta,
                ));
            }
        }

        nodes.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(nodes)
    }

    /// Create every missing ancestor folder of `logical`.
    ///
    /// An ancestor that exists as a file is a `Conflict`.
    async fn ensure_parent_folders(&self, owner_id: &str, logical: &LogicalPath) -> Result<()> {
        tokio::fs::create_dir_all(self.resolver.owner_root(owner_id)?).await?;

        for ancestor in logical.ancestors() {
            let physical = self.resolver.resolve_logical(owner_id, &ancestor)?;
            match DiskStore::inspect(&physical).await? {
                Some(meta) if NodeKind::of(&meta) == Some(NodeKind::Folder) => {}
                Some(_) => {
                    return Err(StorageError::Conflict(format!("{ancestor} is not a folder")));
                }
                None => match tokio::fs::create_dir(&physical).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                        if !tokio::fs::symlink_metadata(&physical).await?.is_dir() {
                            return Err(StorageError::Conflict(format!(
                                "{ancestor} is not a folder"
                            )));
                        }
                    }
                    Err(e) => return Err(e.into()),
                },
            }
        }
        Ok(())
    }

    /// Create an empty folder, creating intermediate folders as needed.
    pub async fn create_folder(&self, ctx: &RequestContext, raw: &str) -> Result<StorageNode> {
        let identity = ctx.identity()?;
        let owner_id = identity.user_id.as_str();
        let (logical, physical) = self.resolver.resolve(owner_id, raw)?;
        info!(trace_id = %ctx.trace_id(), user_id = %owner_id, path = %logical, "Create folder");

        if logical.is_root() {
            return Err(StorageError::Conflict("the root folder already exists".to_string()));
        }

        let _guard = self.path_locks.lock(&Self::lock_key(owner_id, &logical)).await;

        if DiskStore::inspect(&physical).await?.is_some() {
            return Err(StorageError::Conflict(format!("{logical} already exists")));
        }
        self.ensure_parent_folders(owner_id, &logical).await?;

        match tokio::fs::create_dir(&physical).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StorageError::Conflict(format!("{logical} already exists")));
            }
            Err(e) => return Err(e.into()),
        }

        let meta = tokio::fs::symlink_metadata(&physical).await?;
        Ok(StorageNode::from_metadata(owner_id, logical, NodeKind::Folder, &meta))
    }

    /// Size of the file currently at `physical`, honouring the overwrite policy.
    async fn existing_file_size(&self, logical: &LogicalPath, physical: &Path) -> Result<Option<u64>> {
        match DiskStore::inspect(physical).await? {
            None => Ok(None),
            Some(meta) => match NodeKind::of(&meta) {
                Some(NodeKind::File) if self.overwrite_policy == OverwritePolicy::Replace => {
                    Ok(Some(meta.len()))
                }
                Some(NodeKind::File) => Err(StorageError::Conflict(format!(
                    "{logical} already exists"
                ))),
                _ => Err(StorageError::Conflict(format!("{logical} is a folder"))),
            },
        }
    }

    /// Upload a file.
    ///
    /// With a `declared_size` the stream may deliver at most that many
    /// bytes; they are reserved up front (less the size of any file being
    /// replaced) and the unused part is given back after commit. Without
    /// one the stream is capped at what currently fits in the allotment and
    /// the exact size is reserved at commit. Either way usage ends up
    /// matching the bytes actually stored.
    pub async fn upload_file<S, B, E>(
        &self,
        ctx: &RequestContext,
        raw: &str,
        declared_size: Option<u64>,
        stream: S,
    ) -> Result<UploadOutcome>
    where
        S: Stream<Item = std::result::Result<B, E>> + Send,
        B: AsRef<[u8]> + Send,
        E: fmt::Display + Send,
    {
        let identity = ctx.identity()?;
        let owner_id = identity.user_id.as_str();
        let (logical, physical) = self.resolver.resolve(owner_id, raw)?;
        info!(
            trace_id = %ctx.trace_id(),
            user_id = %owner_id,
            path = %logical,
            declared_size = ?declared_size,
            "Upload file"
        );

        if logical.is_root() {
            return Err(StorageError::Conflict("cannot upload over the root folder".to_string()));
        }
        if declared_size.is_some_and(|size| size > self.max_upload_bytes) {
            return Err(self.too_large());
        }

        // Preflight so obvious conflicts fail before any quota is touched.
        let old_size = self.existing_file_size(&logical, &physical).await?.unwrap_or(0);
        for ancestor in logical.ancestors() {
            let path = self.resolver.resolve_logical(owner_id, &ancestor)?;
            if let Some(meta) = DiskStore::inspect(&path).await? {
                if NodeKind::of(&meta) != Some(NodeKind::Folder) {
                    return Err(StorageError::Conflict(format!("{ancestor} is not a folder")));
                }
            }
        }

        let (limit, reserve) = match declared_size {
            Some(size) => (size, size.saturating_sub(old_size)),
            None => {
                let fits = self
                    .ledger
                    .status_for(owner_id)
                    .await?
                    .available_bytes()
                    .saturating_add(old_size);
                (fits.min(self.max_upload_bytes), 0)
            }
        };
        self.ledger.reserve(owner_id, reserve).await?;

        let staged = self.disk.staging_path();
        let mut pending = PendingUpload {
            ledger: self.ledger.clone(),
            owner_id: owner_id.to_string(),
            held: reserve,
            staged: Some(staged.clone()),
        };

        let written = match DiskStore::write_stream(&staged, stream, limit).await {
            Ok(Some(written)) => written,
            Ok(None) => {
                let err = match declared_size {
                    Some(size) => StorageError::Validation(format!(
                        "upload exceeds the declared size of {size} bytes"
                    )),
                    None if limit < self.max_upload_bytes => StorageError::QuotaExceeded {
                        requested: (limit + 1).saturating_sub(old_size),
                        available: limit.saturating_sub(old_size),
                    },
                    None => self.too_large(),
                };
                return pending.abort(err).await;
            }
            Err(e) => return pending.abort(e).await,
        };

        let _guard = self.path_locks.lock(&Self::lock_key(owner_id, &logical)).await;

        // The target may have changed while the bytes were streaming.
        let current = match self.existing_file_size(&logical, &physical).await {
            Ok(current) => current,
            Err(e) => return pending.abort(e).await,
        };
        let current_size = current.unwrap_or(0);
        let needed = written.saturating_sub(current_size);
        if needed > pending.held {
            if let Err(e) = self.ledger.reserve(owner_id, needed - pending.held).await {
                return pending.abort(e).await;
            }
            pending.held = needed;
        }

        if let Err(e) = self.ensure_parent_folders(owner_id, &logical).await {
            return pending.abort(e).await;
        }
        if let Err(e) = tokio::fs::rename(&staged, &physical).await {
            return pending.abort(e.into()).await;
        }
        pending.staged = None;

        // usage: before + held  ->  before - current_size + written
        let surplus = (pending.held + current_size).saturating_sub(written);
        pending.held = 0;
        drop(pending);
        if surplus > 0 {
            // The file is committed, so the release must finish even if the
            // caller goes away now.
            let ledger = self.ledger.clone();
            let owner = owner_id.to_string();
            let released =
                detached(async move { ledger.release(&owner, surplus).await }).await;
            if let Err(e) = released {
                error!(
                    trace_id = %ctx.trace_id(),
                    user_id = %owner_id,
                    surplus,
                    "Failed to release unused reservation: {}",
                    e
                );
            }
        }

        let meta = tokio::fs::symlink_metadata(&physical).await?;
        let node = StorageNode::from_metadata(owner_id, logical, NodeKind::File, &meta);
        info!(
            trace_id = %ctx.trace_id(),
            user_id = %owner_id,
            path = %node.path,
            size = node.size_bytes,
            replaced = current.is_some(),
            "File stored"
        );

        Ok(UploadOutcome {
            node,
            replaced: current.is_some(),
        })
    }

    /// Open a file for download.
    pub async fn download_file(&self, ctx: &RequestContext, raw: &str) -> Result<FileDownload> {
        let identity = ctx.identity()?;
        let owner_id = identity.user_id.as_str();
        let (logical, physical) = self.resolver.resolve(owner_id, raw)?;
        info!(trace_id = %ctx.trace_id(), user_id = %owner_id, path = %logical, "Download file");

        let not_found = || StorageError::NotFound(format!("file {logical}"));
        if logical.is_root() {
            return Err(not_found());
        }

        let _guard = self.path_locks.lock(&Self::lock_key(owner_id, &logical)).await;
        match DiskStore::inspect(&physical).await? {
            Some(meta) if NodeKind::of(&meta) == Some(NodeKind::File) => {}
            _ => return Err(not_found()),
        }

        // Metadata comes from the open handle so it matches the bytes served.
        let file = tokio::fs::File::open(&physical).await?;
        let meta = file.metadata().await?;
        let node = StorageNode::from_metadata(owner_id, logical, NodeKind::File, &meta);

        Ok(FileDownload {
            node,
            file,
            chunk_size: self.chunk_size,
        })
    }

    /// Remove a file, or a folder.
    ///
    /// A folder with children is only removed when `recursive` is set.
    /// The node is moved into staging first so that the quota release and
    /// the removal either both happen or neither does.
    pub async fn remove(
        &self,
        ctx: &RequestContext,
        raw: &str,
        recursive: bool,
    ) -> Result<RemoveOutcome> {
        let identity = ctx.identity()?;
        let owner_id = identity.user_id.as_str();
        let (logical, physical) = self.resolver.resolve(owner_id, raw)?;
        info!(
            trace_id = %ctx.trace_id(),
            user_id = %owner_id,
            path = %logical,
            recursive,
            "Remove node"
        );

        if logical.is_root() {
            return Err(StorageError::Conflict("cannot remove the root folder".to_string()));
        }

        let _guard = self.path_locks.lock(&Self::lock_key(owner_id, &logical)).await;

        let kind = match DiskStore::inspect(&physical).await? {
            Some(meta) => NodeKind::of(&meta),
            None => None,
        }
        .ok_or_else(|| StorageError::NotFound(format!("{logical}")))?;

        if kind == NodeKind::Folder && !recursive && !DiskStore::is_empty_dir(&physical).await? {
            return Err(StorageError::Conflict(format!("folder {logical} is not empty")));
        }

        let trash = self.disk.staging_path();
        move_to_trash(&logical, &physical, &trash, kind == NodeKind::Folder && !recursive).await?;

        let released = match DiskStore::tree_size_async(trash.clone()).await {
            Ok(size) => size,
            Err(e) => {
                restore(&trash, &physical).await;
                return Err(e);
            }
        };
        let ledger = self.ledger.clone();
        let owner = owner_id.to_string();
        if let Err(e) = detached(async move { ledger.release(&owner, released).await }).await {
            restore(&trash, &physical).await;
            return Err(e);
        }

        if let Err(e) = DiskStore::remove_tree(&trash).await {
            warn!(
                trace_id = %ctx.trace_id(),
                "Removed node left in staging until next start: {}",
                e
            );
        }

        info!(
            trace_id = %ctx.trace_id(),
            user_id = %owner_id,
            path = %logical,
            released,
            "Node removed"
        );

        Ok(RemoveOutcome {
            path: logical,
            kind,
            released_bytes: released,
        })
    }

    /// Discard staged leftovers and recompute every owner's usage from disk.
    ///
    /// Run before serving requests.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let staged_removed = self.disk.clear_staging()?;
        if staged_removed > 0 {
            warn!(staged_removed, "Discarded staged entries from an earlier run");
        }

        let mut owners = self.ledger.owners().await?;
        owners.extend(self.disk.owner_dirs()?);
        owners.sort();
        owners.dedup();

        let mut owners_checked = 0;
        for owner_id in owners {
            let root = match self.resolver.owner_root(&owner_id) {
                Ok(root) => root,
                Err(_) => {
                    warn!(owner = %owner_id, "Skipping directory that is not a valid owner ID");
                    continue;
                }
            };
            let used = DiskStore::tree_size_async(root).await?;
            self.ledger.set_usage(&owner_id, used).await?;
            owners_checked += 1;
        }

        info!(staged_removed, owners_checked, "Storage reconciled");
        Ok(ReconcileReport {
            staged_removed,
            owners_checked,
        })
    }
}

/// Run a ledger update on its own task so it completes even if the
/// request future is dropped while waiting for it.
async fn detached<T, F>(update: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(update)
        .await
        .map_err(|e| StorageError::Internal(format!("ledger task failed: {e}")))?
}

/// Move a node into staging ahead of its removal.
///
/// With `require_empty`, a folder that has children once moved (an upload
/// into it committed after the caller's check) is put back as `Conflict`.
async fn move_to_trash(
    logical: &LogicalPath,
    physical: &Path,
    trash: &Path,
    require_empty: bool,
) -> Result<()> {
    tokio::fs::rename(physical, trash).await?;
    if !require_empty {
        return Ok(());
    }

    match DiskStore::is_empty_dir(trash).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            restore(trash, physical).await;
            Err(StorageError::Conflict(format!("folder {logical} is not empty")))
        }
        Err(e) => {
            restore(trash, physical).await;
            Err(e)
        }
    }
}

/// Move a node back out of staging after a failed removal.
async fn restore(trash: &Path, physical: &Path) {
    if let Err(e) = tokio::fs::rename(trash, physical).await {
        error!(
            "Failed to restore {} after a failed removal: {}",
            physical.display(),
            e
        );
    }
}
