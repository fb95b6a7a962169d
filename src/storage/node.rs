//! Storage nodes.

use std::fs::Metadata;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::path::LogicalPath;

/// Kind of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

impl NodeKind {
    /// Kind of a filesystem entry. Anything that is neither a regular file
    /// nor a directory (symlinks included) is not a node.
    pub fn of(metadata: &Metadata) -> Option<Self> {
        let file_type = metadata.file_type();
        if file_type.is_symlink() {
            None
        } else if file_type.is_file() {
            Some(Self::File)
        } else if file_type.is_dir() {
            Some(Self::Folder)
        } else {
            None
        }
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
        }
    }
}

/// A file or folder in an owner's namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageNode {
    pub owner_id: String,
    pub path: LogicalPath,
    pub kind: NodeKind,
    /// Zero for folders.
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl StorageNode {
    /// Build a node from filesystem metadata.
    pub fn from_metadata(
        owner_id: &str,
        path: LogicalPath,
        kind: NodeKind,
        metadata: &Metadata,
    ) -> Self {
        let modified_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        // Not every filesystem records a birth time.
        let created_at = metadata
            .created()
            .map(DateTime::<Utc>::from)
            .unwrap_or(modified_at);

        Self {
            owner_id: owner_id.to_string(),
            path,
            kind,
            size_bytes: match kind {
                NodeKind::File => metadata.len(),
                NodeKind::Folder => 0,
            },
            created_at,
            modified_at,
        }
    }

    /// Last path segment; empty for the owner root.
    pub fn name(&self) -> &str {
        self.path.name().unwrap_or("")
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_metadata() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"hello").unwrap();

        let meta = std::fs::symlink_metadata(&file).unwrap();
        let kind = NodeKind::of(&meta).unwrap();
        assert_eq!(kind, NodeKind::File);

        let node = StorageNode::from_metadata(
            "alice",
            LogicalPath::parse("/a.txt").unwrap(),
            kind,
            &meta,
        );
        assert_eq!(node.size_bytes, 5);
        assert_eq!(node.name(), "a.txt");
        assert!(node.is_file());
        assert_eq!(node.owner_id, "alice");
    }

    #[test]
    fn test_folder_size_is_zero() {
        let dir = TempDir::new().unwrap();
        let meta = std::fs::symlink_metadata(dir.path()).unwrap();
        let node = StorageNode::from_metadata(
            "alice",
            LogicalPath::root(),
            NodeKind::of(&meta).unwrap(),
            &meta,
        );
        assert_eq!(node.kind, NodeKind::Folder);
        assert_eq!(node.size_bytes, 0);
        assert_eq!(node.name(), "");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(NodeKind::File.as_str(), "file");
        assert_eq!(NodeKind::Folder.as_str(), "folder");
        assert_eq!(serde_json::to_string(&NodeKind::Folder).unwrap(), "\"folder\"");
    }
}
