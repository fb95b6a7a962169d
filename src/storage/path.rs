//! Logical path normalization and owner-scoped resolution.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::auth::is_safe_user_id;
use crate::{Result, StorageError};

/// Maximum length of a raw logical path, in bytes.
pub const MAX_PATH_LENGTH: usize = 4096;

/// Maximum length of a single path segment, in bytes.
pub const MAX_SEGMENT_LENGTH: usize = 255;

/// A normalized path relative to an owner root.
///
/// Segments are never empty, `.` or `..`, and never contain a separator,
/// so joining them under the owner root cannot leave it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LogicalPath {
    segments: Vec<String>,
}

impl LogicalPath {
    /// The owner root itself.
    pub fn root() -> Self {
        Self::default()
    }

    /// Normalize a caller-supplied path.
    ///
    /// Both `/` and `\` separate segments, empty and `.` segments are
    /// dropped, and `..` removes the previous segment. A `..` with nothing
    /// left to remove, a drive prefix, or percent-encoded separators and
    /// dots that would do the same all fail with `PathTraversal`.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.len() > MAX_PATH_LENGTH {
            return Err(StorageError::Validation(format!(
                "path is longer than {MAX_PATH_LENGTH} bytes"
            )));
        }
        reject_control_chars(raw)?;

        let decoded = urlencoding::decode(raw)
            .map_err(|_| StorageError::Validation("path is not valid UTF-8".to_string()))?;
        reject_control_chars(&decoded)?;

        let mut segments: Vec<String> = Vec::new();
        for (index, segment) in decoded.split(['/', '\\']).enumerate() {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(StorageError::PathTraversal(raw.to_string()));
                    }
                }
                _ => {
                    if index == 0 && is_drive_prefix(segment) {
                        return Err(StorageError::PathTraversal(raw.to_string()));
                    }
                    if segment.len() > MAX_SEGMENT_LENGTH {
                        return Err(StorageError::Validation(format!(
                            "path segment is longer than {MAX_SEGMENT_LENGTH} bytes"
                        )));
                    }
                    segments.push(segment.to_string());
                }
            }
        }

        Ok(Self { segments })
    }

    /// Whether this is the owner root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append one already-validated segment.
    pub(crate) fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    /// Every proper ancestor from the root down, excluding the root.
    pub fn ancestors(&self) -> impl Iterator<Item = Self> + '_ {
        (1..self.segments.len()).map(move |n| Self {
            segments: self.segments[..n].to_vec(),
        })
    }

    /// Segments in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

fn reject_control_chars(s: &str) -> Result<()> {
    if s.chars().any(char::is_control) {
        return Err(StorageError::Validation(
            "path contains control characters".to_string(),
        ));
    }
    Ok(())
}

/// `C:`, `c:foo` and similar Windows drive prefixes.
fn is_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Maps `(owner, logical path)` to a physical location under the users root.
///
/// Resolution is pure; it never touches the filesystem.
#[derive(Debug, Clone)]
pub struct PathResolver {
    users_root: PathBuf,
}

impl PathResolver {
    /// Create a resolver rooted at the directory holding every owner root.
    pub fn new(users_root: impl Into<PathBuf>) -> Self {
        Self {
            users_root: users_root.into(),
        }
    }

    /// Directory holding every owner root.
    pub fn users_root(&self) -> &Path {
        &self.users_root
    }

    /// Physical root of an owner's namespace.
    pub fn owner_root(&self, owner_id: &str) -> Result<PathBuf> {
        if !is_safe_user_id(owner_id) {
            return Err(StorageError::PathTraversal(format!("owner {owner_id}")));
        }
        Ok(self.users_root.join(owner_id))
    }

    /// Resolve an already-normalized path.
    pub fn resolve_logical(&self, owner_id: &str, path: &LogicalPath) -> Result<PathBuf> {
        let mut physical = self.owner_root(owner_id)?;
        for segment in path.segments() {
            physical.push(segment);
        }
        Ok(physical)
    }

    /// Normalize and resolve a caller-supplied path.
    pub fn resolve(&self, owner_id: &str, raw: &str) -> Result<(LogicalPath, PathBuf)> {
        let logical = LogicalPath::parse(raw)?;
        let physical = self.resolve_logical(owner_id, &logical)?;
        Ok((logical, physical))
    }
}
