//! Change notifications as seen by the replication pipeline

use std::fmt;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

/// Kind of filesystem change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// A file or directory appeared
    Created,
    /// File content or metadata changed
    Changed,
    /// An item was renamed from `old_path` to `path`
    Renamed,
    /// An item was removed
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "Created",
            Self::Changed => "Changed",
            Self::Renamed => "Renamed",
            Self::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}

/// A single change notification.
///
/// Paths are relative to the watched root. `path` is always the current
/// name, so for renames it is the name after the rename and `old_path`
/// holds the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    kind: ChangeKind,
    path: PathBuf,
    old_path: Option<PathBuf>,
}

impl ChangeEvent {
    /// Create a `Created` event
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::simple(ChangeKind::Created, path)
    }

    /// Create a `Changed` event
    pub fn changed(path: impl Into<PathBuf>) -> Self {
        Self::simple(ChangeKind::Changed, path)
    }

    /// Create a `Deleted` event
    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::simple(ChangeKind::Deleted, path)
    }

    /// Create a `Renamed` event moving `old_path` to `new_path`
    pub fn renamed(old_path: impl Into<PathBuf>, new_path: impl Into<PathBuf>) -> Self {
        Self {
            kind: ChangeKind::Renamed,
            path: new_path.into(),
            old_path: Some(old_path.into()),
        }
    }

    fn simple(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            old_path: None,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    /// Current (post-rename) relative path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Previous relative path, only set for renames
    pub fn old_path(&self) -> Option<&Path> {
        self.old_path.as_deref()
    }

    pub fn is_rename(&self) -> bool {
        self.kind == ChangeKind::Renamed
    }

    /// Every relative path this event touches
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.path.as_path()).chain(self.old_path.as_deref())
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.old_path {
            Some(old) => write!(
                f,
                "{}: \"{}\" -> \"{}\"",
                self.kind,
                old.display(),
                self.path.display()
            ),
            None => write!(f, "{}: \"{}\"", self.kind, self.path.display()),
        }
    }
}

/// Express `path` relative to `root`, if it lives underneath it
pub fn relative_to(path: &Path, root: &Path) -> Option<PathBuf> {
    path.strip_prefix(root)
        .ok()
        .filter(|rel| !rel.as_os_str().is_empty())
        .map(Path::to_path_buf)
}
