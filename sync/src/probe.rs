//! Read-only filesystem inspection used while merging events

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use tracing::debug;

/// What currently lives at a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Directory,
    Missing,
}

/// Answers questions about the current state of the filesystem
pub trait PathProbe: Send + Sync {
    /// Classify an absolute path
    fn kind(&self, path: &Path) -> PathKind;

    /// Every file (not directory) below `dir`, recursively, as absolute paths
    fn files_under(&self, dir: &Path) -> Vec<PathBuf>;
}

/// Probe backed by the local disk
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalProbe;

impl PathProbe for LocalProbe {
    fn kind(&self, path: &Path) -> PathKind {
        match std::fs::metadata(path) {
            Ok(metadata) if metadata.is_dir() => PathKind::Directory,
            Ok(_) => PathKind::File,
            Err(_) => PathKind::Missing,
        }
    }

    fn files_under(&self, dir: &Path) -> Vec<PathBuf> {
        WalkDir::new(dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping unreadable entry under {}: {}", dir.display(), e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect()
    }
}

/// Probe over a fixed, in-memory tree of absolute paths
#[derive(Debug, Default, Clone)]
pub struct MemoryProbe {
    files: BTreeSet<PathBuf>,
    dirs: BTreeSet<PathBuf>,
}

impl MemoryProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.insert(path.into());
        self
    }

    pub fn with_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.dirs.insert(path.into());
        self
    }
}

impl PathProbe for MemoryProbe {
    fn kind(&self, path: &Path) -> PathKind {
        if self.files.contains(path) {
            PathKind::File
        } else if self.dirs.contains(path) {
            PathKind::Directory
        } else {
            PathKind::Missing
        }
    }

    fn files_under(&self, dir: &Path) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|file| file.starts_with(dir) && file.as_path() != dir)
            .cloned()
            .collect()
    }
}
