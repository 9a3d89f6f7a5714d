//! Error types for the replication library

use std::path::PathBuf;

/// Result type alias for replication operations
pub type Result<T> = std::result::Result<T, ReplicaError>;

/// Error type for replication operations
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    /// Path-related errors
    #[error("Path error at '{path}': {message}")]
    Path { path: PathBuf, message: String },

    /// File comparison errors
    #[error("Comparison error: {message}")]
    Comparison { message: String },

    /// File copying errors
    #[error("File copy error: {message}")]
    FileCopy { message: String },

    /// Rename / move errors
    #[error("File move error: {message}")]
    FileMove { message: String },

    /// File deletion errors
    #[error("File deletion error at '{path}': {message}")]
    FileDeletion { path: PathBuf, message: String },

    /// Directory scanning errors
    #[error("Directory scan error at '{path}': {message}")]
    DirectoryScan { path: PathBuf, message: String },

    /// Change notification errors
    #[error("Watch error: {0}")]
    Watch(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cancellation error
    #[error("Operation was cancelled")]
    Cancelled,
}

impl ReplicaError {
    /// Create a new path error
    pub fn path_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new comparison error
    pub fn comparison_error(
        source: impl AsRef<std::path::Path>,
        dest: impl AsRef<std::path::Path>,
        message: impl Into<String>,
    ) -> Self {
        let full_message = format!(
            "Comparison error between '{}' and '{}': {}",
            source.as_ref().display(),
            dest.as_ref().display(),
            message.into()
        );
        Self::Comparison {
            message: full_message,
        }
    }

    /// Create a new file copy error
    pub fn copy_error(
        source: impl AsRef<std::path::Path>,
        dest: impl AsRef<std::path::Path>,
        message: impl Into<String>,
    ) -> Self {
        let full_message = format!(
            "File copy error from '{}' to '{}': {}",
            source.as_ref().display(),
            dest.as_ref().display(),
            message.into()
        );
        Self::FileCopy {
            message: full_message,
        }
    }

    /// Create a new move error
    pub fn move_error(
        source: impl AsRef<std::path::Path>,
        dest: impl AsRef<std::path::Path>,
        message: impl Into<String>,
    ) -> Self {
        let full_message = format!(
            "Move from '{}' to '{}' failed: {}",
            source.as_ref().display(),
            dest.as_ref().display(),
            message.into()
        );
        Self::FileMove {
            message: full_message,
        }
    }

    /// Create a new file deletion error
    pub fn deletion_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::FileDeletion {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new directory scan error
    pub fn scan_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::DirectoryScan {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether this error only reports a cancelled operation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_not_a_failure_kind() {
        assert!(ReplicaError::Cancelled.is_cancelled());
        assert!(!ReplicaError::path_error("a.txt", "gone").is_cancelled());
    }

    #[test]
    fn test_messages_name_both_paths() {
        let err = ReplicaError::move_error("dst/a.txt", "dst/b.txt", "not found");
        let msg = err.to_string();
        assert!(msg.contains("dst/a.txt"));
        assert!(msg.contains("dst/b.txt"));
    }
}
