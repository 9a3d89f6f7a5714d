//! Destination mutations and streamed content comparison

use std::path::Path;
use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ReplicaError, Result};

/// File operations the replication core relies on.
///
/// Every method reports failure through its `Result`; callers log and move
/// on, none of these failures is fatal to the pipeline.
#[async_trait]
pub trait FileOperations: Send + Sync {
    /// Stream both files and report whether their contents are identical.
    ///
    /// Returns `Err(ReplicaError::Cancelled)` as soon as `cancel` fires.
    async fn contents_match(
        &self,
        source: &Path,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool>;

    /// Copy a file, creating the destination's parent directories
    async fn copy_file(&self, source: &Path, destination: &Path) -> Result<()>;

    /// Move a file or directory, replacing whatever exists at `destination`
    async fn move_path(&self, source: &Path, destination: &Path) -> Result<()>;

    /// Delete a file, or a directory recursively
    async fn delete_path(&self, path: &Path) -> Result<()>;

    /// Create a directory and any missing parents
    async fn create_dir(&self, path: &Path) -> Result<()>;
}

/// `FileOperations` on the local disk
#[derive(Debug, Clone)]
pub struct LocalFileOperations {
    buffer_size: usize,
}

impl Default for LocalFileOperations {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl LocalFileOperations {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

#[async_trait]
impl FileOperations for LocalFileOperations {
    async fn contents_match(
        &self,
        source: &Path,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let (mut source_file, mut dest_file) =
            tokio::try_join!(fs::File::open(source), fs::File::open(destination)).map_err(|e| {
                ReplicaError::comparison_error(source, destination, format!("Failed to open: {}", e))
            })?;

        let mut source_buffer = vec![0u8; self.buffer_size];
        let mut dest_buffer = vec![0u8; self.buffer_size];

        loop {
            if cancel.is_cancelled() {
                return Err(ReplicaError::Cancelled);
            }

            // Both reads are awaited together so neither stream runs ahead.
            let (source_read, dest_read) = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ReplicaError::Cancelled),
                reads = async {
                    tokio::join!(
                        read_full(&mut source_file, &mut source_buffer),
                        read_full(&mut dest_file, &mut dest_buffer),
                    )
                } => reads,
            };

            let source_bytes = source_read.map_err(|e| {
                ReplicaError::comparison_error(source, destination, format!("Failed to read source file: {}", e))
            })?;
            let dest_bytes = dest_read.map_err(|e| {
                ReplicaError::comparison_error(source, destination, format!("Failed to read destination file: {}", e))
            })?;

            if source_bytes != dest_bytes {
                return Ok(false);
            }
            if source_bytes == 0 {
                return Ok(true);
            }
            if source_buffer[..source_bytes] != dest_buffer[..dest_bytes] {
                return Ok(false);
            }
        }
    }

    async fn copy_file(&self, source: &Path, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                ReplicaError::copy_error(source, destination, format!("Failed to create parent directory: {}", e))
            })?;
        }

        fs::copy(source, destination).await.map_err(|e| {
            ReplicaError::copy_error(source, destination, format!("Failed to copy file: {}", e))
        })?;

        Ok(())
    }

    async fn move_path(&self, source: &Path, destination: &Path) -> Result<()> {
        let metadata = fs::metadata(source)
            .await
            .map_err(|e| ReplicaError::move_error(source, destination, e.to_string()))?;

        if let Ok(existing) = fs::symlink_metadata(destination).await {
            let removed = if existing.is_dir() {
                fs::remove_dir_all(destination).await
            } else {
                fs::remove_file(destination).await
            };
            if let Err(e) = removed {
                debug!("Could not clear '{}' before move: {}", destination.display(), e);
            }
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ReplicaError::move_error(source, destination, e.to_string()))?;
        }

        fs::rename(source, destination).await.map_err(|e| {
            let what = if metadata.is_dir() { "directory" } else { "file" };
            ReplicaError::move_error(source, destination, format!("Failed to move {}: {}", what, e))
        })
    }

    async fn delete_path(&self, path: &Path) -> Result<()> {
        let file_err = match fs::remove_file(path).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        match fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(dir_err) => Err(ReplicaError::deletion_error(
                path,
                format!("not a removable file ({}) or directory ({})", file_err, dir_err),
            )),
        }
    }

    async fn create_dir(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await.map_err(|e| {
            ReplicaError::path_error(path, format!("Failed to create directory: {}", e))
        })
    }
}

/// Fill `buf` unless the reader hits end-of-file first
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    async fn write_pair(dir: &TempDir, source: &[u8], dest: &[u8]) -> (std::path::PathBuf, std::path::PathBuf) {
        let path1 = dir.path().join("source.bin");
        let path2 = dir.path().join("dest.bin");
        fs::write(&path1, source).await.unwrap();
        fs::write(&path2, dest).await.unwrap();
        (path1, path2)
    }

    #[test_case(b"hello world", b"hello world", true ; "identical")]
    #[test_case(b"hello world", b"hello rust!", false ; "same size different content")]
    #[test_case(b"hello", b"hello world", false ; "destination longer")]
    #[test_case(b"", b"", true ; "both empty")]
    #[tokio::test]
    async fn test_contents_match(source: &[u8], dest: &[u8], expected: bool) {
        let temp_dir = TempDir::new().unwrap();
        let (path1, path2) = write_pair(&temp_dir, source, dest).await;

        let ops = LocalFileOperations::new(4);
        let result = ops
            .contents_match(&path1, &path2, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, expected);
    }

    #[tokio::test]
    async fn test_buffer_boundary_does_not_cause_false_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let content: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let (path1, path2) = write_pair(&temp_dir, &content, &content).await;

        // 10_000 is not a multiple of 7, the last read is a short one
        let ops = LocalFileOperations::new(7);
        assert!(ops
            .contents_match(&path1, &path2, &CancellationToken::new())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_difference_after_first_buffer() {
        let temp_dir = TempDir::new().unwrap();
        let content = vec![1u8; 64];
        let mut other = content.clone();
        other[40] = 2;
        let (path1, path2) = write_pair(&temp_dir, &content, &other).await;

        let ops = LocalFileOperations::new(16);
        assert!(!ops
            .contents_match(&path1, &path2, &CancellationToken::new())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_comparison() {
        let temp_dir = TempDir::new().unwrap();
        let (path1, path2) = write_pair(&temp_dir, b"same", b"same").await;

        let token = CancellationToken::new();
        token.cancel();

        let result = LocalFileOperations::default()
            .contents_match(&path1, &path2, &token)
            .await;
        assert!(matches!(result, Err(ReplicaError::Cancelled)));
    }

    #[tokio::test]
    async fn test_copy_creates_parents_and_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("a.txt");
        let destination = temp_dir.path().join("replica/deep/a.txt");
        fs::write(&source, b"12345").await.unwrap();

        let ops = LocalFileOperations::default();
        ops.copy_file(&source, &destination).await.unwrap();
        assert_eq!(fs::read(&destination).await.unwrap(), b"12345");

        fs::write(&source, b"678").await.unwrap();
        ops.copy_file(&source, &destination).await.unwrap();
        assert_eq!(fs::read(&destination).await.unwrap(), b"678");
    }

    #[tokio::test]
    async fn test_move_replaces_existing_target() {
        let temp_dir = TempDir::new().unwrap();
        let old = temp_dir.path().join("a.txt");
        let new = temp_dir.path().join("b.txt");
        fs::write(&old, b"new content").await.unwrap();
        fs::write(&new, b"stale").await.unwrap();

        let ops = LocalFileOperations::default();
        ops.move_path(&old, &new).await.unwrap();

        assert!(!old.exists());
        assert_eq!(fs::read(&new).await.unwrap(), b"new content");
    }

    #[tokio::test]
    async fn test_move_directory() {
        let temp_dir = TempDir::new().unwrap();
        let old = temp_dir.path().join("dir");
        fs::create_dir(&old).await.unwrap();
        fs::write(old.join("inner.txt"), b"x").await.unwrap();

        let ops = LocalFileOperations::default();
        ops.move_path(&old, &temp_dir.path().join("renamed")).await.unwrap();

        assert!(temp_dir.path().join("renamed/inner.txt").exists());
    }

    #[tokio::test]
    async fn test_move_missing_source_fails() {
        let temp_dir = TempDir::new().unwrap();
        let ops = LocalFileOperations::default();
        let result = ops
            .move_path(&temp_dir.path().join("nope"), &temp_dir.path().join("b"))
            .await;
        assert!(matches!(result, Err(ReplicaError::FileMove { .. })));
    }

    #[tokio::test]
    async fn test_delete_file_then_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("x.txt");
        let dir = temp_dir.path().join("dir");
        fs::write(&file, b"x").await.unwrap();
        fs::create_dir_all(dir.join("sub")).await.unwrap();

        let ops = LocalFileOperations::default();
        ops.delete_path(&file).await.unwrap();
        ops.delete_path(&dir).await.unwrap();
        assert!(!file.exists());
        assert!(!dir.exists());

        let again = ops.delete_path(&file).await;
        assert!(matches!(again, Err(ReplicaError::FileDeletion { .. })));
    }
}
