//! Replication settings handed to the core

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{ReplicaError, Result};

/// Immutable settings for one source/destination pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    /// Folder being replicated
    pub source: PathBuf,
    /// Replica folder
    pub destination: PathBuf,
    /// Length of one event aggregation window
    #[serde(with = "humantime_serde", default = "default_sync_period")]
    pub sync_period: Duration,
    /// Buffer size for streamed content comparison
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Number of files checked in parallel during the initial pass
    #[serde(default = "default_scan_concurrency")]
    pub scan_concurrency: usize,
    /// Capacity of the event and action channels
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("./source"),
            destination: PathBuf::from("./replica"),
            sync_period: default_sync_period(),
            buffer_size: default_buffer_size(),
            scan_concurrency: default_scan_concurrency(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl ReplicaConfig {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, sync_period: Duration) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            sync_period,
            ..Default::default()
        }
    }

    /// Absolute source path for a relative name
    pub fn source_path(&self, relative: &Path) -> PathBuf {
        self.source.join(relative)
    }

    /// Absolute destination path for a relative name
    pub fn destination_path(&self, relative: &Path) -> PathBuf {
        self.destination.join(relative)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.source.is_dir() {
            return Err(ReplicaError::Config(format!(
                "Source is not an existing directory: {}",
                self.source.display()
            )));
        }

        if self.sync_period.is_zero() {
            return Err(ReplicaError::Config("Sync period must be greater than zero".to_string()));
        }
        if self.buffer_size == 0 {
            return Err(ReplicaError::Config("Buffer size must be greater than zero".to_string()));
        }
        if self.scan_concurrency == 0 {
            return Err(ReplicaError::Config("Scan concurrency must be greater than zero".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(ReplicaError::Config("Channel capacity must be greater than zero".to_string()));
        }

        let source = normalize(&self.source);
        let destination = normalize(&self.destination);
        if source == destination {
            return Err(ReplicaError::Config("Source and destination must differ".to_string()));
        }
        if destination.starts_with(&source) || source.starts_with(&destination) {
            return Err(ReplicaError::Config(format!(
                "Source '{}' and destination '{}' must not contain each other",
                self.source.display(),
                self.destination.display()
            )));
        }

        Ok(())
    }
}

// The destination may not exist yet, so canonicalize what we can.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }

    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        if let Ok(parent) = parent.canonicalize() {
            return parent.join(name);
        }
    }

    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn default_sync_period() -> Duration { Duration::from_secs(5) }
fn default_buffer_size() -> usize { 4096 }
fn default_scan_concurrency() -> usize { 8 }
fn default_channel_capacity() -> usize { 1024 }
