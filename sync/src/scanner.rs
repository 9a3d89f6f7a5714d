//! Initial pass reconciling the replica with the source before live events

use std::convert::Infallible;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use futures::StreamExt;
use serde::Serialize;
use tokio::fs;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::action::OrderedAction;
use crate::config::ReplicaConfig;
use crate::error::{ReplicaError, Result};
use crate::event::ChangeEvent;
use crate::file_ops::FileOperations;
use crate::skip_set::SkipSet;

/// Counters for one initial pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Files looked at
    pub checked: u64,
    /// Files queued for copying
    pub emitted: u64,
    /// Files already identical in the replica
    pub in_sync: u64,
    /// Checks abandoned because live data superseded them
    pub skipped: u64,
    /// Checks that hit an error
    pub failed: u64,
}

impl ScanSummary {
    fn record(&mut self, outcome: CheckOutcome) {
        self.checked += 1;
        match outcome {
            CheckOutcome::Emitted => self.emitted += 1,
            CheckOutcome::InSync => self.in_sync += 1,
            CheckOutcome::Skipped => self.skipped += 1,
            CheckOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckOutcome {
    Emitted,
    InSync,
    Skipped,
    Failed,
}

/// Walks the source once and queues a copy for every file the replica is
/// missing or holds different contents for.
///
/// Each per-file check can be cancelled individually through the shared
/// [`SkipSet`], so a live event for a path wins over a slow comparison.
#[derive(Clone)]
pub struct InitialScanner {
    config: Arc<ReplicaConfig>,
    file_ops: Arc<dyn FileOperations>,
    skip_set: Arc<SkipSet>,
}

impl std::fmt::Debug for InitialScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitialScanner")
            .field("source", &self.config.source)
            .field("destination", &self.config.destination)
            .finish_non_exhaustive()
    }
}

impl InitialScanner {
    pub fn new(config: Arc<ReplicaConfig>, file_ops: Arc<dyn FileOperations>, skip_set: Arc<SkipSet>) -> Self {
        Self {
            config,
            file_ops,
            skip_set,
        }
    }

    /// Abandon the check of one relative path; it will never be queued
    pub fn cancel_check_for(&self, relative: &Path) {
        self.skip_set.cancel(relative);
    }

    /// Run the pass to completion or until `pass_token` fires.
    ///
    /// Errors are logged and counted, never returned. The pass is over once
    /// this returns and `action_tx` is dropped.
    #[instrument(skip_all, fields(source = %self.config.source.display()))]
    pub async fn run(&self, action_tx: mpsc::Sender<OrderedAction>, pass_token: CancellationToken) -> ScanSummary {
        info!("Starting initial pass");

        let files = match self.list_source_files().await {
            Ok(files) => files,
            Err(e) => {
                warn!("Initial pass aborted: {}", e);
                return ScanSummary::default();
            }
        };
        debug!("Found {} source files", files.len());

        let summary = futures::stream::iter(files)
            .map(|relative| {
                let scanner = self.clone();
                let action_tx = action_tx.clone();
                let pass_token = pass_token.clone();
                async move { scanner.process_file(relative, &action_tx, &pass_token).await }
            })
            .buffer_unordered(self.config.scan_concurrency.max(1))
            .fold(ScanSummary::default(), |mut summary, outcome| async move {
                summary.record(outcome);
                summary
            })
            .await;

        info!(
            checked = summary.checked,
            queued = summary.emitted,
            in_sync = summary.in_sync,
            skipped = summary.skipped,
            failed = summary.failed,
            "Initial pass finished"
        );
        summary
    }

    async fn list_source_files(&self) -> Result<Vec<PathBuf>> {
        let root = self.config.source.clone();
        if !fs::metadata(&root).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(ReplicaError::scan_error(&root, "Source is not a directory"));
        }

        let walk_root = root.clone();
        tokio::task::spawn_blocking(move || {
            WalkDir::new(&walk_root)
                .min_depth(1)
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        debug!("Skipping unreadable entry: {}", e);
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| entry.path().strip_prefix(&walk_root).ok().map(Path::to_path_buf))
                .collect()
        })
        .await
        .map_err(|e| ReplicaError::scan_error(root, e.to_string()))
    }

    async fn process_file(
        &self,
        relative: PathBuf,
        action_tx: &mpsc::Sender<OrderedAction>,
        pass_token: &CancellationToken,
    ) -> CheckOutcome {
        let path_token = self.skip_set.token_for(&relative);
        let check_token = pass_token.child_token();

        // Fold the per-path handle into the token the comparison watches
        let forward_path_cancel = async {
            path_token.cancelled().await;
            check_token.cancel();
            std::future::pending::<Infallible>().await
        };

        let detected = tokio::select! {
            result = self.detect_change(&relative, &check_token) => result,
            never = forward_path_cancel => match never {},
        };

        let event = match detected {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!("'{}' already in sync", relative.display());
                return CheckOutcome::InSync;
            }
            Err(e) if e.is_cancelled() => {
                debug!("Check of '{}' superseded", relative.display());
                return CheckOutcome::Skipped;
            }
            Err(e) => {
                warn!("Could not check '{}': {}", relative.display(), e);
                return CheckOutcome::Failed;
            }
        };

        if check_token.is_cancelled() || path_token.is_cancelled() {
            debug!("Check of '{}' superseded", relative.display());
            return CheckOutcome::Skipped;
        }

        // A full channel can hold the send back; a live event for the path
        // arriving meanwhile still wins
        let outcome = tokio::select! {
            biased;
            _ = check_token.cancelled() => CheckOutcome::Skipped,
            _ = path_token.cancelled() => CheckOutcome::Skipped,
            sent = action_tx.send(OrderedAction::single(event.clone())) => match sent {
                Ok(()) => CheckOutcome::Emitted,
                Err(_) => CheckOutcome::Skipped,
            },
        };
        match outcome {
            CheckOutcome::Emitted => debug!("Initial pass queued {}", event),
            _ => debug!("Check of '{}' superseded while queueing", relative.display()),
        }
        outcome
    }

    /// Missing in the replica, different size, then different contents
    async fn detect_change(&self, relative: &Path, cancel: &CancellationToken) -> Result<Option<ChangeEvent>> {
        let source = self.config.source_path(relative);
        let destination = self.config.destination_path(relative);

        let dest_metadata = match fs::metadata(&destination).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(Some(ChangeEvent::created(relative))),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Some(ChangeEvent::created(relative))),
            Err(e) => return Err(ReplicaError::path_error(&destination, e.to_string())),
        };
        let source_metadata = fs::metadata(&source)
            .await
            .map_err(|e| ReplicaError::path_error(&source, e.to_string()))?;

        if source_metadata.len() != dest_metadata.len() {
            return Ok(Some(ChangeEvent::changed(relative)));
        }

        if self.file_ops.contents_match(&source, &destination, cancel).await? {
            Ok(None)
        } else {
            Ok(Some(ChangeEvent::changed(relative)))
        }
    }
}
