//! Applies merged actions to the replica
//!
//! The driver owns the whole pipeline for one source/replica pair: it taps
//! the raw change stream to cancel stale initial-pass checks, feeds the
//! windowed aggregator, runs the initial pass alongside it, and consumes
//! both outputs from one channel so that destination mutations are
//! strictly serialized.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::action::OrderedAction;
use crate::config::ReplicaConfig;
use crate::error::{ReplicaError, Result};
use crate::event::{ChangeEvent, ChangeKind};
use crate::file_ops::{FileOperations, LocalFileOperations};
use crate::merge::EventMerger;
use crate::metrics::{MetricsSnapshot, ReplicationMetrics};
use crate::probe::{LocalProbe, PathKind, PathProbe};
use crate::scanner::InitialScanner;
use crate::skip_set::SkipSet;
use crate::window::WindowedAggregator;

/// What a single step did to the replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Applied { directory: bool },
    NothingToDo,
}

/// Replication pipeline for one source/replica pair
pub struct ReplicationDriver {
    config: Arc<ReplicaConfig>,
    file_ops: Arc<dyn FileOperations>,
    probe: Arc<dyn PathProbe>,
    skip_set: Arc<SkipSet>,
    metrics: Arc<ReplicationMetrics>,
    initial_pass_done: Arc<AtomicBool>,
}

impl std::fmt::Debug for ReplicationDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationDriver")
            .field("config", &self.config)
            .field("skip_set", &self.skip_set)
            .finish_non_exhaustive()
    }
}

impl ReplicationDriver {
    /// Driver working on the local disk
    pub fn new(config: ReplicaConfig) -> Self {
        let file_ops = Arc::new(LocalFileOperations::new(config.buffer_size));
        Self::with_components(config, file_ops, Arc::new(LocalProbe))
    }

    pub fn with_components(
        config: ReplicaConfig,
        file_ops: Arc<dyn FileOperations>,
        probe: Arc<dyn PathProbe>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            file_ops,
            probe,
            skip_set: Arc::new(SkipSet::new()),
            metrics: Arc::new(ReplicationMetrics::new()),
            initial_pass_done: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<ReplicationMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn skip_set(&self) -> Arc<SkipSet> {
        Arc::clone(&self.skip_set)
    }

    /// Whether the initial pass of the current run is over
    pub fn initial_pass_finished(&self) -> bool {
        self.initial_pass_done.load(Ordering::SeqCst)
    }

    /// Run the pipeline until `shutdown` fires.
    ///
    /// `raw_rx` carries live events with paths relative to the source root.
    /// If the raw stream ends and the initial pass is over, nothing can
    /// produce work any more and the driver returns on its own.
    #[instrument(skip_all, fields(
        source = %self.config.source.display(),
        destination = %self.config.destination.display(),
    ))]
    pub async fn run(
        &self,
        raw_rx: mpsc::Receiver<ChangeEvent>,
        shutdown: CancellationToken,
    ) -> Result<MetricsSnapshot> {
        self.config.validate()?;

        let capacity = self.config.channel_capacity.max(1);
        let (window_tx, window_rx) = mpsc::channel(capacity);
        let (action_tx, mut action_rx) = mpsc::channel(capacity);
        let pass_token = shutdown.child_token();

        let tap = tokio::spawn(tap_raw_events(
            raw_rx,
            window_tx,
            Arc::clone(&self.skip_set),
            Arc::clone(&self.initial_pass_done),
            shutdown.clone(),
        ));

        let merger = EventMerger::new(
            self.config.source.clone(),
            self.config.destination.clone(),
            Arc::clone(&self.probe),
        );
        let aggregator = WindowedAggregator::new(self.config.sync_period, merger);
        let windows = tokio::spawn(aggregator.run(window_rx, action_tx.clone(), pass_token.clone()));

        let scanner = InitialScanner::new(
            Arc::clone(&self.config),
            Arc::clone(&self.file_ops),
            Arc::clone(&self.skip_set),
        );
        let initial_pass = tokio::spawn({
            let pass_token = pass_token.clone();
            let done = Arc::clone(&self.initial_pass_done);
            async move {
                let summary = scanner.run(action_tx, pass_token).await;
                done.store(true, Ordering::SeqCst);
                summary
            }
        });

        info!("Replication started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting changes");
                    break;
                }
                action = action_rx.recv() => match action {
                    Some(action) => self.apply_action(&action).await,
                    None => {
                        info!("All change producers finished");
                        break;
                    }
                },
            }
        }

        pass_token.cancel();
        drop(action_rx);

        if let Err(e) = tap.await {
            warn!("Event tap task failed: {}", e);
        }
        match windows.await {
            Ok(count) => self.metrics.record_windows(count),
            Err(e) => warn!("Aggregator task failed: {}", e),
        }
        match initial_pass.await {
            Ok(summary) => self.metrics.record_scan(&summary),
            Err(e) => warn!("Initial pass task failed: {}", e),
        }

        let snapshot = self.metrics.snapshot();
        info!("{}", snapshot.summary());
        Ok(snapshot)
    }

    /// Apply every step of `action` in order.
    ///
    /// A failed step does not stop the following one.
    pub async fn apply_action(&self, action: &OrderedAction) {
        for event in action {
            self.supersede_initial_checks(event);
            self.apply_event(event).await;
        }
    }

    /// Apply one event to the replica. Returns whether the replica changed.
    pub async fn apply_event(&self, event: &ChangeEvent) -> bool {
        let result = match event.kind() {
            ChangeKind::Created | ChangeKind::Changed => self.replicate(event.path()).await,
            ChangeKind::Renamed => match event.old_path() {
                Some(old_path) => self.apply_rename(old_path, event.path()).await,
                None => Err(ReplicaError::path_error(event.path(), "Rename without a previous name")),
            },
            ChangeKind::Deleted => self
                .file_ops
                .delete_path(&self.config.destination_path(event.path()))
                .await
                .map(|()| StepOutcome::Applied { directory: false }),
        };

        match result {
            Ok(StepOutcome::Applied { directory }) => {
                info!(kind = %event.kind(), path = %event.path().display(), "Success");
                self.metrics.record_applied(event.kind(), directory);
                true
            }
            Ok(StepOutcome::NothingToDo) => {
                debug!("{} no longer exists in the source, skipping", event.path().display());
                self.metrics.record_skipped();
                false
            }
            Err(e) => {
                warn!(kind = %event.kind(), path = %event.path().display(), error = %e, "Fail");
                self.metrics.record_failure();
                false
            }
        }
    }

    fn supersede_initial_checks(&self, event: &ChangeEvent) {
        if self.initial_pass_done.load(Ordering::SeqCst) {
            return;
        }
        for path in event.paths() {
            self.skip_set.cancel(path);
        }
    }

    /// Mirror whatever currently sits at `relative` in the source
    async fn replicate(&self, relative: &Path) -> Result<StepOutcome> {
        let source = self.config.source_path(relative);
        let destination = self.config.destination_path(relative);

        match self.probe.kind(&source) {
            PathKind::File => {
                self.file_ops.copy_file(&source, &destination).await?;
                Ok(StepOutcome::Applied { directory: false })
            }
            PathKind::Directory => {
                self.file_ops.create_dir(&destination).await?;
                Ok(StepOutcome::Applied { directory: true })
            }
            PathKind::Missing => Ok(StepOutcome::NothingToDo),
        }
    }

    async fn apply_rename(&self, old_relative: &Path, new_relative: &Path) -> Result<StepOutcome> {
        let old_destination = self.config.destination_path(old_relative);
        let new_destination = self.config.destination_path(new_relative);

        match self.file_ops.move_path(&old_destination, &new_destination).await {
            Ok(()) => Ok(StepOutcome::Applied { directory: false }),
            Err(e) if self.probe.kind(&old_destination) == PathKind::Missing => {
                // The replica never had the old name; take the new one from the source
                debug!(
                    "'{}' missing from replica ({}), copying '{}' from source",
                    old_relative.display(),
                    e,
                    new_relative.display()
                );
                self.replicate_tree(new_relative).await
            }
            Err(e) => Err(e),
        }
    }

    async fn replicate_tree(&self, relative: &Path) -> Result<StepOutcome> {
        let source = self.config.source_path(relative);
        if self.probe.kind(&source) != PathKind::Directory {
            return self.replicate(relative).await;
        }

        let destination = self.config.destination_path(relative);
        self.file_ops.create_dir(&destination).await?;

        // Each file is copied on its own; one bad file does not stop the rest
        let files = self.probe.files_under(&source);
        let mut failed = 0usize;
        for file in &files {
            let Ok(inner) = file.strip_prefix(&self.config.source) else {
                continue;
            };
            if let Err(e) = self.file_ops.copy_file(file, &self.config.destination_path(inner)).await {
                warn!(kind = %ChangeKind::Created, path = %inner.display(), error = %e, "Fail");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(ReplicaError::copy_error(
                &source,
                &destination,
                format!("{} of {} files could not be copied", failed, files.len()),
            ));
        }
        Ok(StepOutcome::Applied { directory: true })
    }
}

/// Cancel stale initial-pass checks for every raw event, then hand the
/// event on to the aggregator.
async fn tap_raw_events(
    mut raw_rx: mpsc::Receiver<ChangeEvent>,
    window_tx: mpsc::Sender<ChangeEvent>,
    skip_set: Arc<SkipSet>,
    initial_pass_done: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = raw_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        if !initial_pass_done.load(Ordering::SeqCst) {
            for path in event.paths() {
                skip_set.cancel(path);
            }
        }

        if window_tx.send(event).await.is_err() {
            break;
        }
    }
}
