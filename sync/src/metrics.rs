//! Counters for the replication pipeline

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};

use crate::event::ChangeKind;
use crate::scanner::ScanSummary;

/// Live counters shared by the scanner and the driver
#[derive(Debug)]
pub struct ReplicationMetrics {
    started: Instant,
    copies: AtomicU64,
    directories_created: AtomicU64,
    renames: AtomicU64,
    deletes: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
    scan_checked: AtomicU64,
    scan_emitted: AtomicU64,
    scan_cancelled: AtomicU64,
    windows_flushed: AtomicU64,
}

impl Default for ReplicationMetrics {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            copies: AtomicU64::new(0),
            directories_created: AtomicU64::new(0),
            renames: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            scan_checked: AtomicU64::new(0),
            scan_emitted: AtomicU64::new(0),
            scan_cancelled: AtomicU64::new(0),
            windows_flushed: AtomicU64::new(0),
        }
    }
}

impl ReplicationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one successfully applied step
    pub fn record_applied(&self, kind: ChangeKind, is_directory: bool) {
        let counter = match kind {
            ChangeKind::Created | ChangeKind::Changed if is_directory => &self.directories_created,
            ChangeKind::Created | ChangeKind::Changed => &self.copies,
            ChangeKind::Renamed => &self.renames,
            ChangeKind::Deleted => &self.deletes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A step that had nothing to act on (source vanished before apply)
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold in the counters of a finished initial pass
    pub fn record_scan(&self, summary: &ScanSummary) {
        self.scan_checked.fetch_add(summary.checked, Ordering::Relaxed);
        self.scan_emitted.fetch_add(summary.emitted, Ordering::Relaxed);
        self.scan_cancelled.fetch_add(summary.skipped, Ordering::Relaxed);
        self.failures.fetch_add(summary.failed, Ordering::Relaxed);
    }

    pub fn record_windows(&self, count: u64) {
        self.windows_flushed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime: self.started.elapsed(),
            copies: self.copies.load(Ordering::Relaxed),
            directories_created: self.directories_created.load(Ordering::Relaxed),
            renames: self.renames.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            scan_checked: self.scan_checked.load(Ordering::Relaxed),
            scan_emitted: self.scan_emitted.load(Ordering::Relaxed),
            scan_cancelled: self.scan_cancelled.load(Ordering::Relaxed),
            windows_flushed: self.windows_flushed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ReplicationMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    #[serde(with = "humantime_serde")]
    pub uptime: Duration,
    pub copies: u64,
    pub directories_created: u64,
    pub renames: u64,
    pub deletes: u64,
    pub failures: u64,
    pub skipped: u64,
    pub scan_checked: u64,
    pub scan_emitted: u64,
    pub scan_cancelled: u64,
    pub windows_flushed: u64,
}

impl MetricsSnapshot {
    /// Steps that changed the destination
    pub fn applied(&self) -> u64 {
        self.copies + self.directories_created + self.renames + self.deletes
    }

    /// One-line summary for the shutdown log
    pub fn summary(&self) -> String {
        format!(
            "Replication summary: {} applied ({} copied, {} dirs, {} moved, {} deleted), {} failed, {} skipped; \
             initial pass checked {} and queued {} ({} superseded); {} windows in {:.1}s",
            self.applied(),
            self.copies,
            self.directories_created,
            self.renames,
            self.deletes,
            self.failures,
            self.skipped,
            self.scan_checked,
            self.scan_emitted,
            self.scan_cancelled,
            self.windows_flushed,
            self.uptime.as_secs_f64(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ChangeKind::Created, false)]
    #[case(ChangeKind::Changed, false)]
    #[case(ChangeKind::Created, true)]
    #[case(ChangeKind::Renamed, false)]
    #[case(ChangeKind::Deleted, true)]
    fn test_each_applied_step_counts_once(#[case] kind: ChangeKind, #[case] is_directory: bool) {
        let metrics = ReplicationMetrics::new();
        metrics.record_applied(kind, is_directory);
        assert_eq!(metrics.snapshot().applied(), 1);
    }

    #[test]
    fn test_snapshot_buckets() {
        let metrics = ReplicationMetrics::new();
        metrics.record_applied(ChangeKind::Created, false);
        metrics.record_applied(ChangeKind::Changed, false);
        metrics.record_applied(ChangeKind::Created, true);
        metrics.record_applied(ChangeKind::Renamed, true);
        metrics.record_failure();
        metrics.record_scan(&ScanSummary {
            checked: 2,
            emitted: 1,
            in_sync: 1,
            ..Default::default()
        });
        metrics.record_windows(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.copies, 2);
        assert_eq!(snapshot.directories_created, 1);
        assert_eq!(snapshot.renames, 1);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.scan_checked, 2);
        assert_eq!(snapshot.scan_emitted, 1);
        assert_eq!(snapshot.windows_flushed, 3);
        assert!(snapshot.summary().starts_with("Replication summary: 4 applied"));
    }
}
