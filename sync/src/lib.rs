//! One-way folder replication library
//!
//! Keeps a replica folder in step with a source folder:
//! - Live change events buffered into fixed windows and merged into a
//!   minimal set of ordered actions
//! - A concurrent, cancellable initial pass comparing every source file
//!   with its replica
//! - A single consumer applying both streams to the replica

pub mod action;
pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod file_ops;
pub mod merge;
pub mod metrics;
pub mod probe;
pub mod scanner;
pub mod skip_set;
pub mod window;

// Re-export main types and functions
pub use action::OrderedAction;
pub use config::ReplicaConfig;
pub use driver::ReplicationDriver;
pub use error::{ReplicaError, Result};
pub use event::{relative_to, ChangeEvent, ChangeKind};
pub use file_ops::{FileOperations, LocalFileOperations};
pub use merge::EventMerger;
pub use metrics::{MetricsSnapshot, ReplicationMetrics};
pub use probe::{LocalProbe, MemoryProbe, PathKind, PathProbe};
pub use scanner::{InitialScanner, ScanSummary};
pub use skip_set::SkipSet;
pub use window::WindowedAggregator;
