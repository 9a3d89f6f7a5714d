//! Per-path cancellation shared by the initial pass and live events

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Table of per-path cancellation handles.
///
/// Handles are created on first reference and never removed; a path can
/// only go from "live" to "cancelled". The table only matters while the
/// initial pass runs, so its size is bounded by the source file count.
#[derive(Debug, Default)]
pub struct SkipSet {
    tokens: Mutex<HashMap<PathBuf, CancellationToken>>,
}

impl SkipSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `path`, created if this is the first reference
    pub fn token_for(&self, path: &Path) -> CancellationToken {
        self.tokens
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }

    /// Mark `path` as superseded by live data
    pub fn cancel(&self, path: &Path) {
        self.token_for(path).cancel();
    }

    pub fn is_cancelled(&self, path: &Path) -> bool {
        self.tokens
            .lock()
            .get(path)
            .map(CancellationToken::is_cancelled)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}
