use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use replica_sync::{relative_to, ChangeEvent, ReplicaError};

/// Rename cookies remembered after a From/To pair, so the trailing
/// `Name(Both)` some backends add is not replayed
const COMPLETED_RENAMES_KEPT: usize = 64;

/// Live change notifications for a folder tree, as relative `ChangeEvent`s
pub struct NotifyChangeSource {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

impl NotifyChangeSource {
    /// Start watching `root` recursively
    pub fn start(root: &Path, capacity: usize) -> Result<(Self, mpsc::Receiver<ChangeEvent>)> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Cannot watch {}", root.display()))?;
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let mut tracker = RenameTracker::new(root.clone());
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in tracker.translate(event) {
                    trace!("Raw change {}", change);
                    if tx.blocking_send(change).is_err() {
                        debug!("Change receiver closed");
                        return;
                    }
                }
            }
            Err(e) => warn!("File watcher error: {}", e),
        })
        .map_err(|e| ReplicaError::Watch(e.to_string()))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| ReplicaError::Watch(format!("{}: {}", root.display(), e)))?;
        info!("Watching {}", root.display());

        Ok((
            Self {
                root,
                _watcher: watcher,
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Turns notify events into change events, pairing split renames
#[derive(Debug)]
pub struct RenameTracker {
    root: PathBuf,
    pending_from: Option<(PathBuf, Option<usize>)>,
    completed: VecDeque<usize>,
}

impl RenameTracker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pending_from: None,
            completed: VecDeque::new(),
        }
    }

    pub fn translate(&mut self, event: Event) -> Vec<ChangeEvent> {
        let mut changes = Vec::new();
        let tracker = event.attrs.tracker();

        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                self.flush_pending(&mut changes);
                if let Some(path) = event.paths.into_iter().next() {
                    self.pending_from = Some((path, tracker));
                }
                return changes;
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                let Some(to) = event.paths.into_iter().next() else {
                    return changes;
                };
                match self.pending_from.take() {
                    Some((from, from_tracker))
                        if from_tracker.is_none() || tracker.is_none() || from_tracker == tracker =>
                    {
                        if let Some(cookie) = tracker {
                            self.remember(cookie);
                        }
                        self.push_rename(&from, &to, &mut changes);
                    }
                    pending => {
                        self.pending_from = pending;
                        self.flush_pending(&mut changes);
                        self.push(&to, ChangeEvent::created, &mut changes);
                    }
                }
                return changes;
            }
            _ => {}
        }

        self.flush_pending(&mut changes);

        match event.kind {
            EventKind::Create(_) => {
                for path in &event.paths {
                    self.push(path, ChangeEvent::created, &mut changes);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if tracker.is_some_and(|cookie| self.forget(cookie)) {
                    trace!("Rename already reported through From/To");
                } else if let [from, to] = event.paths.as_slice() {
                    self.push_rename(from, to, &mut changes);
                } else {
                    debug!("Dropping rename with {} paths", event.paths.len());
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                // Backend could not tell which side of a rename this is
                for path in &event.paths {
                    if path.exists() {
                        self.push(path, ChangeEvent::created, &mut changes);
                    } else {
                        self.push(path, ChangeEvent::deleted, &mut changes);
                    }
                }
            }
            EventKind::Modify(_) | EventKind::Any => {
                for path in &event.paths {
                    self.push(path, ChangeEvent::changed, &mut changes);
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    self.push(path, ChangeEvent::deleted, &mut changes);
                }
            }
            EventKind::Access(_) | EventKind::Other => {}
        }

        changes
    }

    /// A rename whose other half never arrived left the tree
    fn flush_pending(&mut self, changes: &mut Vec<ChangeEvent>) {
        if let Some((from, _)) = self.pending_from.take() {
            self.push(&from, ChangeEvent::deleted, changes);
        }
    }

    fn push(&self, path: &Path, make: fn(PathBuf) -> ChangeEvent, changes: &mut Vec<ChangeEvent>) {
        match relative_to(path, &self.root) {
            Some(relative) => changes.push(make(relative)),
            None => debug!("Ignoring change outside the watched tree: {}", path.display()),
        }
    }

    fn push_rename(&self, from: &Path, to: &Path, changes: &mut Vec<ChangeEvent>) {
        match (relative_to(from, &self.root), relative_to(to, &self.root)) {
            (Some(from), Some(to)) => changes.push(ChangeEvent::renamed(from, to)),
            // Moved in from elsewhere
            (None, Some(to)) => changes.push(ChangeEvent::created(to)),
            // Moved out of the tree
            (Some(from), None) => changes.push(ChangeEvent::deleted(from)),
            (None, None) => debug!("Ignoring rename outside the watched tree"),
        }
    }

    fn remember(&mut self, cookie: usize) {
        if self.completed.len() == COMPLETED_RENAMES_KEPT {
            self.completed.pop_front();
        }
        self.completed.push_back(cookie);
    }

    fn forget(&mut self, cookie: usize) -> bool {
        match self.completed.iter().position(|&c| c == cookie) {
            Some(index) => {
                self.completed.remove(index);
                true
            }
            None => false,
        }
    }
}
