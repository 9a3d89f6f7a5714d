//! Reduction of one window of raw change events into ordered actions
//!
//! Events for the same path are collapsed (the last one wins), with special
//! handling for renames, which name two paths:
//! - a rename whose old name was created or changed earlier in the window
//!   becomes a create of the new name;
//! - a rename whose old name sees independent activity later in the window
//!   is paired with that activity, rename first;
//! - any other rename is kept and will move the item in the replica.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::action::OrderedAction;
use crate::event::{relative_to, ChangeEvent, ChangeKind};
use crate::probe::{PathKind, PathProbe};

/// Per-window table holding the surviving event for each path
#[derive(Debug, Default)]
struct PendingOps {
    entries: HashMap<PathBuf, Pending>,
    next_seq: u64,
}

#[derive(Debug)]
struct Pending {
    /// Arrival position of the event that last wrote this entry
    seq: u64,
    event: ChangeEvent,
}

impl PendingOps {
    fn record(&mut self, event: ChangeEvent) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries
            .insert(event.path().to_path_buf(), Pending { seq, event });
    }

    fn get(&self, path: &Path) -> Option<&ChangeEvent> {
        self.entries.get(path).map(|pending| &pending.event)
    }

    fn remove(&mut self, path: &Path) -> Option<ChangeEvent> {
        self.entries.remove(path).map(|pending| pending.event)
    }

    /// Final reduction: pair renames with later activity on their old name.
    ///
    /// Actions come out in the order their entries were last written, so
    /// chained renames in one window are replayed in arrival order.
    fn into_actions(mut self) -> Vec<OrderedAction> {
        let mut renames: Vec<(u64, PathBuf)> = self
            .entries
            .iter()
            .filter(|(_, pending)| pending.event.is_rename())
            .map(|(path, pending)| (pending.seq, path.clone()))
            .collect();
        renames.sort();

        let mut actions: Vec<(u64, OrderedAction)> = Vec::with_capacity(self.entries.len());

        for (seq, path) in renames {
            // Already consumed as the second step of an earlier rename
            let Some(rename) = self.entries.remove(&path).map(|pending| pending.event) else {
                continue;
            };

            let follow_up = rename.old_path().and_then(|old| self.entries.remove(old));
            let action = match follow_up {
                Some(follow_up) => OrderedAction::pair(rename, follow_up.event),
                None => OrderedAction::single(rename),
            };
            actions.push((seq, action));
        }

        actions.extend(
            self.entries
                .into_values()
                .map(|pending| (pending.seq, OrderedAction::single(pending.event))),
        );
        actions.sort_by_key(|(seq, _)| *seq);

        actions.into_iter().map(|(_, action)| action).collect()
    }
}

/// Reduces the raw events of one window to a minimal set of actions.
///
/// The merge looks at the filesystem as it is when the window closes, which
/// is what lets it drop events for items that no longer exist.
#[derive(Clone)]
pub struct EventMerger {
    source_root: PathBuf,
    destination_root: PathBuf,
    probe: Arc<dyn PathProbe>,
}

impl std::fmt::Debug for EventMerger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventMerger")
            .field("source_root", &self.source_root)
            .field("destination_root", &self.destination_root)
            .finish_non_exhaustive()
    }
}

impl EventMerger {
    pub fn new(
        source_root: impl Into<PathBuf>,
        destination_root: impl Into<PathBuf>,
        probe: Arc<dyn PathProbe>,
    ) -> Self {
        Self {
            source_root: source_root.into(),
            destination_root: destination_root.into(),
            probe,
        }
    }

    /// Merge the events of one window, given in arrival order
    pub fn merge<I>(&self, events: I) -> Vec<OrderedAction>
    where
        I: IntoIterator<Item = ChangeEvent>,
    {
        let mut ops = PendingOps::default();

        for event in events {
            debug!("{}", event);
            self.fold(event, &mut ops);
        }

        ops.into_actions()
    }

    fn fold(&self, event: ChangeEvent, ops: &mut PendingOps) {
        match self.probe.kind(&self.source_root.join(event.path())) {
            PathKind::File => self.handle_file_event(event, ops),
            PathKind::Directory => self.handle_directory_event(event, ops),
            PathKind::Missing if event.kind() == ChangeKind::Deleted => {
                // Only worth propagating if the replica still has the item
                match self.probe.kind(&self.destination_root.join(event.path())) {
                    PathKind::File => self.handle_file_event(event, ops),
                    PathKind::Directory => self.handle_directory_event(event, ops),
                    PathKind::Missing => {
                        trace!("Dropping delete of '{}', never replicated", event.path().display());
                    }
                }
            }
            PathKind::Missing => {
                trace!("Dropping {}, path no longer exists", event);
            }
        }
    }

    fn handle_file_event(&self, event: ChangeEvent, ops: &mut PendingOps) {
        if event.is_rename() {
            let merged = Self::merge_rename(event, ops);
            ops.record(merged);
        } else {
            ops.record(event);
        }
    }

    fn handle_directory_event(&self, event: ChangeEvent, ops: &mut PendingOps) {
        match event.kind() {
            ChangeKind::Created => self.record_directory_created(event, ops),
            ChangeKind::Renamed => {
                let merged = Self::merge_rename(event, ops);
                if merged.kind() == ChangeKind::Created {
                    self.record_directory_created(merged, ops);
                } else {
                    ops.record(merged);
                }
            }
            // Directory metadata carries nothing to replicate
            ChangeKind::Changed => {}
            ChangeKind::Deleted => ops.record(event),
        }
    }

    /// A created directory may already hold files by the time the window
    /// closes, and their own events may have been missed.
    fn record_directory_created(&self, event: ChangeEvent, ops: &mut PendingOps) {
        let dir = self.source_root.join(event.path());
        for file in self.probe.files_under(&dir) {
            if let Some(relative) = relative_to(&file, &self.source_root) {
                ops.record(ChangeEvent::created(relative));
            }
        }
        ops.record(event);
    }

    /// Fold a rename into earlier activity on its old name.
    ///
    /// "create or change X, then rename X to Y" nets out to "create Y".
    fn merge_rename(event: ChangeEvent, ops: &mut PendingOps) -> ChangeEvent {
        let Some(old_path) = event.old_path() else {
            return event;
        };

        let absorbed = matches!(
            ops.get(old_path).map(ChangeEvent::kind),
            Some(ChangeKind::Created | ChangeKind::Changed)
        );

        if absorbed {
            ops.remove(old_path);
            ChangeEvent::created(event.path())
        } else {
            event
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::MemoryProbe;
    use proptest::prelude::*;
    use rstest::*;

    const SOURCE: &str = "/source";
    const DEST: &str = "/replica";

    fn src(rel: &str) -> PathBuf {
        Path::new(SOURCE).join(rel)
    }

    fn dst(rel: &str) -> PathBuf {
        Path::new(DEST).join(rel)
    }

    fn merger(probe: MemoryProbe) -> EventMerger {
        EventMerger::new(SOURCE, DEST, Arc::new(probe))
    }

    /// Source holds the given files
    fn files(names: &[&str]) -> MemoryProbe {
        names
            .iter()
            .fold(MemoryProbe::new(), |probe, name| probe.with_file(src(name)))
    }

    fn find<'a>(actions: &'a [OrderedAction], path: &str) -> Vec<&'a OrderedAction> {
        actions
            .iter()
            .filter(|action| action.first().path() == Path::new(path))
            .collect()
    }

    #[fixture]
    fn ab_files() -> EventMerger {
        merger(files(&["a.txt", "b.txt"]))
    }

    #[rstest]
    fn test_duplicates_collapse_to_last_event(ab_files: EventMerger) {
        let merged = ab_files.merge(vec![
            ChangeEvent::created("a.txt"),
            ChangeEvent::created("b.txt"),
            ChangeEvent::changed("a.txt"),
        ]);

        assert_eq!(merged.len(), 2);
        let a = find(&merged, "a.txt");
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].first().kind(), ChangeKind::Changed);
        assert_eq!(find(&merged, "b.txt").len(), 1);
    }

    #[rstest]
    fn test_create_after_rename_is_ordered_pair(ab_files: EventMerger) {
        let merged = ab_files.merge(vec![
            ChangeEvent::renamed("a.txt", "b.txt"),
            ChangeEvent::created("a.txt"),
        ]);

        assert_eq!(merged.len(), 1);
        let action = &merged[0];
        assert_eq!(action.len(), 2);
        assert_eq!(action.first(), &ChangeEvent::renamed("a.txt", "b.txt"));
        assert_eq!(action.second(), Some(&ChangeEvent::created("a.txt")));
    }

    #[rstest]
    fn test_rename_after_change_becomes_create(ab_files: EventMerger) {
        let merged = ab_files.merge(vec![
            ChangeEvent::changed("a.txt"),
            ChangeEvent::renamed("a.txt", "b.txt"),
            ChangeEvent::created("a.txt"),
        ]);

        assert_eq!(merged.len(), 2);
        assert!(merged.iter().all(|action| action.len() == 1));
        assert!(merged.contains(&OrderedAction::single(ChangeEvent::created("a.txt"))));
        assert!(merged.contains(&OrderedAction::single(ChangeEvent::created("b.txt"))));
    }

    #[rstest]
    fn test_create_on_rename_target_absorbs_rename(ab_files: EventMerger) {
        let merged = ab_files.merge(vec![
            ChangeEvent::renamed("a.txt", "b.txt"),
            ChangeEvent::created("b.txt"),
        ]);

        assert_eq!(merged, vec![OrderedAction::single(ChangeEvent::created("b.txt"))]);
    }

    #[test]
    fn test_plain_rename_is_kept() {
        let merged = merger(files(&["b.txt"])).merge(vec![ChangeEvent::renamed("a.txt", "b.txt")]);
        assert_eq!(merged, vec![OrderedAction::single(ChangeEvent::renamed("a.txt", "b.txt"))]);
    }

    #[test]
    fn test_chained_renames_keep_arrival_order() {
        let merged = merger(files(&["c.txt"])).merge(vec![
            ChangeEvent::renamed("z.txt", "a.txt"),
            ChangeEvent::renamed("a.txt", "c.txt"),
        ]);

        // a.txt no longer exists, so only the second rename survives the probe
        assert_eq!(merged, vec![OrderedAction::single(ChangeEvent::renamed("a.txt", "c.txt"))]);

        let merged = merger(files(&["a.txt", "c.txt"])).merge(vec![
            ChangeEvent::renamed("z.txt", "a.txt"),
            ChangeEvent::renamed("a.txt", "c.txt"),
        ]);
        assert_eq!(
            merged,
            vec![
                OrderedAction::single(ChangeEvent::renamed("z.txt", "a.txt")),
                OrderedAction::single(ChangeEvent::renamed("a.txt", "c.txt")),
            ]
        );
    }

    #[test]
    fn test_rename_swap_is_not_emitted_twice() {
        // mv a b; mv c a -> "a" is paired with the first rename only once
        let merged = merger(files(&["a.txt", "b.txt"])).merge(vec![
            ChangeEvent::renamed("a.txt", "b.txt"),
            ChangeEvent::renamed("c.txt", "a.txt"),
        ]);

        assert_eq!(
            merged,
            vec![OrderedAction::pair(
                ChangeEvent::renamed("a.txt", "b.txt"),
                ChangeEvent::renamed("c.txt", "a.txt"),
            )]
        );
    }

    #[test]
    fn test_created_directory_enumerates_files() {
        let probe = MemoryProbe::new()
            .with_dir(src("dir"))
            .with_dir(src("dir/nested"))
            .with_file(src("dir/one.txt"))
            .with_file(src("dir/nested/two.txt"))
            .with_file(src("elsewhere.txt"));

        let merged = merger(probe).merge(vec![ChangeEvent::created("dir")]);

        assert_eq!(merged.len(), 3);
        assert!(merged.iter().all(|action| action.first().kind() == ChangeKind::Created));
        assert_eq!(find(&merged, "dir").len(), 1);
        assert_eq!(find(&merged, "dir/one.txt").len(), 1);
        assert_eq!(find(&merged, "dir/nested/two.txt").len(), 1);
    }

    #[test]
    fn test_renamed_directory_with_prior_create_enumerates_new_name() {
        let probe = MemoryProbe::new()
            .with_dir(src("old"))
            .with_dir(src("new"))
            .with_file(src("new/inner.txt"));

        let merged = merger(probe).merge(vec![
            ChangeEvent::created("old"),
            ChangeEvent::renamed("old", "new"),
        ]);

        assert_eq!(merged.len(), 2);
        assert!(merged.contains(&OrderedAction::single(ChangeEvent::created("new"))));
        assert!(merged.contains(&OrderedAction::single(ChangeEvent::created("new/inner.txt"))));
    }

    #[test]
    fn test_renamed_directory_without_history_is_kept() {
        let probe = MemoryProbe::new().with_dir(src("new")).with_file(src("new/inner.txt"));
        let merged = merger(probe).merge(vec![ChangeEvent::renamed("old", "new")]);
        assert_eq!(merged, vec![OrderedAction::single(ChangeEvent::renamed("old", "new"))]);
    }

    #[test]
    fn test_directory_change_is_ignored() {
        let probe = MemoryProbe::new().with_dir(src("dir"));
        assert!(merger(probe).merge(vec![ChangeEvent::changed("dir")]).is_empty());
    }

    #[test]
    fn test_delete_propagates_only_if_replicated() {
        let probe = MemoryProbe::new()
            .with_file(dst("x.txt"))
            .with_dir(dst("gone_dir"));

        let merged = merger(probe).merge(vec![
            ChangeEvent::deleted("x.txt"),
            ChangeEvent::deleted("gone_dir"),
            ChangeEvent::deleted("never_replicated.txt"),
        ]);

        assert_eq!(merged.len(), 2);
        assert!(merged.contains(&OrderedAction::single(ChangeEvent::deleted("x.txt"))));
        assert!(merged.contains(&OrderedAction::single(ChangeEvent::deleted("gone_dir"))));
    }

    #[test]
    fn test_create_then_delete_in_window_is_dropped() {
        let merged = merger(MemoryProbe::new()).merge(vec![
            ChangeEvent::created("tmp.txt"),
            ChangeEvent::changed("tmp.txt"),
            ChangeEvent::deleted("tmp.txt"),
        ]);
        assert!(merged.is_empty());
    }

    #[test]
    fn test_empty_window() {
        assert!(merger(MemoryProbe::new()).merge(Vec::new()).is_empty());
    }

    fn simple_event() -> impl Strategy<Value = ChangeEvent> {
        (0..6usize, 0..3u8).prop_map(|(n, kind)| {
            let path = format!("file{}.txt", n);
            match kind {
                0 => ChangeEvent::created(path),
                1 => ChangeEvent::changed(path),
                _ => ChangeEvent::deleted(path),
            }
        })
    }

    proptest! {
        #[test]
        fn prop_one_action_per_path_with_last_event(events in prop::collection::vec(simple_event(), 0..40)) {
            let probe = (0..6).fold(MemoryProbe::new(), |probe, n| {
                probe.with_file(src(&format!("file{}.txt", n)))
            });
            let merged = merger(probe).merge(events.clone());

            let mut last: HashMap<PathBuf, ChangeEvent> = HashMap::new();
            for event in &events {
                last.insert(event.path().to_path_buf(), event.clone());
            }

            prop_assert_eq!(merged.len(), last.len());
            for action in &merged {
                prop_assert_eq!(action.len(), 1);
                prop_assert_eq!(Some(action.first()), last.get(action.first().path()));
            }
        }
    }
}
