//! Ordered groups of change events
//!
//! Example: `mv a.txt b.txt; touch a.txt` inside one window must reach the
//! replica as "rename a.txt to b.txt" followed by "create a.txt". Applying
//! the create first would be clobbered by the rename.

use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::event::ChangeEvent;

/// One or two events that must be applied in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedAction {
    steps: Vec<ChangeEvent>,
}

impl OrderedAction {
    /// An action made of a single event
    pub fn single(event: ChangeEvent) -> Self {
        Self { steps: vec![event] }
    }

    /// An action whose `first` event must be applied before `second`
    pub fn pair(first: ChangeEvent, second: ChangeEvent) -> Self {
        Self {
            steps: vec![first, second],
        }
    }

    pub fn first(&self) -> &ChangeEvent {
        &self.steps[0]
    }

    pub fn second(&self) -> Option<&ChangeEvent> {
        self.steps.get(1)
    }

    /// Events in application order
    pub fn events(&self) -> &[ChangeEvent] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always `false`: every constructor takes at least one event
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Every relative path touched by any step
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.steps.iter().flat_map(|ev| ev.paths())
    }
}

impl From<ChangeEvent> for OrderedAction {
    fn from(event: ChangeEvent) -> Self {
        Self::single(event)
    }
}

impl<'a> IntoIterator for &'a OrderedAction {
    type Item = &'a ChangeEvent;
    type IntoIter = std::slice::Iter<'a, ChangeEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}
