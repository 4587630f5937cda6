//! Observed-remove set.
//!
//! Each add mints a fresh instance id for its element; a remove tombstones
//! exactly the ids its author had observed. Ids and tombstones are kept per
//! element, so a remove only ever affects the element it names. An element is
//! present while at least one of its ids is not tombstoned, so a remove never
//! cancels an add it did not see.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use loam_types::UniqueTimestamp;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SetAction {
    Add,
    Remove,
}

/// One set operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOp<T> {
    pub action: SetAction,
    pub element: T,
    pub ids: BTreeSet<String>,
}

/// A presence transition caused by [`OperationalSet::apply`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetChange<T> {
    Added(T),
    Removed(T),
}

type Listener<T> = Box<dyn FnMut(&SetChange<T>) + Send>;

#[derive(Default)]
struct Entry {
    ids: BTreeSet<String>,
    tombstones: BTreeSet<String>,
}

impl Entry {
    fn live_ids(&self) -> impl Iterator<Item = &String> {
        self.ids.difference(&self.tombstones)
    }

    fn is_live(&self) -> bool {
        self.live_ids().next().is_some()
    }
}

/// Observed-remove set over elements `T`.
pub struct OperationalSet<T> {
    elements: BTreeMap<T, Entry>,
    listener: Option<Listener<T>>,
}

impl<T: Ord + Clone> OperationalSet<T> {
    pub fn new() -> Self {
        Self {
            elements: BTreeMap::new(),
            listener: None,
        }
    }

    /// Install a callback invoked on every presence transition.
    pub fn set_listener(&mut self, listener: impl FnMut(&SetChange<T>) + Send + 'static) {
        self.listener = Some(Box::new(listener));
    }

    /// An operation adding `element` under a new instance id.
    pub fn create_add_op(&self, element: T) -> SetOp<T> {
        SetOp {
            action: SetAction::Add,
            element,
            ids: BTreeSet::from([UniqueTimestamp::now().to_string()]),
        }
    }

    /// An operation removing every live id of `element`, or `None` if it has
    /// none.
    pub fn create_remove_op(&self, element: T) -> Option<SetOp<T>> {
        let ids: BTreeSet<String> = self.live_ids(&element).cloned().collect();
        if ids.is_empty() {
            return None;
        }
        Some(SetOp {
            action: SetAction::Remove,
            element,
            ids,
        })
    }

    /// Fold an operation into the set. Returns the presence transition it
    /// caused, if any.
    pub fn apply(&mut self, op: &SetOp<T>) -> Option<SetChange<T>> {
        if op.ids.is_empty() {
            return None;
        }
        let entry = self.elements.entry(op.element.clone()).or_default();
        let was_present = entry.is_live();
        match op.action {
            SetAction::Add => entry.ids.extend(op.ids.iter().cloned()),
            SetAction::Remove => entry.tombstones.extend(op.ids.iter().cloned()),
        }

        let change = match (was_present, entry.is_live()) {
            (false, true) => SetChange::Added(op.element.clone()),
            (true, false) => SetChange::Removed(op.element.clone()),
            _ => return None,
        };
        if let Some(listener) = self.listener.as_mut() {
            listener(&change);
        }
        Some(change)
    }

    pub fn has(&self, element: &T) -> bool {
        self.elements.get(element).is_some_and(Entry::is_live)
    }

    /// Present elements, in order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.elements
            .iter()
            .filter(|(_, entry)| entry.is_live())
            .map(|(element, _)| element)
    }

    /// Ids of `element` that are not tombstoned.
    pub fn live_ids<'a>(&'a self, element: &T) -> impl Iterator<Item = &'a String> {
        self.elements
            .get(element)
            .into_iter()
            .flat_map(Entry::live_ids)
    }

    pub fn len(&self) -> usize {
        self.values().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Ord + Clone> Default for OperationalSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for OperationalSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationalSet")
            .field(
                "present",
                &self
                    .elements
                    .iter()
                    .filter(|(_, e)| e.is_live())
                    .map(|(k, _)| k)
                    .collect::<Vec<_>>(),
            )
            .field(
                "tombstones",
                &self.elements.values().map(|e| e.tombstones.len()).sum::<usize>(),
            )
            .finish()
    }
}
