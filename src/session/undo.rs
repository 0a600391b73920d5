//! Undo/redo engine.
//!
//! Two stacks of immutable entries. Undoing an entry applies its reversal
//! through the cache's ordinary local-edit path - clock-stamped, persisted,
//! and broadcast like any other mutation, never a bypass - and pushes the
//! computed inverse onto the opposite stack. Inverses are computed from
//! state read at undo time, not from stale values captured at edit time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{Element, ElementId, FieldValue};
use crate::session::cache::SessionCache;

/// Bound on retained history entries per stack.
const HISTORY_CAP: usize = 100;

/// Before-values for one element, keyed by field name. A Null value
/// records "was unset".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldPatch {
    pub id: ElementId,
    pub before: BTreeMap<String, FieldValue>,
}

/// One reversible edit. Each variant carries exactly the data needed to
/// compute its inverse without re-reading the object graph speculatively.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum UndoEntry {
    Add {
        ids: Vec<ElementId>,
    },
    Delete {
        snapshots: Vec<Element>,
    },
    Update {
        patches: Vec<FieldPatch>,
    },
    Move {
        patches: Vec<FieldPatch>,
    },
    Duplicate {
        ids: Vec<ElementId>,
    },
    Group {
        group_id: ElementId,
        child_ids: Vec<ElementId>,
        previous_parents: BTreeMap<ElementId, Option<ElementId>>,
    },
    Ungroup {
        group_snapshot: Element,
        child_ids: Vec<ElementId>,
    },
}

/// Undo and redo stacks.
#[derive(Debug, Default)]
pub struct History {
    undo: Vec<UndoEntry>,
    redo: Vec<UndoEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh user edit. Clears the redo stack.
    pub fn record(&mut self, entry: UndoEntry) {
        if self.undo.len() >= HISTORY_CAP {
            self.undo.remove(0);
        }
        self.undo.push(entry);
        self.redo.clear();
    }

    pub fn pop_undo(&mut self) -> Option<UndoEntry> {
        self.undo.pop()
    }

    pub fn pop_redo(&mut self) -> Option<UndoEntry> {
        self.redo.pop()
    }

    pub fn push_undo(&mut self, entry: UndoEntry) {
        self.undo.push(entry);
    }

    pub fn push_redo(&mut self, entry: UndoEntry) {
        self.redo.push(entry);
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }
}

/// Reverse `entry` against current cache state and return the entry that
/// re-does it. Missing targets are skipped; an entry whose reversal had no
/// effect yields None and nothing is pushed.
pub(crate) fn invert(entry: &UndoEntry, cache: &mut SessionCache) -> Option<UndoEntry> {
    match entry {
        UndoEntry::Add { ids } => delete_as_inverse(ids, cache),

        UndoEntry::Duplicate { ids } => {
            // Treated as Add, but scoped to the duplicated set plus its
            // descendants.
            let live: Vec<ElementId> = ids
                .iter()
                .filter(|id| cache.element(id).is_some())
                .cloned()
                .collect();
            let mut all = live.clone();
            all.extend(cache.state().descendants_of(&live));
            delete_as_inverse(&all, cache)
        }

        UndoEntry::Delete { snapshots } => {
            let mut ids = Vec::new();
            for snapshot in snapshots {
                if cache.apply_local_create(snapshot.clone()).is_ok() {
                    ids.push(snapshot.id.clone());
                }
            }
            if ids.is_empty() {
                None
            } else {
                Some(UndoEntry::Add { ids })
            }
        }

        UndoEntry::Update { patches } => invert_patches(patches, cache)
            .map(|patches| UndoEntry::Update { patches }),

        UndoEntry::Move { patches } => invert_patches(patches, cache)
            .map(|patches| UndoEntry::Move { patches }),

        UndoEntry::Group {
            group_id,
            child_ids,
            previous_parents,
        } => {
            let group_snapshot = cache.element(group_id).cloned();
            for child in child_ids {
                if cache.element(child).is_none() {
                    continue;
                }
                let parent = previous_parents
                    .get(child)
                    .cloned()
                    .flatten()
                    .map(|p| FieldValue::Text(p.to_string()))
                    .unwrap_or(FieldValue::Null);
                cache.apply_local_edit(child, [("parent_id".to_string(), parent)].into());
            }
            cache.apply_local_delete(group_id);

            group_snapshot.map(|group_snapshot| UndoEntry::Ungroup {
                group_snapshot,
                child_ids: child_ids.clone(),
            })
        }

        UndoEntry::Ungroup {
            group_snapshot,
            child_ids,
        } => {
            // Capture each child's *current* parent before mutating, not
            // the stale value from entry creation.
            let mut previous_parents = BTreeMap::new();
            let mut live_children = Vec::new();
            for child in child_ids {
                if let Some(el) = cache.element(child) {
                    previous_parents.insert(child.clone(), el.parent_id());
                    live_children.push(child.clone());
                }
            }

            if cache.apply_local_create(group_snapshot.clone()).is_err() {
                return None;
            }
            let group_id = group_snapshot.id.clone();
            for child in &live_children {
                cache.apply_local_edit(
                    child,
                    [(
                        "parent_id".to_string(),
                        FieldValue::Text(group_id.to_string()),
                    )]
                    .into(),
                );
            }

            Some(UndoEntry::Group {
                group_id,
                child_ids: live_children,
                previous_parents,
            })
        }
    }
}

fn delete_as_inverse(ids: &[ElementId], cache: &mut SessionCache) -> Option<UndoEntry> {
    let mut snapshots = Vec::new();
    for id in ids {
        if let Some(snapshot) = cache.apply_local_delete(id) {
            snapshots.push(snapshot);
        }
    }
    if snapshots.is_empty() {
        None
    } else {
        Some(UndoEntry::Delete { snapshots })
    }
}

fn invert_patches(patches: &[FieldPatch], cache: &mut SessionCache) -> Option<Vec<FieldPatch>> {
    let mut inverse = Vec::new();
    for patch in patches {
        if cache.element(&patch.id).is_none() {
            // Target vanished since the edit; skip, never raise.
            continue;
        }
        let current: BTreeMap<String, FieldValue> = patch
            .before
            .keys()
            .map(|name| (name.clone(), cache.field_or_null(&patch.id, name)))
            .collect();
        cache.apply_local_edit(&patch.id, patch.before.clone());
        inverse.push(FieldPatch {
            id: patch.id.clone(),
            before: current,
        });
    }
    if inverse.is_empty() { None } else { Some(inverse) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_clears_redo() {
        let mut history = History::new();
        history.push_redo(UndoEntry::Add { ids: vec![] });
        history.record(UndoEntry::Add { ids: vec![] });
        assert_eq!(history.redo_depth(), 0);
        assert_eq!(history.undo_depth(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let mut history = History::new();
        for _ in 0..(HISTORY_CAP + 10) {
            history.record(UndoEntry::Add { ids: vec![] });
        }
        assert_eq!(history.undo_depth(), HISTORY_CAP);
    }
}
