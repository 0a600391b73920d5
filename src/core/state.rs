//! Board state - the single source of truth for one board's elements.
//!
//! INVARIANT: each ElementId maps to either a live element or a tombstone,
//! never both. Field clock tables survive deletion so stale out-of-order
//! updates compare against real evidence instead of resurrecting freely.
//!
//! Resurrection rule: a modification strictly newer than the deletion
//! stamp can resurrect.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::element::{Element, FieldValue};
use super::identity::ElementId;
use super::merge::{FieldClocks, MergeOutcome, merge_fields};
use super::time::{Stamp, WallClock};
use super::tombstone::Tombstone;

/// Element entry stored by ID.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ElementEntry {
    Live(Box<Element>),
    Tombstone(Box<Tombstone>),
}

/// How a remote event landed in the state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteApply {
    Created,
    Updated(MergeOutcome),
    Resurrected(MergeOutcome),
    Deleted,
    Ignored,
}

impl RemoteApply {
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored)
    }
}

/// Authoritative in-memory map of one board's elements and field clocks.
///
/// Mutated only through the apply_* operations below; remote writes go
/// through the merge decision, local writes through the stamped fast path.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BoardState {
    entries: BTreeMap<ElementId, ElementEntry>,
    clocks: BTreeMap<ElementId, FieldClocks>,
}

impl BoardState {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get(&self, id: &ElementId) -> Option<&Element> {
        match self.entries.get(id) {
            Some(ElementEntry::Live(el)) => Some(el.as_ref()),
            _ => None,
        }
    }

    pub fn is_deleted(&self, id: &ElementId) -> bool {
        matches!(self.entries.get(id), Some(ElementEntry::Tombstone(_)))
    }

    pub fn tombstone(&self, id: &ElementId) -> Option<&Tombstone> {
        match self.entries.get(id) {
            Some(ElementEntry::Tombstone(tomb)) => Some(tomb.as_ref()),
            _ => None,
        }
    }

    pub fn clocks(&self, id: &ElementId) -> Option<&FieldClocks> {
        self.clocks.get(id)
    }

    pub fn live_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry, ElementEntry::Live(_)))
            .count()
    }

    pub fn tombstone_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry, ElementEntry::Tombstone(_)))
            .count()
    }

    pub fn iter_live(&self) -> impl Iterator<Item = (&ElementId, &Element)> {
        self.entries.iter().filter_map(|(id, entry)| match entry {
            ElementEntry::Live(el) => Some((id, el.as_ref())),
            _ => None,
        })
    }

    pub fn iter_tombstones(&self) -> impl Iterator<Item = &Tombstone> {
        self.entries.values().filter_map(|entry| match entry {
            ElementEntry::Tombstone(tomb) => Some(tomb.as_ref()),
            _ => None,
        })
    }

    // =========================================================================
    // Remote application (merge path)
    // =========================================================================

    /// Apply a remote create/update payload.
    ///
    /// Unknown id: insert directly - there is no merge target yet, so the
    /// first write wins trivially. Known live id: field-level merge.
    /// Tombstoned id: resurrect only when some incoming stamp is strictly
    /// newer than the deletion stamp, merging against the retained clock
    /// table.
    pub fn apply_remote_upsert(&mut self, incoming: Element, stamps: FieldClocks) -> RemoteApply {
        let id = incoming.id.clone();

        match self.entries.get_mut(&id) {
            Some(ElementEntry::Live(el)) => {
                let clocks = self.clocks.entry(id).or_default();
                let outcome = merge_fields(&mut el.fields, clocks, &incoming.fields, &stamps);
                if outcome.is_noop() {
                    RemoteApply::Ignored
                } else {
                    RemoteApply::Updated(outcome)
                }
            }
            Some(ElementEntry::Tombstone(tomb)) => {
                let deleted = tomb.deleted.clone();
                let newer = stamps
                    .max_stamp()
                    .is_some_and(|stamp| *stamp > deleted);
                if !newer {
                    return RemoteApply::Ignored;
                }
                let mut revived = Element::new(id.clone(), incoming.kind);
                let clocks = self.clocks.entry(id.clone()).or_default();
                let outcome = merge_fields(&mut revived.fields, clocks, &incoming.fields, &stamps);
                self.entries
                    .insert(id, ElementEntry::Live(Box::new(revived)));
                RemoteApply::Resurrected(outcome)
            }
            None => {
                self.clocks.insert(id.clone(), stamps);
                self.entries
                    .insert(id, ElementEntry::Live(Box::new(incoming)));
                RemoteApply::Created
            }
        }
    }

    /// Apply a remote delete. The tombstone keeps its own stamp and the
    /// element's clock table is retained.
    pub fn apply_remote_delete(&mut self, tomb: Tombstone) -> RemoteApply {
        let id = tomb.id.clone();
        match self.entries.get(&id) {
            Some(ElementEntry::Tombstone(existing)) => {
                let joined = Tombstone::join(existing, &tomb);
                if joined == **existing {
                    return RemoteApply::Ignored;
                }
                self.entries
                    .insert(id, ElementEntry::Tombstone(Box::new(joined)));
                RemoteApply::Deleted
            }
            _ => {
                self.entries
                    .insert(id, ElementEntry::Tombstone(Box::new(tomb)));
                RemoteApply::Deleted
            }
        }
    }

    // =========================================================================
    // Local application (stamped fast path)
    // =========================================================================

    /// Insert a locally-created element, stamping every field.
    ///
    /// A local create always wins against its own prior state by
    /// construction; an existing tombstone for the id is displaced.
    pub fn insert_local(&mut self, element: Element, stamp: &Stamp) {
        let clocks = self.clocks.entry(element.id.clone()).or_default();
        for name in element.fields.keys() {
            clocks.observe(name, stamp.clone());
        }
        self.entries
            .insert(element.id.clone(), ElementEntry::Live(Box::new(element)));
    }

    /// Apply a local field edit to a live element, stamping every touched
    /// field. Returns true when any field value actually changed.
    pub fn update_local(
        &mut self,
        id: &ElementId,
        updates: &BTreeMap<String, FieldValue>,
        stamp: &Stamp,
    ) -> bool {
        let Some(ElementEntry::Live(el)) = self.entries.get_mut(id) else {
            return false;
        };
        let clocks = self.clocks.entry(id.clone()).or_default();
        let mut changed = false;
        for (name, value) in updates {
            if el.fields.get(name) != Some(value) {
                changed = true;
            }
            el.fields.insert(name.clone(), value.clone());
            clocks.observe(name, stamp.clone());
        }
        changed
    }

    /// Soft-delete a live element locally. Returns the removed snapshot,
    /// or None when the target is missing or already deleted.
    pub fn delete_local(
        &mut self,
        id: &ElementId,
        stamp: Stamp,
        reason: Option<String>,
    ) -> Option<Element> {
        match self.entries.get(id) {
            Some(ElementEntry::Live(el)) => {
                let snapshot = (**el).clone();
                self.entries.insert(
                    id.clone(),
                    ElementEntry::Tombstone(Box::new(Tombstone::new(id.clone(), stamp, reason))),
                );
                Some(snapshot)
            }
            _ => None,
        }
    }

    // =========================================================================
    // Derived reads (full scans; element count is operationally bounded)
    // =========================================================================

    /// Live children of a parent element.
    pub fn children_of(&self, parent: &ElementId) -> Vec<ElementId> {
        self.iter_live()
            .filter(|(_, el)| el.parent_id().as_ref() == Some(parent))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Live descendants of a set of roots, excluding the roots themselves.
    pub fn descendants_of(&self, roots: &[ElementId]) -> BTreeSet<ElementId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<ElementId> = roots.iter().cloned().collect();
        while let Some(next) = queue.pop_front() {
            for child in self.children_of(&next) {
                if seen.insert(child.clone()) {
                    queue.push_back(child);
                }
            }
        }
        seen
    }

    /// Maximum stacking index across live elements.
    pub fn max_z_index(&self) -> f64 {
        self.iter_live()
            .map(|(_, el)| el.z_index())
            .fold(0.0, f64::max)
    }

    /// Drop tombstones whose deletion wall time predates `cutoff`, along
    /// with their retained clock tables. Returns the number purged.
    pub fn purge_tombstones_before(&mut self, cutoff: WallClock) -> usize {
        let expired: Vec<ElementId> = self
            .iter_tombstones()
            .filter(|tomb| tomb.deleted.at.wall_ms < cutoff.0)
            .map(|tomb| tomb.id.clone())
            .collect();
        for id in &expired {
            self.entries.remove(id);
            self.clocks.remove(id);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::element::ElementKind;
    use crate::core::identity::ActorId;
    use crate::core::time::WriteStamp;

    fn stamp(wall: u64, counter: u32, actor: &str) -> Stamp {
        Stamp::new(WriteStamp::new(wall, counter), ActorId::new(actor).unwrap())
    }

    fn el(id: &str, kind: ElementKind, fields: &[(&str, FieldValue)]) -> Element {
        Element::with_fields(
            ElementId::parse(id).unwrap(),
            kind,
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    fn stamps_for(fields: &[(&str, Stamp)]) -> FieldClocks {
        fields
            .iter()
            .map(|(k, s)| (k.to_string(), s.clone()))
            .collect()
    }

    fn eid(id: &str) -> ElementId {
        ElementId::parse(id).unwrap()
    }

    #[test]
    fn remote_create_then_update_merges() {
        let mut state = BoardState::new();
        let created = state.apply_remote_upsert(
            el("el-a", ElementKind::Sticky, &[("text", FieldValue::Text("hi".into()))]),
            stamps_for(&[("text", stamp(100, 0, "a"))]),
        );
        assert_eq!(created, RemoteApply::Created);

        let updated = state.apply_remote_upsert(
            el("el-a", ElementKind::Sticky, &[("text", FieldValue::Text("yo".into()))]),
            stamps_for(&[("text", stamp(200, 0, "b"))]),
        );
        assert!(matches!(updated, RemoteApply::Updated(_)));
        assert_eq!(
            state.get(&eid("el-a")).unwrap().fields["text"],
            FieldValue::Text("yo".into())
        );
    }

    #[test]
    fn create_for_live_id_is_a_merge_not_a_clobber() {
        let mut state = BoardState::new();
        state.apply_remote_upsert(
            el("el-a", ElementKind::Shape, &[("fill", FieldValue::Text("red".into()))]),
            stamps_for(&[("fill", stamp(200, 0, "a"))]),
        );
        // A second "create" with an older stamp must not win.
        let second = state.apply_remote_upsert(
            el("el-a", ElementKind::Shape, &[("fill", FieldValue::Text("blue".into()))]),
            stamps_for(&[("fill", stamp(100, 0, "b"))]),
        );
        assert!(second.is_ignored());
        assert_eq!(
            state.get(&eid("el-a")).unwrap().fields["fill"],
            FieldValue::Text("red".into())
        );
    }

    #[test]
    fn stale_update_after_delete_is_rejected() {
        let mut state = BoardState::new();
        state.apply_remote_upsert(
            el("el-a", ElementKind::Shape, &[("fill", FieldValue::Text("red".into()))]),
            stamps_for(&[("fill", stamp(100, 0, "a"))]),
        );
        state.apply_remote_delete(Tombstone::new(eid("el-a"), stamp(300, 0, "b"), None));

        // Out-of-order update stamped before the delete: must not resurrect.
        let stale = state.apply_remote_upsert(
            el("el-a", ElementKind::Shape, &[("fill", FieldValue::Text("green".into()))]),
            stamps_for(&[("fill", stamp(200, 0, "a"))]),
        );
        assert!(stale.is_ignored());
        assert!(state.is_deleted(&eid("el-a")));
    }

    #[test]
    fn newer_update_resurrects() {
        let mut state = BoardState::new();
        state.apply_remote_upsert(
            el("el-a", ElementKind::Shape, &[("fill", FieldValue::Text("red".into()))]),
            stamps_for(&[("fill", stamp(100, 0, "a"))]),
        );
        state.apply_remote_delete(Tombstone::new(eid("el-a"), stamp(300, 0, "b"), None));

        let revived = state.apply_remote_upsert(
            el("el-a", ElementKind::Shape, &[("fill", FieldValue::Text("green".into()))]),
            stamps_for(&[("fill", stamp(400, 0, "a"))]),
        );
        assert!(matches!(revived, RemoteApply::Resurrected(_)));
        assert_eq!(
            state.get(&eid("el-a")).unwrap().fields["fill"],
            FieldValue::Text("green".into())
        );
    }

    #[test]
    fn delete_of_unknown_id_still_tombstones() {
        // Defends against an out-of-order create arriving after the delete.
        let mut state = BoardState::new();
        state.apply_remote_delete(Tombstone::new(eid("el-a"), stamp(300, 0, "b"), None));

        let late_create = state.apply_remote_upsert(
            el("el-a", ElementKind::Shape, &[("fill", FieldValue::Text("red".into()))]),
            stamps_for(&[("fill", stamp(100, 0, "a"))]),
        );
        assert!(late_create.is_ignored());
    }

    #[test]
    fn local_delete_returns_snapshot_and_keeps_clocks() {
        let mut state = BoardState::new();
        let element = el("el-a", ElementKind::Sticky, &[("text", FieldValue::Text("hi".into()))]);
        state.insert_local(element.clone(), &stamp(100, 0, "a"));

        let snapshot = state.delete_local(&eid("el-a"), stamp(200, 0, "a"), None);
        assert_eq!(snapshot, Some(element));
        assert!(state.is_deleted(&eid("el-a")));
        assert!(state.clocks(&eid("el-a")).is_some());

        // Deleting again is a skip, not an error.
        assert_eq!(state.delete_local(&eid("el-a"), stamp(300, 0, "a"), None), None);
    }

    #[test]
    fn children_and_descendants() {
        let mut state = BoardState::new();
        state.insert_local(el("el-root", ElementKind::Frame, &[]), &stamp(1, 0, "a"));
        state.insert_local(
            el("el-kid", ElementKind::Shape, &[("parent_id", FieldValue::Text("el-root".into()))]),
            &stamp(1, 1, "a"),
        );
        state.insert_local(
            el("el-grand", ElementKind::Shape, &[("parent_id", FieldValue::Text("el-kid".into()))]),
            &stamp(1, 2, "a"),
        );

        assert_eq!(state.children_of(&eid("el-root")), vec![eid("el-kid")]);
        let descendants = state.descendants_of(&[eid("el-root")]);
        assert!(descendants.contains(&eid("el-kid")));
        assert!(descendants.contains(&eid("el-grand")));
        assert_eq!(descendants.len(), 2);
    }

    #[test]
    fn max_z_scans_live_only() {
        let mut state = BoardState::new();
        state.insert_local(
            el("el-a", ElementKind::Shape, &[("z_index", FieldValue::Number(4.0))]),
            &stamp(1, 0, "a"),
        );
        state.insert_local(
            el("el-b", ElementKind::Shape, &[("z_index", FieldValue::Number(9.0))]),
            &stamp(1, 1, "a"),
        );
        state.delete_local(&eid("el-b"), stamp(2, 0, "a"), None);
        assert_eq!(state.max_z_index(), 4.0);
    }

    #[test]
    fn purge_drops_only_expired_tombstones() {
        let mut state = BoardState::new();
        state.insert_local(el("el-old", ElementKind::Shape, &[]), &stamp(100, 0, "a"));
        state.insert_local(el("el-new", ElementKind::Shape, &[]), &stamp(100, 1, "a"));
        state.delete_local(&eid("el-old"), stamp(1_000, 0, "a"), None);
        state.delete_local(&eid("el-new"), stamp(5_000, 0, "a"), None);

        let purged = state.purge_tombstones_before(WallClock(2_000));
        assert_eq!(purged, 1);
        assert!(state.tombstone(&eid("el-old")).is_none());
        assert!(state.clocks(&eid("el-old")).is_none());
        assert!(state.tombstone(&eid("el-new")).is_some());
    }
}
