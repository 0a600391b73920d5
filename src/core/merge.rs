//! Field-level merge.
//!
//! The fundamental conflict-resolution primitive: per-field last-writer-wins
//! decided by stamp comparison, never by arrival order. Exactly one code
//! path - live broadcast events and reconciliation re-fetches both land
//! here.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::element::FieldValue;
use super::time::Stamp;

/// Per-element table mapping field name to the stamp of the write that
/// last set it.
///
/// Absence of an entry means "never stamped locally" and compares as
/// strictly less than any present stamp.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldClocks(BTreeMap<String, Stamp>);

impl FieldClocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Stamp> {
        self.0.get(field)
    }

    /// Record a write stamp for a field. Clocks only move forward: an
    /// older stamp than the one already recorded is ignored.
    pub fn observe(&mut self, field: &str, stamp: Stamp) {
        match self.0.get(field) {
            Some(existing) if *existing >= stamp => {}
            _ => {
                self.0.insert(field.to_string(), stamp);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Stamp)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The greatest stamp recorded for any field, if any.
    pub fn max_stamp(&self) -> Option<&Stamp> {
        self.0.values().max()
    }
}

impl FromIterator<(String, Stamp)> for FieldClocks {
    fn from_iter<I: IntoIterator<Item = (String, Stamp)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Which fields a merge pass actually changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub changed: BTreeSet<String>,
}

impl MergeOutcome {
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Merge a remote field payload into local state, field by field.
///
/// For every field present in the remote payload: adopt the remote value
/// and stamp iff the remote stamp compares strictly greater than the local
/// stamp for that field. An absent local stamp is minimal; an absent remote
/// stamp is also minimal, so an unstamped payload can never overwrite
/// stamped local data. Fields absent from the remote payload are left
/// untouched, which is what lets concurrent edits to disjoint fields of
/// the same element both survive.
///
/// Idempotent (equal stamps lose) and per-field order-independent (the
/// winner is decided solely against whatever is currently stored, and a
/// strictly greater stamp is stable once adopted).
pub fn merge_fields(
    local_fields: &mut BTreeMap<String, FieldValue>,
    local_clocks: &mut FieldClocks,
    remote_fields: &BTreeMap<String, FieldValue>,
    remote_clocks: &FieldClocks,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    for (name, value) in remote_fields {
        let Some(remote_stamp) = remote_clocks.get(name) else {
            continue;
        };
        let adopt = match local_clocks.get(name) {
            None => true,
            Some(local_stamp) => remote_stamp > local_stamp,
        };
        if adopt {
            local_fields.insert(name.clone(), value.clone());
            local_clocks.observe(name, remote_stamp.clone());
            outcome.changed.insert(name.clone());
        }
    }

    outcome
}
