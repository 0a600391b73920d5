//! Per-board session cache.
//!
//! Owns the authoritative element map and field-clock tables for one board.
//! Local edits and remote broadcast events both land here and funnel
//! through the same merge/apply code path, so there is never a race between
//! "my edit" and "their edit" inside the cache. Asynchrony exists only at
//! the I/O edges: the durable fetch, the write-through, and the feed.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::core::{
    ActorId, BoardId, BoardState, CoreError, Element, ElementId, ElementKind, FieldValue, Limits,
    WallClock,
};
use crate::session::clock::Clock;
use crate::session::event::{ChangeEvent, ChangeKind, ConnectionStatus, FeedMessage, WireElement};
use crate::session::reconnect::{ConnectionState, ReconnectManager, StatusOutcome};
use crate::session::store::{BoardStore, PersistChange};
use crate::session::transport::{ChangeFeed, EventSubscription, FeedHandle};
use crate::session::LoadError;
use crate::session::undo::{self, FieldPatch, History, UndoEntry};
use crate::session::writer::WriteThrough;

/// Offset applied to duplicated elements so copies do not sit exactly on
/// their originals.
const DUPLICATE_OFFSET: f64 = 16.0;

pub struct SessionCache {
    board: BoardId,
    state: BoardState,
    clock: Clock,
    history: History,
    event_log: VecDeque<ChangeEvent>,
    limits: Limits,
    tombstone_grace: Duration,
    reconnect: ReconnectManager,
    store: Arc<dyn BoardStore>,
    feed: Arc<dyn ChangeFeed>,
    handle: Option<Box<dyn FeedHandle>>,
    subscription: Option<EventSubscription>,
    writer: Option<WriteThrough>,
}

impl SessionCache {
    /// Load one board: subscribe to the change feed first, then fetch the
    /// canonical snapshot, so nothing published between snapshot and
    /// subscription is missed. A fetch failure aborts the whole attempt -
    /// no half-initialized cache escapes.
    pub fn open(
        board: BoardId,
        actor: ActorId,
        store: Arc<dyn BoardStore>,
        feed: Arc<dyn ChangeFeed>,
        config: &Config,
    ) -> Result<Self, LoadError> {
        let mut handle = feed.subscribe(&board)?;
        let subscription = handle.take_subscription();

        let snapshot = match store.fetch(&board) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                handle.unsubscribe();
                return Err(err.into());
            }
        };

        let writer = WriteThrough::spawn(Arc::clone(&store));
        let mut cache = Self {
            board,
            state: BoardState::new(),
            clock: Clock::new(actor),
            history: History::new(),
            event_log: VecDeque::new(),
            limits: config.limits.clone(),
            tombstone_grace: Duration::from_millis(config.tombstone_grace_ms),
            reconnect: ReconnectManager::new(config.backoff(), config.max_reconnect_attempts),
            store,
            feed,
            handle: Some(handle),
            subscription,
            writer: Some(writer),
        };

        for wire in snapshot.elements {
            cache.apply_wire(wire);
        }
        tracing::info!(board = %cache.board, elements = cache.state.live_count(), "session loaded");
        Ok(cache)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn board(&self) -> BoardId {
        self.board
    }

    pub fn element(&self, id: &ElementId) -> Option<&Element> {
        self.state.get(id)
    }

    pub fn elements(&self) -> impl Iterator<Item = (&ElementId, &Element)> {
        self.state.iter_live()
    }

    pub fn state(&self) -> &BoardState {
        &self.state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.reconnect.state()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Most recent received events, oldest first.
    pub fn recent_events(&self) -> impl Iterator<Item = &ChangeEvent> {
        self.event_log.iter()
    }

    /// Current value of a field, or Null when absent. Undo entries use
    /// this so "was unset" round-trips as an explicit Null write.
    pub fn field_or_null(&self, id: &ElementId, name: &str) -> FieldValue {
        self.state
            .get(id)
            .and_then(|el| el.field(name).cloned())
            .unwrap_or(FieldValue::Null)
    }

    // =========================================================================
    // Remote path
    // =========================================================================

    /// Apply one broadcast event. Routed by kind; a create for a known id
    /// degrades to an update merge, an update for an unknown id degrades
    /// to a create.
    pub fn apply_remote_event(&mut self, event: ChangeEvent) {
        if self.event_log.len() >= self.limits.event_log_cap {
            self.event_log.pop_front();
        }
        self.event_log.push_back(event.clone());

        match event.kind {
            ChangeKind::Create | ChangeKind::Update => {
                self.apply_wire(event.record);
            }
            ChangeKind::Delete => {
                let record = event
                    .record
                    .tombstone()
                    .or_else(|| event.old_record.as_ref().and_then(WireElement::tombstone));
                match record {
                    Some(tomb) => {
                        self.clock.observe(&tomb.deleted);
                        let applied = self.state.apply_remote_delete(tomb);
                        tracing::debug!(board = %self.board, ?applied, "remote delete");
                    }
                    None => {
                        // A delete with no usable stamp cannot be weighed
                        // against local writes; dropping it preserves data.
                        tracing::warn!(
                            board = %self.board,
                            id = %event.record.id,
                            "remote delete without stamp ignored"
                        );
                    }
                }
            }
        }
    }

    /// Single ingestion path for snapshots, reconciliation batches, and
    /// live upsert events.
    fn apply_wire(&mut self, wire: WireElement) {
        if let Some(tomb) = wire.tombstone() {
            self.clock.observe(&tomb.deleted);
            self.state.apply_remote_delete(tomb);
            return;
        }
        let stamps = wire.field_clocks();
        for (_, stamp) in stamps.iter() {
            self.clock.observe(stamp);
        }
        let outcome = self.state.apply_remote_upsert(wire.element(), stamps);
        if !outcome.is_ignored() {
            tracing::debug!(board = %self.board, id = %wire.id, ?outcome, "remote upsert");
        }
    }

    // =========================================================================
    // Local path (optimistic, merge-free by construction)
    // =========================================================================

    /// Apply a local field edit: one clock tick stamps every touched
    /// field, the cache is updated before any I/O, and the write-through
    /// and broadcast are fire-and-forget. Returns true when a field value
    /// actually changed. Missing or deleted targets are skipped.
    pub fn apply_local_edit(
        &mut self,
        id: &ElementId,
        updates: BTreeMap<String, FieldValue>,
    ) -> bool {
        if updates.is_empty() || self.state.get(id).is_none() {
            return false;
        }
        for (name, value) in &updates {
            if let FieldValue::Text(text) = value
                && let Err(err) = self.limits.check_field(name, text.len())
            {
                tracing::warn!(board = %self.board, %id, "edit rejected: {err}");
                return false;
            }
        }

        let stamp = self.clock.tick();
        let changed = self.state.update_local(id, &updates, &stamp);
        self.push_outbound_upsert(id, ChangeKind::Update);
        changed
    }

    /// Insert a locally-created element.
    pub fn apply_local_create(&mut self, element: Element) -> Result<(), CoreError> {
        self.limits.check_element_count(self.state.live_count())?;
        for (name, value) in &element.fields {
            if let FieldValue::Text(text) = value {
                self.limits.check_field(name, text.len())?;
            }
        }
        let stamp = self.clock.tick();
        let id = element.id.clone();
        self.state.insert_local(element, &stamp);
        self.push_outbound_upsert(&id, ChangeKind::Create);
        Ok(())
    }

    /// Soft-delete a live element. Returns the removed snapshot, or None
    /// when the target is missing (skipped, never an error).
    pub fn apply_local_delete(&mut self, id: &ElementId) -> Option<Element> {
        let stamp = self.clock.tick();
        let snapshot = self.state.delete_local(id, stamp, None)?;
        if let Some(tomb) = self.state.tombstone(id) {
            let wire = WireElement::from_tombstone(tomb, snapshot.kind);
            self.publish(ChangeEvent {
                kind: ChangeKind::Delete,
                record: wire.clone(),
                old_record: None,
            });
            self.persist(vec![PersistChange::Delete(wire)]);
        }
        Some(snapshot)
    }

    fn push_outbound_upsert(&mut self, id: &ElementId, kind: ChangeKind) {
        let Some(element) = self.state.get(id) else {
            return;
        };
        let clocks = self.state.clocks(id).cloned().unwrap_or_default();
        let wire = WireElement::from_parts(element, &clocks);
        self.publish(ChangeEvent {
            kind,
            record: wire.clone(),
            old_record: None,
        });
        self.persist(vec![PersistChange::Upsert(wire)]);
    }

    fn publish(&self, event: ChangeEvent) {
        if let Some(handle) = &self.handle {
            handle.publish(std::slice::from_ref(&event));
        }
    }

    fn persist(&self, changes: Vec<PersistChange>) {
        if let Some(writer) = &self.writer {
            writer.enqueue(self.board, changes);
        }
    }

    // =========================================================================
    // Edit producers (record history, then mutate through the local path)
    // =========================================================================

    pub fn record(&mut self, entry: UndoEntry) {
        self.history.record(entry);
    }

    /// Create elements and record an Add entry.
    pub fn create_elements(&mut self, elements: Vec<Element>) -> Result<Vec<ElementId>, CoreError> {
        let mut ids = Vec::with_capacity(elements.len());
        for element in elements {
            ids.push(element.id.clone());
            self.apply_local_create(element)?;
        }
        if !ids.is_empty() {
            self.record(UndoEntry::Add { ids: ids.clone() });
        }
        Ok(ids)
    }

    /// Edit elements and record an Update entry carrying before-values.
    pub fn update_elements(
        &mut self,
        patches: Vec<(ElementId, BTreeMap<String, FieldValue>)>,
    ) -> bool {
        let entry_patches = self.capture_before(&patches);
        let mut changed = false;
        for (id, updates) in patches {
            changed |= self.apply_local_edit(&id, updates);
        }
        if !entry_patches.is_empty() {
            self.record(UndoEntry::Update {
                patches: entry_patches,
            });
        }
        changed
    }

    /// Move elements (topology fields only) and record a Move entry.
    pub fn move_elements(
        &mut self,
        patches: Vec<(ElementId, BTreeMap<String, FieldValue>)>,
    ) -> bool {
        debug_assert!(
            patches
                .iter()
                .flat_map(|(_, updates)| updates.keys())
                .all(|name| crate::core::is_topology_field(name)),
            "move patches must touch topology fields only"
        );
        let entry_patches = self.capture_before(&patches);
        let mut changed = false;
        for (id, updates) in patches {
            changed |= self.apply_local_edit(&id, updates);
        }
        if !entry_patches.is_empty() {
            self.record(UndoEntry::Move {
                patches: entry_patches,
            });
        }
        changed
    }

    /// Delete elements and record a Delete entry holding their snapshots.
    pub fn delete_elements(&mut self, ids: &[ElementId]) -> Vec<Element> {
        let mut snapshots = Vec::new();
        for id in ids {
            if let Some(snapshot) = self.apply_local_delete(id) {
                snapshots.push(snapshot);
            }
        }
        if !snapshots.is_empty() {
            self.record(UndoEntry::Delete {
                snapshots: snapshots.clone(),
            });
        }
        snapshots
    }

    /// Duplicate elements (with their descendants) and record a Duplicate
    /// entry. Parent references inside the duplicated set are remapped to
    /// the fresh copies; references out of the set are kept.
    pub fn duplicate(&mut self, ids: &[ElementId]) -> Result<Vec<ElementId>, CoreError> {
        let top: Vec<ElementId> = ids
            .iter()
            .filter(|id| self.state.get(id).is_some())
            .cloned()
            .collect();
        if top.is_empty() {
            return Ok(Vec::new());
        }
        let mut all = top.clone();
        all.extend(self.state.descendants_of(&top));

        let mapping: BTreeMap<ElementId, ElementId> = all
            .iter()
            .map(|old| (old.clone(), ElementId::generate()))
            .collect();

        for old in &all {
            let Some(source) = self.state.get(old) else {
                continue;
            };
            let mut copy = source.clone();
            copy.id = mapping[old].clone();
            if let Some(parent) = source.parent_id()
                && let Some(mapped) = mapping.get(&parent)
            {
                copy.fields
                    .insert("parent_id".into(), FieldValue::Text(mapped.to_string()));
            }
            for axis in ["x", "y"] {
                if let Some(n) = copy.fields.get(axis).and_then(FieldValue::as_number) {
                    copy.fields
                        .insert(axis.into(), FieldValue::Number(n + DUPLICATE_OFFSET));
                }
            }
            self.apply_local_create(copy)?;
        }

        let new_top: Vec<ElementId> = top.iter().map(|old| mapping[old].clone()).collect();
        self.record(UndoEntry::Duplicate {
            ids: new_top.clone(),
        });
        Ok(new_top)
    }

    /// Gather live children under a fresh synthetic group element.
    pub fn group(&mut self, child_ids: &[ElementId]) -> Result<Option<ElementId>, CoreError> {
        let mut previous_parents = BTreeMap::new();
        let mut live = Vec::new();
        for id in child_ids {
            if let Some(el) = self.state.get(id) {
                previous_parents.insert(id.clone(), el.parent_id());
                live.push(id.clone());
            }
        }
        if live.is_empty() {
            return Ok(None);
        }

        let group_id = ElementId::generate();
        let mut group = Element::new(group_id.clone(), ElementKind::Group);
        group.fields.insert(
            "z_index".into(),
            FieldValue::Number(self.state.max_z_index() + 1.0),
        );
        self.apply_local_create(group)?;

        for id in &live {
            self.apply_local_edit(
                id,
                [(
                    "parent_id".to_string(),
                    FieldValue::Text(group_id.to_string()),
                )]
                .into(),
            );
        }
        self.record(UndoEntry::Group {
            group_id: group_id.clone(),
            child_ids: live,
            previous_parents,
        });
        Ok(Some(group_id))
    }

    /// Dissolve a group: children are re-parented to the group's own
    /// parent, the group element is deleted.
    pub fn ungroup(&mut self, group_id: &ElementId) -> Vec<ElementId> {
        let Some(group) = self.state.get(group_id) else {
            return Vec::new();
        };
        let snapshot = group.clone();
        let new_parent = group
            .parent_id()
            .map(|p| FieldValue::Text(p.to_string()))
            .unwrap_or(FieldValue::Null);
        let children = self.state.children_of(group_id);

        for child in &children {
            self.apply_local_edit(
                child,
                [("parent_id".to_string(), new_parent.clone())].into(),
            );
        }
        self.apply_local_delete(group_id);
        self.record(UndoEntry::Ungroup {
            group_snapshot: snapshot,
            child_ids: children.clone(),
        });
        children
    }

    /// Raise an element above everything else on the board.
    pub fn bring_to_front(&mut self, id: &ElementId) -> bool {
        if self.state.get(id).is_none() {
            return false;
        }
        let before = [("z_index".to_string(), self.field_or_null(id, "z_index"))].into();
        let next = self.state.max_z_index() + 1.0;
        let changed = self.apply_local_edit(
            id,
            [("z_index".to_string(), FieldValue::Number(next))].into(),
        );
        if changed {
            self.record(UndoEntry::Move {
                patches: vec![FieldPatch {
                    id: id.clone(),
                    before,
                }],
            });
        }
        changed
    }

    fn capture_before(
        &self,
        patches: &[(ElementId, BTreeMap<String, FieldValue>)],
    ) -> Vec<FieldPatch> {
        patches
            .iter()
            .filter(|(id, _)| self.state.get(id).is_some())
            .map(|(id, updates)| FieldPatch {
                id: id.clone(),
                before: updates
                    .keys()
                    .map(|name| (name.clone(), self.field_or_null(id, name)))
                    .collect(),
            })
            .collect()
    }

    // =========================================================================
    // Undo / redo
    // =========================================================================

    /// Undo the most recent recorded edit. Returns false when the undo
    /// stack is empty.
    pub fn undo(&mut self) -> bool {
        let Some(entry) = self.history.pop_undo() else {
            return false;
        };
        if let Some(inverse) = undo::invert(&entry, self) {
            self.history.push_redo(inverse);
        }
        true
    }

    /// Redo the most recently undone edit.
    pub fn redo(&mut self) -> bool {
        let Some(entry) = self.history.pop_redo() else {
            return false;
        };
        if let Some(inverse) = undo::invert(&entry, self) {
            self.history.push_undo(inverse);
        }
        true
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    /// Drive the session: drain pending feed messages, then fire any due
    /// reconnect attempt. Call from the session's own thread.
    pub fn pump(&mut self, now: Instant) {
        let mut messages = Vec::new();
        if let Some(subscription) = &self.subscription {
            while let Some(message) = subscription.try_recv() {
                messages.push(message);
            }
        }
        for message in messages {
            match message {
                FeedMessage::Event(event) => self.apply_remote_event(event),
                FeedMessage::Status(status) => self.handle_status(status, now),
            }
        }

        if self.reconnect.poll_due(now) {
            self.resubscribe(now);
        }
    }

    /// External retry trigger once the manager has given up.
    pub fn retry_connect(&mut self, now: Instant) {
        self.reconnect.restart(now);
    }

    fn handle_status(&mut self, status: ConnectionStatus, now: Instant) {
        match self.reconnect.on_status(status, now) {
            StatusOutcome::Connected { reconcile: true } => self.reconcile(),
            StatusOutcome::GaveUp => {
                tracing::warn!(board = %self.board, "transport disconnected; external retry required");
            }
            _ => {}
        }
    }

    fn resubscribe(&mut self, now: Instant) {
        // Drop the stale handle before subscribing again so listeners
        // never stack across repeated reconnects.
        if let Some(old) = self.handle.take() {
            old.unsubscribe();
        }
        self.subscription = None;

        match self.feed.subscribe(&self.board) {
            Ok(mut handle) => {
                // The transport reports `subscribed` over the new stream;
                // that status, not this call, confirms the reconnect and
                // triggers the reconciliation pass.
                self.subscription = handle.take_subscription();
                self.handle = Some(handle);
            }
            Err(err) => {
                tracing::warn!(board = %self.board, "resubscribe failed: {err}");
                self.handle_status(ConnectionStatus::Error, now);
            }
        }
    }

    /// Re-fetch canonical state and merge it field by field, exactly as a
    /// batch of remote update events. Local edits made while disconnected
    /// survive wherever their stamps are newer; older ones are corrected.
    pub fn reconcile(&mut self) {
        match self.store.fetch(&self.board) {
            Ok(snapshot) => {
                let count = snapshot.elements.len();
                for wire in snapshot.elements {
                    self.apply_wire(wire);
                }
                let cutoff = WallClock(
                    WallClock::now()
                        .0
                        .saturating_sub(self.tombstone_grace.as_millis() as u64),
                );
                let purged = self.state.purge_tombstones_before(cutoff);
                tracing::info!(
                    board = %self.board,
                    elements = count,
                    purged_tombstones = purged,
                    "reconciliation pass complete"
                );
            }
            Err(err) => {
                // The next successful reconnect retries the pass.
                tracing::warn!(board = %self.board, "reconciliation fetch failed: {err}");
            }
        }
    }

    /// Tear the session down: cancel any pending reconnect, release the
    /// feed, stop the writer.
    pub fn teardown(&mut self) {
        self.reconnect.cancel();
        if let Some(handle) = self.handle.take() {
            handle.unsubscribe();
        }
        self.subscription = None;
        if let Some(writer) = self.writer.take() {
            writer.shutdown();
        }
        tracing::debug!(board = %self.board, "session torn down");
    }
}

impl Drop for SessionCache {
    fn drop(&mut self) {
        self.teardown();
    }
}
