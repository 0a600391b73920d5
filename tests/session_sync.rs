//! End-to-end session scenarios over in-memory seams: two sessions
//! exchanging broadcast events, reconnect reconciliation, and undo round
//! trips through the public surface.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use easel::{
    ActorId, BoardId, BoardSnapshot, BoardStore, ChangeEvent, ChangeFeed, Config,
    ConnectionStatus, Element, ElementId, ElementKind, EventSubscription, FeedHandle, FeedSender,
    FieldValue, PersistChange, SessionCache, SessionRegistry,
};

#[derive(Default)]
struct MemoryStore {
    snapshot: Mutex<BoardSnapshot>,
}

impl BoardStore for MemoryStore {
    fn fetch(&self, _board: &BoardId) -> Result<BoardSnapshot, easel::session::StoreError> {
        Ok(self.snapshot.lock().unwrap().clone())
    }

    fn persist(
        &self,
        _board: &BoardId,
        _changes: &[PersistChange],
    ) -> Result<(), easel::session::StoreError> {
        Ok(())
    }
}

/// Feed that records everything published so tests can relay it to peers.
#[derive(Default)]
struct RelayFeed {
    senders: Mutex<Vec<FeedSender>>,
    published: Mutex<Vec<ChangeEvent>>,
    fail: AtomicBool,
}

impl RelayFeed {
    fn sender(&self) -> FeedSender {
        self.senders.lock().unwrap().last().unwrap().clone()
    }

    fn take_published(&self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.published.lock().unwrap())
    }
}

struct RelayHandle {
    subscription: Option<EventSubscription>,
    published: Arc<RelayFeed>,
}

impl FeedHandle for RelayHandle {
    fn take_subscription(&mut self) -> Option<EventSubscription> {
        self.subscription.take()
    }

    fn publish(&self, changes: &[ChangeEvent]) {
        self.published
            .published
            .lock()
            .unwrap()
            .extend(changes.to_vec());
    }

    fn unsubscribe(self: Box<Self>) {}
}

/// Local connector wrapping the shared feed state.
struct FeedConnector(Arc<RelayFeed>);

impl ChangeFeed for FeedConnector {
    fn subscribe(
        &self,
        board: &BoardId,
    ) -> Result<Box<dyn FeedHandle>, easel::session::TransportError> {
        if self.0.fail.load(Ordering::SeqCst) {
            return Err(easel::session::TransportError::SubscribeFailed {
                board: *board,
                reason: "offline".into(),
            });
        }
        let (tx, rx) = EventSubscription::channel();
        tx.send_status(ConnectionStatus::Subscribed);
        self.0.senders.lock().unwrap().push(tx);
        Ok(Box::new(RelayHandle {
            subscription: Some(rx),
            published: Arc::clone(&self.0),
        }))
    }
}

fn open_session(
    board: BoardId,
    actor: &str,
    store: Arc<MemoryStore>,
    feed: Arc<RelayFeed>,
) -> SessionCache {
    let mut cache = SessionCache::open(
        board,
        ActorId::new(actor).unwrap(),
        store,
        Arc::new(FeedConnector(feed)),
        &Config::default(),
    )
    .expect("open session");
    cache.pump(Instant::now());
    cache
}

fn eid(id: &str) -> ElementId {
    ElementId::parse(id).unwrap()
}

fn shape(id: &str, fields: &[(&str, FieldValue)]) -> Element {
    Element::with_fields(
        eid(id),
        ElementKind::Shape,
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    )
}

fn relay(from: &Arc<RelayFeed>, to: &Arc<RelayFeed>, target: &mut SessionCache) {
    let events = from.take_published();
    let sender = to.sender();
    for event in events {
        sender.send_event(event);
    }
    target.pump(Instant::now());
}

fn fields_of(cache: &SessionCache, id: &str) -> BTreeMap<String, FieldValue> {
    cache.element(&eid(id)).expect("element").fields.clone()
}

#[test]
fn concurrent_disjoint_edits_both_survive() {
    let board = BoardId::generate();
    let store = Arc::new(MemoryStore::default());
    let feed_a = Arc::new(RelayFeed::default());
    let feed_b = Arc::new(RelayFeed::default());

    let mut alice = open_session(board, "alice", store.clone(), feed_a.clone());
    let mut bob = open_session(board, "bob", store, feed_b.clone());

    alice
        .create_elements(vec![shape(
            "el-box",
            &[
                ("x", FieldValue::Number(0.0)),
                ("fill", FieldValue::Text("white".into())),
            ],
        )])
        .unwrap();
    relay(&feed_a, &feed_b, &mut bob);

    // Concurrent edits to disjoint fields of the same element.
    alice.apply_local_edit(
        &eid("el-box"),
        [("x".to_string(), FieldValue::Number(40.0))].into(),
    );
    bob.apply_local_edit(
        &eid("el-box"),
        [("fill".to_string(), FieldValue::Text("teal".into()))].into(),
    );

    relay(&feed_a, &feed_b, &mut bob);
    relay(&feed_b, &feed_a, &mut alice);

    assert_eq!(fields_of(&alice, "el-box"), fields_of(&bob, "el-box"));
    assert_eq!(
        alice.element(&eid("el-box")).unwrap().fields["x"],
        FieldValue::Number(40.0)
    );
    assert_eq!(
        alice.element(&eid("el-box")).unwrap().fields["fill"],
        FieldValue::Text("teal".into())
    );
}

#[test]
fn conflicting_edits_converge_regardless_of_delivery_order() {
    let board = BoardId::generate();
    let store = Arc::new(MemoryStore::default());
    let feed_a = Arc::new(RelayFeed::default());
    let feed_b = Arc::new(RelayFeed::default());

    let mut alice = open_session(board, "alice", store.clone(), feed_a.clone());
    let mut bob = open_session(board, "bob", store, feed_b.clone());

    alice
        .create_elements(vec![shape("el-box", &[("fill", FieldValue::Text("white".into()))])])
        .unwrap();
    relay(&feed_a, &feed_b, &mut bob);
    feed_b.take_published();

    // Both write the same field while partitioned.
    alice.apply_local_edit(
        &eid("el-box"),
        [("fill".to_string(), FieldValue::Text("red".into()))].into(),
    );
    bob.apply_local_edit(
        &eid("el-box"),
        [("fill".to_string(), FieldValue::Text("blue".into()))].into(),
    );

    let from_alice = feed_a.take_published();
    let from_bob = feed_b.take_published();

    // Deliver in opposite orders to each side.
    for event in from_bob.iter().cloned() {
        feed_a.sender().send_event(event);
    }
    alice.pump(Instant::now());
    for event in from_alice.iter().cloned() {
        feed_b.sender().send_event(event);
    }
    bob.pump(Instant::now());

    let winner_a = fields_of(&alice, "el-box")["fill"].clone();
    let winner_b = fields_of(&bob, "el-box")["fill"].clone();
    assert_eq!(winner_a, winner_b, "same winner on both replicas");
}

#[test]
fn offline_edits_survive_reconciliation() {
    let board = BoardId::generate();
    let store = Arc::new(MemoryStore::default());
    let feed = Arc::new(RelayFeed::default());

    let mut session = open_session(board, "alice", store.clone(), feed.clone());
    session
        .create_elements(vec![shape("el-box", &[("fill", FieldValue::Text("local".into()))])])
        .unwrap();

    // Canonical storage carries an older write for the same field.
    *store.snapshot.lock().unwrap() = BoardSnapshot {
        elements: {
            let mut wire = easel::WireElement {
                id: eid("el-box"),
                kind: ElementKind::Shape,
                fields: [("fill".to_string(), FieldValue::Text("stale".into()))].into(),
                stamps: [(
                    "fill".to_string(),
                    easel::WireStamp {
                        wall_ms: 1,
                        counter: 0,
                        actor: "someone".into(),
                    },
                )]
                .into(),
                deleted: None,
                deleted_reason: None,
            };
            wire.fields
                .insert("note".to_string(), FieldValue::Text("from-server".into()));
            wire.stamps.insert(
                "note".to_string(),
                easel::WireStamp {
                    wall_ms: 2,
                    counter: 0,
                    actor: "someone".into(),
                },
            );
            vec![wire]
        },
    };

    // Drop the connection, then let the retry succeed and reconcile.
    let t0 = Instant::now();
    feed.sender().send_status(ConnectionStatus::Closed);
    session.pump(t0);
    session.pump(t0 + Config::default().backoff().base + std::time::Duration::from_millis(1));
    session.pump(t0 + Config::default().backoff().base + std::time::Duration::from_millis(2));

    let fields = fields_of(&session, "el-box");
    assert_eq!(fields["fill"], FieldValue::Text("local".into()));
    assert_eq!(fields["note"], FieldValue::Text("from-server".into()));
}

#[test]
fn n_edits_then_n_undos_restore_tracked_fields() {
    let board = BoardId::generate();
    let store = Arc::new(MemoryStore::default());
    let feed = Arc::new(RelayFeed::default());
    let mut session = open_session(board, "alice", store, feed);

    session
        .create_elements(vec![shape(
            "el-box",
            &[
                ("x", FieldValue::Number(0.0)),
                ("y", FieldValue::Number(0.0)),
                ("fill", FieldValue::Text("white".into())),
            ],
        )])
        .unwrap();
    let before = fields_of(&session, "el-box");

    let edits: Vec<(&str, FieldValue)> = vec![
        ("x", FieldValue::Number(10.0)),
        ("y", FieldValue::Number(20.0)),
        ("fill", FieldValue::Text("red".into())),
        ("x", FieldValue::Number(30.0)),
        ("fill", FieldValue::Text("blue".into())),
    ];
    let n = edits.len();
    for (name, value) in edits {
        session.update_elements(vec![(
            eid("el-box"),
            [(name.to_string(), value)].into(),
        )]);
    }

    for _ in 0..n {
        assert!(session.undo());
    }
    assert_eq!(fields_of(&session, "el-box"), before);
}

#[test]
fn registry_shares_sessions_and_tears_down() {
    let store = Arc::new(MemoryStore::default());
    let feed = Arc::new(RelayFeed::default());
    let registry = SessionRegistry::new(
        ActorId::new("alice").unwrap(),
        store,
        Arc::new(FeedConnector(feed)),
        Config::default(),
    );
    let board = BoardId::generate();

    let first = registry.load(board).unwrap();
    let second = registry.load(board).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    first
        .lock()
        .unwrap()
        .create_elements(vec![shape("el-box", &[])])
        .unwrap();
    assert_eq!(second.lock().unwrap().elements().count(), 1);

    registry.teardown(&board);
    assert!(registry.get(&board).is_none());
}
