//! Session registry.
//!
//! An explicit registry type - constructed, passed by reference, torn
//! down - rather than ambient module state. Exactly one SessionCache may
//! exist per board id within a process, and concurrent load requests for
//! the same board share a single in-flight load so duplicate subscriptions
//! never stack.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use crate::config::Config;
use crate::core::{ActorId, BoardId};
use crate::session::LoadError;
use crate::session::cache::SessionCache;
use crate::session::store::BoardStore;
use crate::session::transport::ChangeFeed;

pub type SharedSession = Arc<Mutex<SessionCache>>;

enum Slot {
    Loading,
    Ready(SharedSession),
}

pub struct SessionRegistry {
    slots: Mutex<HashMap<BoardId, Slot>>,
    loaded: Condvar,
    actor: ActorId,
    store: Arc<dyn BoardStore>,
    feed: Arc<dyn ChangeFeed>,
    config: Config,
}

impl SessionRegistry {
    pub fn new(
        actor: ActorId,
        store: Arc<dyn BoardStore>,
        feed: Arc<dyn ChangeFeed>,
        config: Config,
    ) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            loaded: Condvar::new(),
            actor,
            store,
            feed,
            config,
        }
    }

    /// Load a board session, or return the one already open.
    ///
    /// If a load for the same board is already in flight, wait for it and
    /// share its result instead of fetching again. A failed load publishes
    /// no cache; waiters observe the cleared slot and may attempt their
    /// own load.
    pub fn load(&self, board: BoardId) -> Result<SharedSession, LoadError> {
        {
            let mut slots = self.slots.lock().expect("registry lock");
            loop {
                match slots.get(&board) {
                    Some(Slot::Ready(session)) => return Ok(Arc::clone(session)),
                    Some(Slot::Loading) => {
                        slots = self.loaded.wait(slots).expect("registry lock");
                    }
                    None => {
                        slots.insert(board, Slot::Loading);
                        break;
                    }
                }
            }
        }

        let result = SessionCache::open(
            board,
            self.actor.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.feed),
            &self.config,
        );

        let mut slots = self.slots.lock().expect("registry lock");
        match result {
            Ok(cache) => {
                let session = Arc::new(Mutex::new(cache));
                slots.insert(board, Slot::Ready(Arc::clone(&session)));
                self.loaded.notify_all();
                Ok(session)
            }
            Err(err) => {
                slots.remove(&board);
                self.loaded.notify_all();
                tracing::warn!(%board, "session load failed: {err}");
                Err(err)
            }
        }
    }

    /// The open session for a board, if any.
    pub fn get(&self, board: &BoardId) -> Option<SharedSession> {
        let slots = self.slots.lock().expect("registry lock");
        match slots.get(board) {
            Some(Slot::Ready(session)) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    pub fn open_count(&self) -> usize {
        let slots = self.slots.lock().expect("registry lock");
        slots
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    /// Tear a session down and release its slot. Pending reconnect timers
    /// are cancelled so no stray retry fires after the session is gone.
    pub fn teardown(&self, board: &BoardId) {
        let removed = {
            let mut slots = self.slots.lock().expect("registry lock");
            slots.remove(board)
        };
        if let Some(Slot::Ready(session)) = removed {
            session.lock().expect("session lock").teardown();
        }
    }
}
