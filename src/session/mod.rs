//! Session layer: stateful machinery driving the core over the I/O seams.
//!
//! - clock: per-session HLC generator
//! - event: wire-level change events and connection statuses
//! - store / transport: durable-store and broadcast-feed seams
//! - writer: detached persistence write-through
//! - reconnect: connection FSM with bounded backoff
//! - cache: the authoritative per-board object cache
//! - registry: one session per board, deduplicated loads
//! - undo: history stacks and inverse computation

pub mod cache;
pub mod clock;
pub mod event;
pub mod reconnect;
pub mod registry;
pub mod store;
pub mod transport;
pub mod undo;
pub mod writer;

use thiserror::Error;

use crate::error::Transience;

pub use cache::SessionCache;
pub use clock::Clock;
pub use event::{ChangeEvent, ChangeKind, ConnectionStatus, FeedMessage, WireElement, WireStamp};
pub use reconnect::{BackoffPolicy, ConnectionState, ReconnectManager, StatusOutcome};
pub use registry::{SessionRegistry, SharedSession};
pub use store::{BoardSnapshot, BoardStore, PersistChange, StoreError};
pub use transport::{ChangeFeed, EventSubscription, FeedHandle, FeedSender, TransportError};
pub use undo::{FieldPatch, History, UndoEntry};
pub use writer::WriteThrough;

/// Why a session load attempt failed. Fatal to that attempt; no partial
/// cache is published.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl LoadError {
    pub fn transience(&self) -> Transience {
        match self {
            LoadError::Store(err) => err.transience(),
            LoadError::Transport(err) => err.transience(),
        }
    }
}
