#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod session;
pub mod telemetry;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::config::Config;
pub use crate::core::{
    ActorId, BoardId, BoardState, Element, ElementId, ElementKind, FieldClocks, FieldValue,
    Limits, Stamp, Tombstone, WallClock, WriteStamp,
};
pub use crate::session::{
    BoardSnapshot, BoardStore, ChangeEvent, ChangeFeed, ChangeKind, Clock, ConnectionState,
    ConnectionStatus, EventSubscription, FeedHandle, FeedMessage, FeedSender, History, LoadError,
    PersistChange, SessionCache, SessionRegistry, UndoEntry, WireElement, WireStamp,
};
