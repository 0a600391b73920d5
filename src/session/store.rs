//! Durable storage seam.
//!
//! The core never talks to a database directly; it consumes this trait at
//! initial load and at every reconciliation pass, and hands write-throughs
//! to it from the detached writer.

use thiserror::Error;

use crate::core::BoardId;
use crate::error::Transience;
use crate::session::event::WireElement;

/// Canonical board contents as fetched from durable storage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoardSnapshot {
    pub elements: Vec<WireElement>,
}

/// One write-through unit.
#[derive(Clone, Debug, PartialEq)]
pub enum PersistChange {
    Upsert(WireElement),
    Delete(WireElement),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("store rejected request: {reason}")]
    Rejected { reason: String },
    #[error("malformed store payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl StoreError {
    pub fn transience(&self) -> Transience {
        match self {
            StoreError::Unavailable { .. } => Transience::Retryable,
            StoreError::Rejected { .. } => Transience::Permanent,
            StoreError::Malformed(_) => Transience::Permanent,
        }
    }
}

/// Durable store collaborator.
///
/// `fetch` failure is fatal to the load attempt that issued it; no partial
/// cache is ever published. `persist` is called from the write-through
/// worker after the cache has already been updated optimistically - a
/// failure never invalidates the applied edit.
pub trait BoardStore: Send + Sync {
    fn fetch(&self, board: &BoardId) -> Result<BoardSnapshot, StoreError>;
    fn persist(&self, board: &BoardId, changes: &[PersistChange]) -> Result<(), StoreError>;
}
