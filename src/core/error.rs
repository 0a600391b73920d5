//! Core error types.

use thiserror::Error;

use crate::error::Transience;

/// Invalid identifier errors, one variant per identity atom.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidId {
    #[error("invalid actor id {raw:?}: {reason}")]
    Actor { raw: String, reason: String },
    #[error("invalid element id {raw:?}: {reason}")]
    Element { raw: String, reason: String },
}

/// Errors from the pure domain layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),

    #[error("board holds {count} elements, limit is {max}")]
    ElementLimitExceeded { count: usize, max: usize },

    #[error("field {field:?} payload is {size} bytes, limit is {max}")]
    FieldTooLarge {
        field: String,
        size: usize,
        max: usize,
    },
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        // Domain validation never succeeds on retry with the same inputs.
        Transience::Permanent
    }
}
