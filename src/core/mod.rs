//! Core domain types.
//!
//! Module hierarchy follows type dependency order:
//! - time: HLC primitives
//! - identity: ActorId, BoardId, ElementId
//! - element: ElementKind, FieldValue, Element
//! - merge: FieldClocks, field-level LWW merge
//! - tombstone: soft-delete records
//! - state: BoardState, the authoritative arena
//! - limits: operational caps

pub mod element;
pub mod error;
pub mod identity;
pub mod limits;
pub mod merge;
pub mod state;
pub mod time;
pub mod tombstone;

pub use element::{Element, ElementKind, FieldValue, TOPOLOGY_FIELDS, is_topology_field};
pub use error::{CoreError, InvalidId};
pub use identity::{ActorId, BoardId, ElementId};
pub use limits::Limits;
pub use merge::{FieldClocks, MergeOutcome, merge_fields};
pub use state::{BoardState, ElementEntry, RemoteApply};
pub use time::{Stamp, WallClock, WriteStamp};
pub use tombstone::Tombstone;
