//! Tombstone - soft-delete record for an element.
//!
//! Deletes keep their own stamp so a stale, out-of-order update arriving
//! after the delete can be rejected as older instead of resurrecting the
//! element unopposed.

use serde::{Deserialize, Serialize};

use super::identity::ElementId;
use super::time::Stamp;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: ElementId,
    pub deleted: Stamp,
    pub reason: Option<String>,
}

impl Tombstone {
    pub fn new(id: ElementId, deleted: Stamp, reason: Option<String>) -> Self {
        Self {
            id,
            deleted,
            reason,
        }
    }

    /// Merge: keep later deletion stamp.
    pub fn join(a: &Self, b: &Self) -> Self {
        debug_assert_eq!(a.id, b.id, "join requires same id");
        if a.deleted >= b.deleted {
            a.clone()
        } else {
            b.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identity::ActorId;
    use crate::core::time::WriteStamp;

    #[test]
    fn join_keeps_later_stamp() {
        let id = ElementId::parse("el-x1").unwrap();
        let early = Tombstone::new(
            id.clone(),
            Stamp::new(WriteStamp::new(100, 0), ActorId::new("a").unwrap()),
            None,
        );
        let late = Tombstone::new(
            id,
            Stamp::new(WriteStamp::new(200, 0), ActorId::new("b").unwrap()),
            Some("cleanup".into()),
        );
        assert_eq!(Tombstone::join(&early, &late), late);
        assert_eq!(Tombstone::join(&late, &early), late);
    }
}
