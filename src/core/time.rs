//! Time primitives.
//!
//! HLC (Hybrid Logical Clock) stamps for causal ordering.
//! WallClock for retention decisions (not ordering).

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::identity::ActorId;

/// HLC instant - the ordering primitive.
///
/// (wall_ms, counter) forms a total order within an actor.
/// !Copy intentional - forces explicit .clone() to think about causality.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WriteStamp {
    pub wall_ms: u64,
    pub counter: u32,
}

impl WriteStamp {
    pub fn new(wall_ms: u64, counter: u32) -> Self {
        Self { wall_ms, counter }
    }
}

impl PartialOrd for WriteStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WriteStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wall_ms
            .cmp(&other.wall_ms)
            .then_with(|| self.counter.cmp(&other.counter))
    }
}

/// Wall clock for tombstone retention - NOT for causal ordering.
///
/// Copy is fine here - it's just a measurement, not causality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WallClock(pub u64);

impl WallClock {
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self(ms)
    }
}

/// Stamp = WriteStamp + attribution.
///
/// This is what field-level merge compares - includes the actor so two
/// stamps generated in the same millisecond with the same counter still
/// order deterministically across replicas.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub at: WriteStamp,
    pub by: ActorId,
}

impl Stamp {
    pub fn new(at: WriteStamp, by: ActorId) -> Self {
        Self { at, by }
    }
}

impl PartialOrd for Stamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Stamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at
            .cmp(&other.at)
            .then_with(|| self.by.cmp(&other.by)) // deterministic tiebreak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(s: &str) -> ActorId {
        ActorId::new(s).unwrap()
    }

    #[test]
    fn write_stamp_orders_by_wall_then_counter() {
        let a = WriteStamp::new(100, 5);
        let b = WriteStamp::new(100, 6);
        let c = WriteStamp::new(101, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn stamp_actor_is_final_tiebreak() {
        let a = Stamp::new(WriteStamp::new(100, 0), actor("alpha"));
        let b = Stamp::new(WriteStamp::new(100, 0), actor("beta"));
        assert!(a < b);
        assert!(b > a);
    }

    #[test]
    fn stamp_order_is_antisymmetric_and_transitive() {
        let a = Stamp::new(WriteStamp::new(100, 0), actor("a"));
        let b = Stamp::new(WriteStamp::new(100, 1), actor("a"));
        let c = Stamp::new(WriteStamp::new(101, 0), actor("a"));
        assert!(a < b && b < c && a < c);
        assert_eq!(b.cmp(&a), Ordering::Greater);
        assert_eq!(a.cmp(&a.clone()), Ordering::Equal);
    }
}
