//! Per-session HLC generator.
//!
//! The clock issues monotonically increasing stamps under this session's
//! actor identity, and folds in remote stamps so subsequent local events
//! order after everything the session has observed.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::{ActorId, Stamp, WriteStamp};

pub struct Clock {
    actor: ActorId,
    /// Last known wall time in milliseconds.
    wall_ms: u64,
    /// Logical counter for tie-breaking within same wall time.
    counter: u32,
}

impl Clock {
    /// Create a new clock initialized to current wall time.
    pub fn new(actor: ActorId) -> Self {
        Self {
            actor,
            wall_ms: Self::now_ms(),
            counter: 0,
        }
    }

    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    /// Generate a new stamp, advancing the clock.
    ///
    /// Guarantees:
    /// - Returned stamp is strictly greater than any previous stamp from
    ///   this clock
    /// - Monotonic even if wall clock goes backward
    pub fn tick(&mut self) -> Stamp {
        let now = Self::now_ms();

        if now > self.wall_ms {
            // Wall clock advanced - use new time, reset counter
            self.wall_ms = now;
            self.counter = 0;
        } else {
            // Same millisecond or clock went backward - increment counter
            self.counter += 1;
        }

        Stamp::new(
            WriteStamp::new(self.wall_ms, self.counter),
            self.actor.clone(),
        )
    }

    /// Fold an observed remote stamp into the clock.
    ///
    /// Ensures the next tick() produces a stamp strictly greater than the
    /// remote one, under this session's own actor identity. Call this for
    /// every stamp seen on the wire.
    pub fn observe(&mut self, remote: &Stamp) {
        let now = Self::now_ms();
        let remote = &remote.at;

        if remote.wall_ms > self.wall_ms {
            // Remote is ahead - adopt its time
            self.wall_ms = remote.wall_ms;
            self.counter = remote.counter;
        } else if remote.wall_ms == self.wall_ms && remote.counter > self.counter {
            // Same time but remote has higher counter
            self.counter = remote.counter;
        }
        // else: our clock is already ahead, nothing to do

        // Also advance to current wall time if it's ahead
        if now > self.wall_ms {
            self.wall_ms = now;
            self.counter = 0;
        }
    }

    /// Current wall time in milliseconds since Unix epoch.
    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> Clock {
        Clock::new(ActorId::new("test-actor").unwrap())
    }

    #[test]
    fn tick_is_monotonic() {
        let mut clock = clock();
        let s1 = clock.tick();
        let s2 = clock.tick();
        let s3 = clock.tick();

        assert!(s2 > s1);
        assert!(s3 > s2);
    }

    #[test]
    fn same_millisecond_ticks_increment_counter() {
        let mut clock = clock();
        // Pin wall time into the future so now() cannot advance past it.
        clock.wall_ms = u64::MAX - 1;
        clock.counter = 0;

        let s1 = clock.tick();
        let s2 = clock.tick();
        assert_eq!(s1.at.counter, 1);
        assert_eq!(s2.at.counter, 2);
        assert_eq!(s1.at.wall_ms, s2.at.wall_ms);
    }

    #[test]
    fn observe_advances_clock_past_remote() {
        let mut clock = clock();
        let local = clock.tick();

        let remote = Stamp::new(
            WriteStamp::new(local.at.wall_ms + 10_000, 5),
            ActorId::new("remote").unwrap(),
        );
        clock.observe(&remote);

        let after = clock.tick();
        assert!(after > remote);
        assert_eq!(after.by, *clock.actor());
    }

    #[test]
    fn observe_with_older_stamp_is_noop() {
        let mut clock = clock();
        let s1 = clock.tick();
        let s2 = clock.tick();

        let old_remote = Stamp::new(s1.at.clone(), ActorId::new("remote").unwrap());
        clock.observe(&old_remote);

        let s3 = clock.tick();
        assert!(s3 > s2);
    }

    #[test]
    fn observe_equal_wall_takes_counter_max() {
        let mut clock = clock();
        clock.wall_ms = u64::MAX - 1;
        clock.counter = 2;

        let remote = Stamp::new(
            WriteStamp::new(u64::MAX - 1, 7),
            ActorId::new("remote").unwrap(),
        );
        clock.observe(&remote);

        let next = clock.tick();
        assert_eq!(next.at.counter, 8);
        assert!(next > remote);
    }
}
