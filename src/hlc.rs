//! A hybrid logical clock: wall-clock time plus a logical tick counter. The
//! clock is monotone even when the physical clock jumps backwards, stays close
//! to real time, and captures causality when observing timestamps from other
//! nodes. Timestamps order first by wall time, then by logical ticks.

use crate::error::Result;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// A hybrid logical timestamp. The zero value means "no timestamp".
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Wall time in nanoseconds since the Unix epoch.
    pub wall_time: i64,
    /// Logical ticks to order events within the same wall time.
    pub logical: u32,
}

impl crate::encoding::Value for Timestamp {}

impl Timestamp {
    /// The zero timestamp, ordered before all others.
    pub const ZERO: Timestamp = Timestamp { wall_time: 0, logical: 0 };
    /// The maximum timestamp, ordered after all others.
    pub const MAX: Timestamp = Timestamp { wall_time: i64::MAX, logical: u32::MAX };

    pub fn new(wall_time: i64, logical: u32) -> Self {
        Timestamp { wall_time, logical }
    }

    pub fn is_zero(&self) -> bool {
        *self == Timestamp::ZERO
    }

    /// Returns the timestamp advanced by the given wall time and logical ticks.
    pub fn add(&self, wall_time: i64, logical: u32) -> Self {
        Timestamp { wall_time: self.wall_time + wall_time, logical: self.logical + logical }
    }

    /// Returns the smallest timestamp ordered after this one.
    pub fn next(&self) -> Self {
        match self.logical.checked_add(1) {
            Some(logical) => Timestamp { wall_time: self.wall_time, logical },
            None => Timestamp { wall_time: self.wall_time + 1, logical: 0 },
        }
    }

    /// Advances the timestamp to the given one if it is larger. Returns true
    /// if the timestamp moved.
    pub fn forward(&mut self, other: Timestamp) -> bool {
        if other > *self {
            *self = other;
            return true;
        }
        false
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}.{:09}", self.wall_time, self.logical)
    }
}

/// A hybrid logical clock. now() never regresses: if the physical clock goes
/// backwards or stalls, the logical component advances instead. update()
/// ratchets the clock past timestamps observed on other nodes, preserving
/// causality across message exchanges.
///
/// The physical time source is pluggable so tests can drive the clock
/// manually, see [`ManualClock`].
pub struct Clock {
    physical: Box<dyn Fn() -> i64 + Send + Sync>,
    state: Mutex<Timestamp>,
}

impl Clock {
    /// Creates a clock backed by the system wall clock.
    pub fn new() -> Self {
        Self::with_physical(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as i64)
                .unwrap_or(0)
        })
    }

    /// Creates a clock with the given physical time source, which must return
    /// nanoseconds since the Unix epoch.
    pub fn with_physical(physical: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        Clock { physical: Box::new(physical), state: Mutex::new(Timestamp::ZERO) }
    }

    /// Returns the current physical time in nanoseconds, without touching the
    /// hybrid clock state.
    pub fn physical_now(&self) -> i64 {
        (self.physical)()
    }

    /// Returns the next hybrid timestamp. Monotonically increasing across
    /// calls, even if the physical clock regresses.
    pub fn now(&self) -> Result<Timestamp> {
        let mut state = self.state.lock()?;
        let physical = (self.physical)();
        *state = if physical > state.wall_time {
            Timestamp::new(physical, 0)
        } else {
            state.next()
        };
        Ok(*state)
    }

    /// Ratchets the clock past an observed remote timestamp, such that
    /// subsequent now() calls order after it. Returns the updated clock
    /// reading.
    pub fn update(&self, remote: Timestamp) -> Result<Timestamp> {
        let mut state = self.state.lock()?;
        let physical = (self.physical)();
        let local = *state;
        *state = if physical > local.wall_time && physical > remote.wall_time {
            Timestamp::new(physical, 0)
        } else if remote > local {
            remote.next()
        } else {
            local.next()
        };
        Ok(*state)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// A manual physical time source for tests: a shared counter of nanoseconds,
/// advanced explicitly.
#[derive(Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(nanos: i64) -> Self {
        ManualClock { nanos: Arc::new(AtomicI64::new(nanos)) }
    }

    /// Creates a hybrid clock driven by this manual source.
    pub fn clock(&self) -> Clock {
        let nanos = self.nanos.clone();
        Clock::with_physical(move || nanos.load(Ordering::SeqCst))
    }

    pub fn set(&self, nanos: i64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }

    pub fn advance(&self, nanos: i64) {
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_ordering() {
        assert!(Timestamp::new(1, 0) < Timestamp::new(1, 1));
        assert!(Timestamp::new(1, 9) < Timestamp::new(2, 0));
        assert!(Timestamp::ZERO < Timestamp::new(0, 1));
        assert!(Timestamp::new(1, 1) < Timestamp::MAX);
    }

    #[test]
    fn timestamp_next_and_forward() {
        assert_eq!(Timestamp::new(3, 1).next(), Timestamp::new(3, 2));
        assert_eq!(Timestamp::new(3, u32::MAX).next(), Timestamp::new(4, 0));

        let mut ts = Timestamp::new(5, 0);
        assert!(!ts.forward(Timestamp::new(4, 9)));
        assert_eq!(ts, Timestamp::new(5, 0));
        assert!(ts.forward(Timestamp::new(5, 3)));
        assert_eq!(ts, Timestamp::new(5, 3));
    }

    #[test]
    fn clock_monotonic_when_physical_stalls() -> Result<()> {
        let manual = ManualClock::new(100);
        let clock = manual.clock();

        assert_eq!(clock.now()?, Timestamp::new(100, 0));
        assert_eq!(clock.now()?, Timestamp::new(100, 1));
        assert_eq!(clock.now()?, Timestamp::new(100, 2));

        manual.advance(50);
        assert_eq!(clock.now()?, Timestamp::new(150, 0));

        // A physical regression advances the logical component instead.
        manual.set(10);
        assert_eq!(clock.now()?, Timestamp::new(150, 1));
        Ok(())
    }

    #[test]
    fn clock_update_ratchets_past_remote() -> Result<()> {
        let manual = ManualClock::new(100);
        let clock = manual.clock();
        clock.now()?;

        // A remote timestamp ahead of us pulls the clock forward.
        let updated = clock.update(Timestamp::new(200, 5))?;
        assert_eq!(updated, Timestamp::new(200, 6));
        assert!(clock.now()? > Timestamp::new(200, 5));

        // A remote timestamp behind us is a no-op beyond a tick.
        let updated = clock.update(Timestamp::new(50, 0))?;
        assert_eq!(updated.wall_time, 200);
        Ok(())
    }
}
