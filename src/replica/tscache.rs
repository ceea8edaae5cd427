//! The timestamp cache remembers the high-water read and write timestamps of
//! recently accessed key spans. Before proposing a write, the replica
//! consults the cache: a write must be ordered after the most recent read of
//! any overlapping key, and a non-transactional write after the most recent
//! write. Entries are tagged with their transaction so a transaction does not
//! conflict with its own accesses.
//!
//! The cache is time-decayed: entries older than a fixed window below the
//! cache's high-water mark are evicted, and evicted spans conservatively
//! report the low-water mark instead.

use crate::hlc::Timestamp;
use crate::types::{Span, TxnID};

use std::collections::VecDeque;

/// The minimum age an entry must reach before it can be evicted, in
/// nanoseconds below the cache's latest timestamp.
pub const MIN_CACHE_WINDOW_NANOS: i64 = 10 * 1_000_000_000;

struct Entry {
    span: Span,
    timestamp: Timestamp,
    txn_id: Option<TxnID>,
    read_only: bool,
}

/// A time-decayed cache of high-water access timestamps per key span.
pub struct TimestampCache {
    /// Entries in insertion order, which closely tracks timestamp order;
    /// eviction pops from the front.
    entries: VecDeque<Entry>,
    /// The eviction floor: evicted or never-recorded spans report this.
    low_water: Timestamp,
    /// The highest timestamp ever recorded, driving the eviction window.
    latest: Timestamp,
}

impl TimestampCache {
    /// Creates a cache with the given low-water mark, typically the clock
    /// reading at replica creation.
    pub fn new(low_water: Timestamp) -> Self {
        TimestampCache { entries: VecDeque::new(), low_water, latest: low_water }
    }

    /// Records an access to the span [start, end) at the given timestamp.
    /// An empty end key records a point access.
    pub fn add(
        &mut self,
        start: &[u8],
        end: &[u8],
        timestamp: Timestamp,
        txn_id: Option<TxnID>,
        read_only: bool,
    ) {
        self.latest.forward(timestamp);
        let span = if end.is_empty() {
            Span::point(start.to_vec())
        } else {
            Span::new(start.to_vec(), end.to_vec())
        };
        self.entries.push_back(Entry { span, timestamp, txn_id, read_only });
        self.evict();
    }

    /// Returns the maximum read and write timestamps of accesses overlapping
    /// [start, end) by other transactions, at least the low-water mark.
    /// Accesses by the given transaction itself are ignored.
    pub fn get_max(
        &self,
        start: &[u8],
        end: &[u8],
        txn_id: Option<TxnID>,
    ) -> (Timestamp, Timestamp) {
        let span = if end.is_empty() {
            Span::point(start.to_vec())
        } else {
            Span::new(start.to_vec(), end.to_vec())
        };
        let mut max_read = self.low_water;
        let mut max_write = self.low_water;
        for entry in &self.entries {
            if txn_id.is_some() && entry.txn_id == txn_id {
                continue;
            }
            if !entry.span.overlaps(&span) {
                continue;
            }
            if entry.read_only {
                max_read.forward(entry.timestamp);
            } else {
                max_write.forward(entry.timestamp);
            }
        }
        (max_read, max_write)
    }

    /// Raises the low-water mark, dropping all entries below it. Used when
    /// leadership changes hands: the new leader cannot have observed the old
    /// leader's reads, so it must assume everything up to the lease start has
    /// been read.
    pub fn set_low_water(&mut self, low_water: Timestamp) {
        if !self.low_water.forward(low_water) {
            return;
        }
        self.latest.forward(low_water);
        self.entries.retain(|e| e.timestamp > low_water);
    }

    /// The current low-water mark.
    pub fn low_water(&self) -> Timestamp {
        self.low_water
    }

    /// Evicts entries that have aged out of the cache window, folding their
    /// timestamps into the low-water mark.
    fn evict(&mut self) {
        while let Some(front) = self.entries.front() {
            if front.timestamp.wall_time + MIN_CACHE_WINDOW_NANOS >= self.latest.wall_time {
                break;
            }
            let evicted = self.entries.pop_front().unwrap();
            self.low_water.forward(evicted.timestamp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: i64 = 1_000_000_000;

    #[test]
    fn reads_and_writes_tracked_separately() {
        let mut cache = TimestampCache::new(Timestamp::new(1, 0));
        cache.add(b"a", b"c", Timestamp::new(50, 0), None, true);
        cache.add(b"b", b"", Timestamp::new(60, 0), None, false);

        let (read, write) = cache.get_max(b"b", b"", None);
        assert_eq!(read, Timestamp::new(50, 0));
        assert_eq!(write, Timestamp::new(60, 0));

        // Non-overlapping spans report the low-water mark.
        let (read, write) = cache.get_max(b"x", b"z", None);
        assert_eq!(read, Timestamp::new(1, 0));
        assert_eq!(write, Timestamp::new(1, 0));
    }

    #[test]
    fn transactions_do_not_collide_with_themselves() {
        let mut cache = TimestampCache::new(Timestamp::ZERO);
        cache.add(b"a", b"", Timestamp::new(50, 0), Some(7), true);

        let (read, _) = cache.get_max(b"a", b"", Some(7));
        assert_eq!(read, Timestamp::ZERO);
        let (read, _) = cache.get_max(b"a", b"", Some(8));
        assert_eq!(read, Timestamp::new(50, 0));
        let (read, _) = cache.get_max(b"a", b"", None);
        assert_eq!(read, Timestamp::new(50, 0));
    }

    #[test]
    fn eviction_folds_into_low_water() {
        let mut cache = TimestampCache::new(Timestamp::ZERO);
        cache.add(b"a", b"", Timestamp::new(SECOND, 0), None, true);
        // Advancing the latest timestamp beyond the window evicts the entry.
        cache.add(b"z", b"", Timestamp::new(12 * SECOND, 0), None, true);

        let (read, _) = cache.get_max(b"a", b"", None);
        assert_eq!(read, Timestamp::new(SECOND, 0)); // via low water now
        assert_eq!(cache.low_water(), Timestamp::new(SECOND, 0));

        // The evicted span conservatively reports the low-water mark for
        // everything.
        let (read, _) = cache.get_max(b"m", b"", None);
        assert_eq!(read, Timestamp::new(SECOND, 0));
    }

    #[test]
    fn set_low_water_clears_older_entries() {
        let mut cache = TimestampCache::new(Timestamp::ZERO);
        cache.add(b"a", b"", Timestamp::new(10, 0), None, false);
        cache.add(b"b", b"", Timestamp::new(30, 0), None, false);

        cache.set_low_water(Timestamp::new(20, 0));
        let (_, write) = cache.get_max(b"a", b"", None);
        assert_eq!(write, Timestamp::new(20, 0));
        let (_, write) = cache.get_max(b"b", b"", None);
        assert_eq!(write, Timestamp::new(30, 0));

        // The low-water mark never regresses.
        cache.set_low_water(Timestamp::new(5, 0));
        assert_eq!(cache.low_water(), Timestamp::new(20, 0));
    }
}
