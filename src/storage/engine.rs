use crate::error::Result;

use itertools::{EitherOrBoth, Itertools as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex};

/// A key/value storage engine, where both keys and values are arbitrary byte
/// strings stored in lexicographical key order. Writes are only guaranteed
/// durable after calling flush().
///
/// Only supports single-threaded use since all methods (including reads) take
/// a mutable reference -- serialized access can't be avoided anyway, since
/// command application is serial. Concurrent callers share an engine via
/// [`SharedEngine`], which serializes access behind a mutex.
pub trait Engine: std::fmt::Display + Send {
    /// The iterator returned by scan().
    type ScanIterator<'a>: ScanIterator + 'a
    where
        Self: Sized + 'a; // omit in trait objects, for object safety

    /// Deletes a key, or does nothing if it does not exist.
    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// Flushes any buffered data to the underlying storage medium.
    fn flush(&mut self) -> Result<()>;

    /// Gets a value for a key, if it exists.
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Iterates over an ordered range of key/value pairs.
    fn scan(&mut self, range: impl std::ops::RangeBounds<Vec<u8>>) -> Self::ScanIterator<'_>
    where
        Self: Sized; // omit in trait objects, for object safety

    /// Like scan, but can be used from trait objects. The iterator will use
    /// dynamic dispatch, which has a minor performance penalty.
    fn scan_dyn(&mut self, range: (Bound<Vec<u8>>, Bound<Vec<u8>>)) -> Box<dyn ScanIterator + '_>;

    /// Sets a value for a key, replacing the existing value if any.
    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()>;

    /// Returns engine status.
    fn status(&mut self) -> Result<Status>;
}

/// A scan iterator, with a blanket implementation (in lieu of trait aliases).
pub trait ScanIterator: DoubleEndedIterator<Item = Result<(Vec<u8>, Vec<u8>)>> {}

impl<I: DoubleEndedIterator<Item = Result<(Vec<u8>, Vec<u8>)>>> ScanIterator for I {}

/// Engine status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// The name of the storage engine.
    pub name: String,
    /// The number of live keys in the engine.
    pub keys: u64,
    /// The logical size of live key/value pairs.
    pub size: u64,
}

/// A storage engine shared between a store's replicas and their in-flight
/// write batches, serialized behind a mutex.
pub type SharedEngine = Arc<Mutex<Box<dyn Engine>>>;

/// Wraps an engine as a SharedEngine.
pub fn share(engine: impl Engine + 'static) -> SharedEngine {
    Arc::new(Mutex::new(Box::new(engine)))
}

/// An atomic write batch. Writes are buffered in memory and applied to the
/// engine all-or-nothing on commit; a dropped batch leaves the engine
/// untouched. Reads through the batch see its own writes overlaid on the
/// engine, so command execution observes its earlier effects.
pub struct WriteBatch {
    engine: SharedEngine,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl WriteBatch {
    /// Creates a new, empty write batch on the given engine.
    pub fn new(engine: SharedEngine) -> Self {
        WriteBatch { engine, writes: BTreeMap::new() }
    }

    /// Returns the engine backing this batch.
    pub fn engine(&self) -> SharedEngine {
        self.engine.clone()
    }

    /// Buffers a write of key = value.
    pub fn set(&mut self, key: &[u8], value: Vec<u8>) {
        self.writes.insert(key.to_vec(), Some(value));
    }

    /// Buffers a deletion of key.
    pub fn delete(&mut self, key: &[u8]) {
        self.writes.insert(key.to_vec(), None);
    }

    /// Gets a value for a key, preferring buffered writes.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(write) = self.writes.get(key) {
            return Ok(write.clone());
        }
        self.engine.lock()?.get(key)
    }

    /// Scans an ordered range of key/value pairs, merging buffered writes
    /// over the engine contents. Returns an owned result, since the engine
    /// lock cannot be held across the caller's processing.
    pub fn scan(&self, range: (Bound<Vec<u8>>, Bound<Vec<u8>>)) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let base = self.engine.lock()?.scan_dyn(range.clone()).collect::<Result<Vec<_>>>()?;
        let overlay = self.writes.range(range);
        let merged = base
            .into_iter()
            .merge_join_by(overlay, |(base_key, _), (write_key, _)| {
                base_key.as_slice().cmp(write_key.as_slice())
            })
            .filter_map(|pair| match pair {
                EitherOrBoth::Left((key, value)) => Some((key, value)),
                EitherOrBoth::Right((key, value)) | EitherOrBoth::Both(_, (key, value)) => {
                    value.as_ref().map(|v| (key.clone(), v.clone()))
                }
            })
            .collect();
        Ok(merged)
    }

    /// Scans all key/value pairs starting with the given binary prefix.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let start = Bound::Included(prefix.to_vec());
        let end = match prefix.iter().rposition(|b| *b != 0xff) {
            Some(i) => Bound::Excluded(
                prefix.iter().take(i).copied().chain(std::iter::once(prefix[i] + 1)).collect(),
            ),
            None => Bound::Unbounded,
        };
        self.scan((start, end))
    }

    /// Commits the batch, applying all buffered writes to the engine
    /// atomically (under the engine lock) and flushing.
    pub fn commit(self) -> Result<()> {
        let mut engine = self.engine.lock()?;
        for (key, write) in self.writes {
            match write {
                Some(value) => engine.set(&key, value)?,
                None => engine.delete(&key)?,
            }
        }
        engine.flush()
    }
}
