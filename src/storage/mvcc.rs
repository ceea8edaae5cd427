//! This module implements MVCC (Multi-Version Concurrency Control) over the
//! storage engine, keyed by hybrid logical timestamps. It is the storage
//! substrate for command execution: every version of a user key is retained
//! as a separate engine key, reads observe the newest version at or below
//! their timestamp, and transactional writes lay down provisional versions
//! called intents.
//!
//! VERSIONS
//! ========
//!
//! Every write creates a new version of its key at the write's timestamp,
//! with deletes writing a special tombstone value. For example, the keys
//! a,b,c,d may have the following values at various timestamps (x is a
//! tombstone):
//!
//! Time
//! 5
//! 4  a4
//! 3      b3      x
//! 2
//! 1  a1      c1  d1
//!    a   b   c   d   Keys
//!
//! A read at t=2 will see the values a=a1, c=c1, d=d1. A read at t=5 will see
//! a=a4, b=b3, c=c1. Old versions are retained until garbage collected, which
//! also enables historical reads at past timestamps.
//!
//! INTENTS
//! =======
//!
//! A transactional write does not become visible immediately. Instead, it
//! writes its version like any other write, plus a metadata record marking
//! the version as an intent owned by the writing transaction. A reader that
//! encounters a foreign intent at or below its read timestamp cannot know
//! whether the transaction will commit, so a consistent read fails with a
//! conflict carrying the intent; an inconsistent read skips the intent,
//! reports it to the caller for asynchronous cleanup, and returns the newest
//! committed version instead. The transaction itself reads through its own
//! intents.
//!
//! Once the transaction's fate is decided, its intents are resolved: a commit
//! simply drops the metadata record (moving the version to the transaction's
//! final timestamp if it was pushed), while an abort removes the provisional
//! version as well. Writers that encounter any foreign intent conflict
//! regardless of timestamp order, since the key's future depends on the
//! outcome of the owning transaction.
//!
//! Transaction records, anchored at the transaction's first written key,
//! track the authoritative status (pending, committed or aborted) used during
//! resolution.

use super::WriteBatch;
use crate::encoding::bincode;
use crate::error::{Error, Result};
use crate::hlc::Timestamp;
use crate::keys::Key;
use crate::types::{Intent, Txn, TxnStatus};

use crate::encoding::Key as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Bound::{Excluded, Included};

/// MVCC statistics for a range, maintained incrementally by write execution
/// and merged into the persisted per-range record on apply. Counts are
/// logical totals across all versions, not live totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    /// Number of distinct user keys with at least one version.
    pub key_count: i64,
    /// Total size of counted user keys.
    pub key_bytes: i64,
    /// Number of versions written, including tombstones.
    pub val_count: i64,
    /// Total size of encoded version values.
    pub val_bytes: i64,
    /// Number of unresolved intents.
    pub intent_count: i64,
}

impl crate::encoding::Value for Stats {}

impl Stats {
    /// Merges another set of statistics into this one.
    pub fn merge(&mut self, other: &Stats) {
        self.key_count += other.key_count;
        self.key_bytes += other.key_bytes;
        self.val_count += other.val_count;
        self.val_bytes += other.val_bytes;
        self.intent_count += other.intent_count;
    }
}

/// Fetches the intent metadata record for a key, if any.
fn get_meta(batch: &WriteBatch, key: &[u8]) -> Result<Option<Txn>> {
    batch.get(&Key::Meta(key.into()).encode()?)?.map(|v| bincode::deserialize(&v)).transpose()
}

/// Writes or clears the intent metadata record for a key.
fn set_meta(batch: &mut WriteBatch, key: &[u8], txn: Option<&Txn>) -> Result<()> {
    let meta_key = Key::Meta(key.into()).encode()?;
    match txn {
        Some(txn) => batch.set(&meta_key, bincode::serialize(txn)?),
        None => batch.delete(&meta_key),
    }
    Ok(())
}

/// Returns the timestamp of the newest version of a key, if any.
fn newest_version(batch: &WriteBatch, key: &[u8]) -> Result<Option<Timestamp>> {
    let from = Key::version(key, Timestamp::ZERO).encode()?;
    let to = Key::version(key, Timestamp::MAX).encode()?;
    let Some((k, _)) = batch.scan((Included(from), Included(to)))?.pop() else {
        return Ok(None);
    };
    decode_version(&k).map(|(_, ts)| Some(ts))
}

/// Decodes a versioned engine key into the user key and timestamp.
fn decode_version(key: &[u8]) -> Result<(Vec<u8>, Timestamp)> {
    match Key::decode(key)? {
        Key::Version(key, wall_time, logical) => {
            Ok((key.into_owned(), Timestamp::new(wall_time, logical as u32)))
        }
        key => Err(Error::InvalidData(format!("expected version key, got {key:?}"))),
    }
}

/// Fetches a key's value at or below the given timestamp, or None if it does
/// not exist or is deleted. Also returns any intents skipped by an
/// inconsistent read; a consistent read instead fails on a foreign intent at
/// or below the read timestamp. A transaction reads through its own intents,
/// even if they have been pushed above the read timestamp.
pub fn get(
    batch: &WriteBatch,
    key: &[u8],
    ts: Timestamp,
    txn: Option<&Txn>,
    consistent: bool,
) -> Result<(Option<Vec<u8>>, Vec<Intent>)> {
    let mut limit = ts;
    let mut skip = None;
    let mut intents = Vec::new();
    if let Some(meta) = get_meta(batch, key)? {
        if txn.map(|t| t.id) == Some(meta.id) {
            // Our own intent is always visible to us.
            limit = limit.max(meta.timestamp);
        } else if meta.timestamp <= ts {
            let intent = Intent { key: key.to_vec(), end_key: Vec::new(), txn: meta.clone() };
            if consistent {
                return Err(Error::WriteIntent { intents: vec![intent], resolved: false });
            }
            skip = Some(meta.timestamp);
            intents.push(intent);
        }
    }

    let from = Key::version(key, Timestamp::ZERO).encode()?;
    let to = Key::version(key, limit).encode()?;
    for (k, v) in batch.scan((Included(from), Included(to)))?.into_iter().rev() {
        let (_, vts) = decode_version(&k)?;
        if skip == Some(vts) {
            continue;
        }
        return Ok((bincode::deserialize(&v)?, intents));
    }
    Ok((None, intents))
}

/// Scans the latest visible key/value pairs in the span [start, end) at the
/// given timestamp, skipping tombstones. Intent handling is as in get(),
/// except that a consistent scan collects all conflicting intents in the span
/// before failing, so the caller can resolve them in one go.
pub fn scan(
    batch: &WriteBatch,
    start: &[u8],
    end: &[u8],
    ts: Timestamp,
    txn: Option<&Txn>,
    consistent: bool,
) -> Result<(Vec<(Vec<u8>, Vec<u8>)>, Vec<Intent>)> {
    debug_assert!(!end.is_empty(), "scan requires a non-empty end key");

    // Collect intents in the span, partitioning them into our own (which
    // extend our visibility for that key) and conflicting foreign ones.
    let mut intents = Vec::new();
    let mut skip = HashMap::new();
    let mut own = HashMap::new();
    let meta_from = Key::Meta(start.into()).encode()?;
    let meta_to = Key::Meta(end.into()).encode()?;
    for (k, v) in batch.scan((Included(meta_from), Excluded(meta_to)))? {
        let Key::Meta(user_key) = Key::decode(&k)? else {
            return Err(Error::InvalidData(format!("expected meta key, got {k:x?}")));
        };
        let meta: Txn = bincode::deserialize(&v)?;
        if txn.map(|t| t.id) == Some(meta.id) {
            own.insert(user_key.into_owned(), meta.timestamp);
        } else if meta.timestamp <= ts {
            skip.insert(user_key.clone().into_owned(), meta.timestamp);
            intents.push(Intent { key: user_key.into_owned(), end_key: Vec::new(), txn: meta });
        }
    }
    if consistent && !intents.is_empty() {
        return Err(Error::WriteIntent { intents, resolved: false });
    }

    // Walk the versions in the span, keeping the newest visible version of
    // each key. Versions are ordered by key then timestamp, so later visible
    // versions overwrite earlier ones.
    let from = Key::version(start, Timestamp::ZERO).encode()?;
    let to = Key::version(end, Timestamp::ZERO).encode()?;
    let mut result: Vec<(Vec<u8>, Option<Vec<u8>>)> = Vec::new();
    for (k, v) in batch.scan((Included(from), Excluded(to)))? {
        let (user_key, vts) = decode_version(&k)?;
        let limit = own.get(&user_key).map(|own_ts| ts.max(*own_ts)).unwrap_or(ts);
        if vts > limit || skip.get(&user_key) == Some(&vts) {
            continue;
        }
        let value = bincode::deserialize(&v)?;
        match result.last_mut() {
            Some((key, slot)) if *key == user_key => *slot = value,
            _ => result.push((user_key, value)),
        }
    }
    let result = result.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))).collect();
    Ok((result, intents))
}

/// Writes a new version of a key, either directly (non-transactional) or as
/// an intent. None writes a deletion tombstone. Fails with a write conflict
/// if any foreign intent exists on the key, or with a write-too-old error if
/// a newer committed version exists.
fn write(
    batch: &mut WriteBatch,
    stats: &mut Stats,
    key: &[u8],
    ts: Timestamp,
    value: Option<Vec<u8>>,
    txn: Option<&Txn>,
) -> Result<()> {
    let newest = newest_version(batch, key)?;
    let first_version = newest.is_none();
    if let Some(meta) = get_meta(batch, key)? {
        if txn.map(|t| t.id) != Some(meta.id) {
            let intent = Intent { key: key.to_vec(), end_key: Vec::new(), txn: meta };
            return Err(Error::WriteIntent { intents: vec![intent], resolved: false });
        }
        // Replacing our own intent, possibly at a newer timestamp if the
        // transaction has been pushed.
        if meta.timestamp != ts {
            batch.delete(&Key::version(key, meta.timestamp).encode()?);
            stats.val_count -= 1;
        }
        stats.intent_count -= 1; // re-added below
    } else if let Some(vts) = newest {
        if ts < vts {
            return Err(Error::WriteTooOld { timestamp: ts, existing: vts });
        }
    }

    if let Some(txn) = txn {
        let mut meta = txn.clone();
        meta.timestamp = ts;
        set_meta(batch, key, Some(&meta))?;
        stats.intent_count += 1;
    } else {
        set_meta(batch, key, None)?;
    }

    let encoded = bincode::serialize(&value)?;
    stats.val_count += 1;
    stats.val_bytes += encoded.len() as i64;
    if first_version {
        stats.key_count += 1;
        stats.key_bytes += key.len() as i64;
    }
    batch.set(&Key::version(key, ts).encode()?, encoded);
    Ok(())
}

/// Sets a value for a key. See write() for conflict semantics.
pub fn put(
    batch: &mut WriteBatch,
    stats: &mut Stats,
    key: &[u8],
    ts: Timestamp,
    value: Vec<u8>,
    txn: Option<&Txn>,
) -> Result<()> {
    write(batch, stats, key, ts, Some(value), txn)
}

/// Deletes a key by writing a tombstone version.
pub fn delete(
    batch: &mut WriteBatch,
    stats: &mut Stats,
    key: &[u8],
    ts: Timestamp,
    txn: Option<&Txn>,
) -> Result<()> {
    write(batch, stats, key, ts, None, txn)
}

/// Deletes all live keys in the span [start, end), returning the number of
/// deleted keys. The read of the current live set is always consistent, so
/// conflicting intents in the span fail the request.
pub fn delete_range(
    batch: &mut WriteBatch,
    stats: &mut Stats,
    start: &[u8],
    end: &[u8],
    ts: Timestamp,
    txn: Option<&Txn>,
) -> Result<u64> {
    let (live, _) = scan(batch, start, end, ts, txn, true)?;
    let mut deleted = 0;
    for (key, _) in live {
        write(batch, stats, &key, ts, None, txn)?;
        deleted += 1;
    }
    Ok(deleted)
}

/// Sets a value for a key only if its current value matches the expected one
/// (None means the key must not exist).
pub fn conditional_put(
    batch: &mut WriteBatch,
    stats: &mut Stats,
    key: &[u8],
    ts: Timestamp,
    value: Vec<u8>,
    expected: Option<Vec<u8>>,
    txn: Option<&Txn>,
) -> Result<()> {
    let (actual, _) = get(batch, key, ts, txn, true)?;
    if actual != expected {
        return Err(Error::InvalidInput(format!(
            "unexpected value for key {}: expected {expected:?}, got {actual:?}",
            crate::types::fmt_key(key)
        )));
    }
    write(batch, stats, key, ts, Some(value), txn)
}

/// Increments a key's integer value by the given amount, returning the new
/// value. Missing keys count as zero.
pub fn increment(
    batch: &mut WriteBatch,
    stats: &mut Stats,
    key: &[u8],
    ts: Timestamp,
    by: i64,
    txn: Option<&Txn>,
) -> Result<i64> {
    let (value, _) = get(batch, key, ts, txn, true)?;
    let current: i64 = value.map(|v| bincode::deserialize(&v)).transpose()?.unwrap_or(0);
    let new = current + by;
    write(batch, stats, key, ts, Some(bincode::serialize(&new)?), txn)?;
    Ok(new)
}

/// Resolves the intent on a key owned by the given transaction, if any,
/// according to the transaction's status: a commit drops the metadata record
/// (relocating the version if the transaction was pushed), an abort removes
/// the provisional version as well, and a pending resolution just forwards
/// the intent's timestamp. Returns true if an intent was resolved.
pub fn resolve_intent(
    batch: &mut WriteBatch,
    stats: &mut Stats,
    key: &[u8],
    txn: &Txn,
) -> Result<bool> {
    let Some(meta) = get_meta(batch, key)? else { return Ok(false) };
    if meta.id != txn.id {
        return Ok(false);
    }

    // Relocate the version if the transaction's timestamp was pushed past
    // the intent's. Pushes only ever move timestamps forward.
    if txn.timestamp > meta.timestamp && txn.status != TxnStatus::Aborted {
        let old_key = Key::version(key, meta.timestamp).encode()?;
        if let Some(value) = batch.get(&old_key)? {
            batch.delete(&old_key);
            batch.set(&Key::version(key, txn.timestamp).encode()?, value);
        }
    }

    match txn.status {
        TxnStatus::Committed => {
            set_meta(batch, key, None)?;
            stats.intent_count -= 1;
        }
        TxnStatus::Aborted => {
            batch.delete(&Key::version(key, meta.timestamp).encode()?);
            set_meta(batch, key, None)?;
            stats.val_count -= 1;
            stats.intent_count -= 1;
        }
        TxnStatus::Pending => {
            let mut meta = meta;
            if meta.timestamp.forward(txn.timestamp) {
                set_meta(batch, key, Some(&meta))?;
            }
        }
    }
    Ok(true)
}

/// Resolves all intents owned by the given transaction in the span
/// [start, end), returning the number of resolved intents.
pub fn resolve_intent_range(
    batch: &mut WriteBatch,
    stats: &mut Stats,
    start: &[u8],
    end: &[u8],
    txn: &Txn,
) -> Result<u64> {
    let from = Key::Meta(start.into()).encode()?;
    let to = Key::Meta(end.into()).encode()?;
    let mut resolved = 0;
    for (k, v) in batch.scan((Included(from), Excluded(to)))? {
        let Key::Meta(user_key) = Key::decode(&k)? else {
            return Err(Error::InvalidData(format!("expected meta key, got {k:x?}")));
        };
        let meta: Txn = bincode::deserialize(&v)?;
        if meta.id == txn.id && resolve_intent(batch, stats, &user_key, txn)? {
            resolved += 1;
        }
    }
    Ok(resolved)
}

/// Fetches a transaction record by its anchor key and id.
pub fn get_txn_record(batch: &WriteBatch, key: &[u8], id: crate::types::TxnID) -> Result<Option<Txn>> {
    batch
        .get(&Key::Txn(key.into(), id).encode()?)?
        .map(|v| bincode::deserialize(&v))
        .transpose()
}

/// Writes a transaction record at its anchor key.
pub fn put_txn_record(batch: &mut WriteBatch, txn: &Txn) -> Result<()> {
    batch.set(&Key::Txn(txn.key.as_slice().into(), txn.id).encode()?, bincode::serialize(txn)?);
    Ok(())
}

/// Deletes a transaction record.
pub fn delete_txn_record(batch: &mut WriteBatch, txn: &Txn) -> Result<()> {
    batch.delete(&Key::Txn(txn.key.as_slice().into(), txn.id).encode()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::engine::share;
    use crate::storage::Memory;

    fn setup() -> WriteBatch {
        WriteBatch::new(share(Memory::new()))
    }

    fn txn(id: u64, ts: Timestamp) -> Txn {
        Txn {
            id,
            key: b"anchor".to_vec(),
            timestamp: ts,
            priority: 1,
            status: TxnStatus::Pending,
        }
    }

    #[test]
    fn get_sees_newest_version_at_or_below() -> Result<()> {
        let mut batch = setup();
        let mut stats = Stats::default();
        put(&mut batch, &mut stats, b"k", Timestamp::new(10, 0), vec![1], None)?;
        put(&mut batch, &mut stats, b"k", Timestamp::new(20, 0), vec![2], None)?;

        assert_eq!(get(&batch, b"k", Timestamp::new(5, 0), None, true)?.0, None);
        assert_eq!(get(&batch, b"k", Timestamp::new(10, 0), None, true)?.0, Some(vec![1]));
        assert_eq!(get(&batch, b"k", Timestamp::new(15, 0), None, true)?.0, Some(vec![1]));
        assert_eq!(get(&batch, b"k", Timestamp::new(25, 0), None, true)?.0, Some(vec![2]));

        // Deletes leave a tombstone, but older reads still see the value.
        delete(&mut batch, &mut stats, b"k", Timestamp::new(30, 0), None)?;
        assert_eq!(get(&batch, b"k", Timestamp::new(35, 0), None, true)?.0, None);
        assert_eq!(get(&batch, b"k", Timestamp::new(25, 0), None, true)?.0, Some(vec![2]));
        Ok(())
    }

    #[test]
    fn write_too_old() -> Result<()> {
        let mut batch = setup();
        let mut stats = Stats::default();
        put(&mut batch, &mut stats, b"k", Timestamp::new(10, 0), vec![1], None)?;

        assert_eq!(
            put(&mut batch, &mut stats, b"k", Timestamp::new(5, 0), vec![2], None),
            Err(Error::WriteTooOld {
                timestamp: Timestamp::new(5, 0),
                existing: Timestamp::new(10, 0)
            }),
        );
        // Writing at or above the existing version is fine.
        put(&mut batch, &mut stats, b"k", Timestamp::new(10, 0), vec![2], None)?;
        put(&mut batch, &mut stats, b"k", Timestamp::new(11, 0), vec![3], None)?;
        Ok(())
    }

    #[test]
    fn intents_block_consistent_reads() -> Result<()> {
        let mut batch = setup();
        let mut stats = Stats::default();
        put(&mut batch, &mut stats, b"k", Timestamp::new(5, 0), vec![1], None)?;

        let t = txn(1, Timestamp::new(10, 0));
        put(&mut batch, &mut stats, b"k", t.timestamp, vec![2], Some(&t))?;
        assert_eq!(stats.intent_count, 1);

        // The writer sees its own intent.
        assert_eq!(get(&batch, b"k", t.timestamp, Some(&t), true)?.0, Some(vec![2]));

        // A consistent foreign read at or above the intent conflicts.
        let err = get(&batch, b"k", Timestamp::new(15, 0), None, true).unwrap_err();
        match err {
            Error::WriteIntent { intents, .. } => {
                assert_eq!(intents.len(), 1);
                assert_eq!(intents[0].key, b"k".to_vec());
                assert_eq!(intents[0].txn.id, 1);
            }
            err => panic!("unexpected error {err:?}"),
        }

        // A consistent read below the intent sees the old version.
        assert_eq!(get(&batch, b"k", Timestamp::new(7, 0), None, true)?.0, Some(vec![1]));

        // An inconsistent read skips the intent and reports it.
        let (value, intents) = get(&batch, b"k", Timestamp::new(15, 0), None, false)?;
        assert_eq!(value, Some(vec![1]));
        assert_eq!(intents.len(), 1);
        Ok(())
    }

    #[test]
    fn intents_block_writers() -> Result<()> {
        let mut batch = setup();
        let mut stats = Stats::default();
        let t1 = txn(1, Timestamp::new(10, 0));
        put(&mut batch, &mut stats, b"k", t1.timestamp, vec![1], Some(&t1))?;

        // Foreign writers conflict regardless of timestamp order.
        let t2 = txn(2, Timestamp::new(20, 0));
        assert!(matches!(
            put(&mut batch, &mut stats, b"k", t2.timestamp, vec![2], Some(&t2)),
            Err(Error::WriteIntent { .. })
        ));
        assert!(matches!(
            put(&mut batch, &mut stats, b"k", Timestamp::new(5, 0), vec![2], None),
            Err(Error::WriteIntent { .. })
        ));

        // The owner can rewrite its own intent, including at a new timestamp.
        put(&mut batch, &mut stats, b"k", Timestamp::new(12, 0), vec![3], Some(&t1))?;
        assert_eq!(stats.intent_count, 1);
        assert_eq!(get(&batch, b"k", Timestamp::new(12, 0), Some(&t1), true)?.0, Some(vec![3]));
        Ok(())
    }

    #[test]
    fn resolve_commit_and_abort() -> Result<()> {
        let mut batch = setup();
        let mut stats = Stats::default();
        put(&mut batch, &mut stats, b"a", Timestamp::new(1, 0), vec![0], None)?;

        let mut t1 = txn(1, Timestamp::new(10, 0));
        put(&mut batch, &mut stats, b"a", t1.timestamp, vec![1], Some(&t1))?;
        put(&mut batch, &mut stats, b"b", t1.timestamp, vec![1], Some(&t1))?;

        // Commit a, abort b.
        t1.status = TxnStatus::Committed;
        assert!(resolve_intent(&mut batch, &mut stats, b"a", &t1)?);
        t1.status = TxnStatus::Aborted;
        assert!(resolve_intent(&mut batch, &mut stats, b"b", &t1)?);
        assert_eq!(stats.intent_count, 0);

        assert_eq!(get(&batch, b"a", Timestamp::new(20, 0), None, true)?.0, Some(vec![1]));
        assert_eq!(get(&batch, b"b", Timestamp::new(20, 0), None, true)?.0, None);

        // Resolving again is a no-op.
        assert!(!resolve_intent(&mut batch, &mut stats, b"a", &t1)?);
        Ok(())
    }

    #[test]
    fn resolve_commit_at_pushed_timestamp() -> Result<()> {
        let mut batch = setup();
        let mut stats = Stats::default();
        let mut t1 = txn(1, Timestamp::new(10, 0));
        put(&mut batch, &mut stats, b"k", t1.timestamp, vec![1], Some(&t1))?;

        // The transaction was pushed to ts 30 before committing.
        t1.timestamp = Timestamp::new(30, 0);
        t1.status = TxnStatus::Committed;
        assert!(resolve_intent(&mut batch, &mut stats, b"k", &t1)?);

        assert_eq!(get(&batch, b"k", Timestamp::new(20, 0), None, true)?.0, None);
        assert_eq!(get(&batch, b"k", Timestamp::new(30, 0), None, true)?.0, Some(vec![1]));
        Ok(())
    }

    #[test]
    fn resolve_range() -> Result<()> {
        let mut batch = setup();
        let mut stats = Stats::default();
        let mut t1 = txn(1, Timestamp::new(10, 0));
        let t2 = txn(2, Timestamp::new(10, 0));
        put(&mut batch, &mut stats, b"a", t1.timestamp, vec![1], Some(&t1))?;
        put(&mut batch, &mut stats, b"b", t2.timestamp, vec![2], Some(&t2))?;
        put(&mut batch, &mut stats, b"c", t1.timestamp, vec![3], Some(&t1))?;

        t1.status = TxnStatus::Committed;
        assert_eq!(resolve_intent_range(&mut batch, &mut stats, b"a", b"z", &t1)?, 2);
        assert_eq!(stats.intent_count, 1); // t2's intent remains

        assert_eq!(get(&batch, b"a", Timestamp::new(20, 0), None, true)?.0, Some(vec![1]));
        assert!(get(&batch, b"b", Timestamp::new(20, 0), None, true).is_err());
        Ok(())
    }

    #[test]
    fn scan_latest_visible() -> Result<()> {
        let mut batch = setup();
        let mut stats = Stats::default();
        put(&mut batch, &mut stats, b"a", Timestamp::new(1, 0), vec![1], None)?;
        put(&mut batch, &mut stats, b"a", Timestamp::new(5, 0), vec![5], None)?;
        put(&mut batch, &mut stats, b"b", Timestamp::new(3, 0), vec![3], None)?;
        delete(&mut batch, &mut stats, b"b", Timestamp::new(4, 0), None)?;
        put(&mut batch, &mut stats, b"c", Timestamp::new(9, 0), vec![9], None)?;

        let (result, intents) = scan(&batch, b"a", b"z", Timestamp::new(6, 0), None, true)?;
        assert_eq!(result, vec![(b"a".to_vec(), vec![5])]);
        assert!(intents.is_empty());

        let (result, _) = scan(&batch, b"a", b"z", Timestamp::new(3, 0), None, true)?;
        assert_eq!(result, vec![(b"a".to_vec(), vec![1]), (b"b".to_vec(), vec![3])]);
        Ok(())
    }

    #[test]
    fn scan_collects_all_conflicting_intents() -> Result<()> {
        let mut batch = setup();
        let mut stats = Stats::default();
        let t1 = txn(1, Timestamp::new(5, 0));
        let t2 = txn(2, Timestamp::new(6, 0));
        put(&mut batch, &mut stats, b"a", t1.timestamp, vec![1], Some(&t1))?;
        put(&mut batch, &mut stats, b"b", Timestamp::new(1, 0), vec![2], None)?;
        put(&mut batch, &mut stats, b"c", t2.timestamp, vec![3], Some(&t2))?;

        let err = scan(&batch, b"a", b"z", Timestamp::new(10, 0), None, true).unwrap_err();
        match err {
            Error::WriteIntent { intents, .. } => {
                assert_eq!(
                    intents.iter().map(|i| i.txn.id).collect::<Vec<_>>(),
                    vec![1, 2]
                );
            }
            err => panic!("unexpected error {err:?}"),
        }

        // The inconsistent scan returns committed data and the intents.
        let (result, intents) = scan(&batch, b"a", b"z", Timestamp::new(10, 0), None, false)?;
        assert_eq!(result, vec![(b"b".to_vec(), vec![2])]);
        assert_eq!(intents.len(), 2);
        Ok(())
    }

    #[test]
    fn increment_and_conditional_put() -> Result<()> {
        let mut batch = setup();
        let mut stats = Stats::default();
        assert_eq!(increment(&mut batch, &mut stats, b"n", Timestamp::new(1, 0), 2, None)?, 2);
        assert_eq!(increment(&mut batch, &mut stats, b"n", Timestamp::new(2, 0), 3, None)?, 5);

        conditional_put(&mut batch, &mut stats, b"k", Timestamp::new(1, 0), vec![1], None, None)?;
        assert!(conditional_put(
            &mut batch,
            &mut stats,
            b"k",
            Timestamp::new(2, 0),
            vec![2],
            None,
            None
        )
        .is_err());
        conditional_put(
            &mut batch,
            &mut stats,
            b"k",
            Timestamp::new(2, 0),
            vec![2],
            Some(vec![1]),
            None,
        )?;
        Ok(())
    }

    #[test]
    fn delete_range_deletes_live_keys() -> Result<()> {
        let mut batch = setup();
        let mut stats = Stats::default();
        put(&mut batch, &mut stats, b"a", Timestamp::new(1, 0), vec![1], None)?;
        put(&mut batch, &mut stats, b"b", Timestamp::new(1, 0), vec![2], None)?;
        delete(&mut batch, &mut stats, b"b", Timestamp::new(2, 0), None)?;
        put(&mut batch, &mut stats, b"c", Timestamp::new(1, 0), vec![3], None)?;

        assert_eq!(
            delete_range(&mut batch, &mut stats, b"a", b"z", Timestamp::new(5, 0), None)?,
            2
        );
        let (result, _) = scan(&batch, b"a", b"z", Timestamp::new(6, 0), None, true)?;
        assert!(result.is_empty());
        Ok(())
    }

    #[test]
    fn txn_records() -> Result<()> {
        let mut batch = setup();
        let mut t = txn(1, Timestamp::new(1, 0));
        t.key = b"anchor".to_vec();

        assert_eq!(get_txn_record(&batch, b"anchor", 1)?, None);
        put_txn_record(&mut batch, &t)?;
        assert_eq!(get_txn_record(&batch, b"anchor", 1)?, Some(t.clone()));

        delete_txn_record(&mut batch, &t)?;
        assert_eq!(get_txn_record(&batch, b"anchor", 1)?, None);
        Ok(())
    }
}
