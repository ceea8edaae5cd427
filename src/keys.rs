//! The engine key schema, using the KeyCode encoding which preserves the
//! ordering and grouping of keys.
//!
//! The keyspace has two parts. Range-local administrative keys (applied index,
//! leader lease, GC metadata, response cache entries and so on) are grouped by
//! range ID and sort before all user data, and are read and written as plain
//! unversioned values. User data lives in the MVCC keyspace: a Meta record per
//! key holding an unresolved intent (if any), transaction records anchored at
//! their transaction's key, and versioned values ordered by timestamp.
//!
//! Well-known prefixes carve up the user keyspace: keys below SYSTEM_MAX are
//! reserved for cluster configuration, including the zone configuration
//! prefix and the system configuration span.

use crate::encoding;
use crate::hlc::Timestamp;
use crate::types::{RangeID, TxnID};

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// The minimum key.
pub const KEY_MIN: &[u8] = b"";
/// The maximum key.
pub const KEY_MAX: &[u8] = &[0xff, 0xff];
/// The end of the system-reserved keyspace. Writes below this boundary may
/// affect gossiped configuration.
pub const SYSTEM_MAX: &[u8] = &[0x01];
/// The prefix for zone configuration entries.
pub const CONFIG_ZONE_PREFIX: &[u8] = b"\x00zone";
/// The prefix for the system configuration span, gossiped as a whole.
pub const SYSTEM_CONFIG_PREFIX: &[u8] = b"\x00sys";

/// Engine keys. Cow byte slices allow encoding borrowed values and decoding
/// into owned values.
#[derive(Debug, Deserialize, Serialize)]
pub enum Key<'a> {
    /// The range's applied consensus log index.
    AppliedIndex(RangeID),
    /// The range's last persisted (not necessarily applied) log index.
    LastIndex(RangeID),
    /// The range's leader lease record.
    LeaderLease(RangeID),
    /// The range's garbage collection metadata.
    GCMetadata(RangeID),
    /// The timestamp at which the range's data was last verified.
    LastVerification(RangeID),
    /// The range's MVCC statistics.
    RangeStats(RangeID),
    /// A response cache entry, by command ID (wall time, random).
    Response(RangeID, i64, i64),
    /// MVCC metadata for a user key, holding its unresolved intent.
    Meta(
        #[serde(with = "serde_bytes")]
        #[serde(borrow)]
        Cow<'a, [u8]>,
    ),
    /// A transaction record, anchored at the transaction's key.
    Txn(
        #[serde(with = "serde_bytes")]
        #[serde(borrow)]
        Cow<'a, [u8]>,
        TxnID,
    ),
    /// A versioned key/value pair, by timestamp (wall time, logical).
    Version(
        #[serde(with = "serde_bytes")]
        #[serde(borrow)]
        Cow<'a, [u8]>,
        i64,
        u64,
    ),
}

impl<'a> encoding::Key<'a> for Key<'a> {}

impl<'a> Key<'a> {
    /// A versioned key at the given timestamp.
    pub fn version(key: &'a [u8], ts: Timestamp) -> Self {
        Key::Version(key.into(), ts.wall_time, ts.logical as u64)
    }
}

/// Engine key prefixes, for prefix scans. These must match the keys above,
/// including the enum variant index.
#[derive(Debug, Deserialize, Serialize)]
pub enum KeyPrefix<'a> {
    AppliedIndex,
    LastIndex,
    LeaderLease,
    GCMetadata,
    LastVerification,
    RangeStats,
    /// All response cache entries for a range.
    Response(RangeID),
    Meta,
    Txn,
    /// All versions of a user key.
    Version(
        #[serde(with = "serde_bytes")]
        #[serde(borrow)]
        Cow<'a, [u8]>,
    ),
}

impl<'a> encoding::Key<'a> for KeyPrefix<'a> {}

/// Returns the first key lexicographically after all keys with the given
/// prefix, or KEY_MAX if there is none.
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    match prefix.iter().rposition(|b| *b != 0xff) {
        Some(i) => prefix.iter().take(i).copied().chain(std::iter::once(prefix[i] + 1)).collect(),
        None => KEY_MAX.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Key as _;
    use crate::error::Result;

    #[test]
    fn prefix_ends() {
        assert_eq!(prefix_end(b"abc"), b"abd".to_vec());
        assert_eq!(prefix_end(b"ab\xff"), b"ac".to_vec());
        assert_eq!(prefix_end(b"\xff\xff"), KEY_MAX.to_vec());
        assert_eq!(prefix_end(b""), KEY_MAX.to_vec());
        assert_eq!(prefix_end(CONFIG_ZONE_PREFIX), b"\x00zonf".to_vec());
    }

    /// Encoded keys must preserve the logical grouping and ordering: local
    /// keys group by range before all MVCC keys, and versions order by
    /// timestamp within a key.
    #[test]
    fn key_ordering() -> Result<()> {
        let keys = [
            Key::AppliedIndex(1),
            Key::AppliedIndex(2),
            Key::LeaderLease(1),
            Key::Response(1, 10, 42),
            Key::Response(1, 11, 7),
            Key::Response(2, 1, 1),
            Key::Meta(b"a".as_slice().into()),
            Key::Meta(b"b".as_slice().into()),
            Key::Txn(b"a".as_slice().into(), 1),
            Key::version(b"a", Timestamp::new(1, 0)),
            Key::version(b"a", Timestamp::new(1, 1)),
            Key::version(b"a", Timestamp::new(2, 0)),
            Key::version(b"b", Timestamp::new(1, 0)),
        ];
        let encoded: Vec<Vec<u8>> = keys.iter().map(|k| k.encode()).collect::<Result<_>>()?;
        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(encoded, sorted);
        Ok(())
    }

    /// Prefixes must be binary prefixes of the corresponding keys.
    #[test]
    fn key_prefixes() -> Result<()> {
        let pairs = [
            (KeyPrefix::Response(1).encode()?, Key::Response(1, 5, 5).encode()?),
            (KeyPrefix::Meta.encode()?, Key::Meta(b"foo".as_slice().into()).encode()?),
            (
                KeyPrefix::Version(b"foo".as_slice().into()).encode()?,
                Key::version(b"foo", Timestamp::new(7, 0)).encode()?,
            ),
        ];
        for (prefix, key) in pairs {
            assert!(key.starts_with(&prefix), "{key:x?} does not start with {prefix:x?}");
        }
        Ok(())
    }

    #[test]
    fn key_roundtrip() -> Result<()> {
        let encoded = Key::version(b"k", Timestamp::new(100, 3)).encode()?;
        match Key::decode(&encoded)? {
            Key::Version(key, wall, logical) => {
                assert_eq!(key.as_ref(), b"k");
                assert_eq!((wall, logical), (100, 3));
            }
            key => panic!("unexpected key {key:?}"),
        }
        Ok(())
    }
}
