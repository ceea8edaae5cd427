//! Core data types for ranges and their replicas: identifiers, descriptors,
//! leader leases, transactions, and intents.

use crate::hlc::Timestamp;

use serde::{Deserialize, Serialize};

/// A range identifier, unique within the cluster.
pub type RangeID = u64;

/// A node identifier.
pub type NodeID = u32;

/// A store identifier, unique within the cluster.
pub type StoreID = u32;

/// Identifies a Raft participant: a (node, store) pair packed into a single
/// id, since each store runs at most one replica of a range.
pub type RaftNodeID = u64;

/// A transaction identifier.
pub type TxnID = u64;

/// Packs a node and store id into a Raft node id.
pub fn make_raft_node_id(node_id: NodeID, store_id: StoreID) -> RaftNodeID {
    (node_id as u64) << 32 | store_id as u64
}

/// Unpacks a Raft node id into its node and store ids.
pub fn decode_raft_node_id(raft_node_id: RaftNodeID) -> (NodeID, StoreID) {
    ((raft_node_id >> 32) as NodeID, raft_node_id as u32 as StoreID)
}

/// Formats a binary key for human consumption, escaping non-printable bytes.
pub fn fmt_key(key: &[u8]) -> String {
    key.iter().flat_map(|b| b.escape_ascii()).map(char::from).collect()
}

/// A half-open key span [start, end). An empty end denotes the single key at
/// start.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Span {
    #[serde(with = "serde_bytes")]
    pub start: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub end: Vec<u8>,
}

impl Span {
    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Span { start: start.into(), end: end.into() }
    }

    /// A span covering only the given key.
    pub fn point(key: impl Into<Vec<u8>>) -> Self {
        Span { start: key.into(), end: Vec::new() }
    }

    /// Returns the exclusive end of the span. For point spans this is the
    /// key immediately following start in lexicographic order.
    pub fn end_exclusive(&self) -> Vec<u8> {
        if !self.end.is_empty() {
            return self.end.clone();
        }
        let mut end = self.start.clone();
        end.push(0x00);
        end
    }

    /// Returns true if the half-open spans overlap. Adjacent spans do not.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end_exclusive() && other.start < self.end_exclusive()
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.end.is_empty() {
            write!(f, "[{}]", fmt_key(&self.start))
        } else {
            write!(f, "[{}-{})", fmt_key(&self.start), fmt_key(&self.end))
        }
    }
}

/// A replica of a range, located on a store.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReplicaDescriptor {
    pub node_id: NodeID,
    pub store_id: StoreID,
}

/// Describes a range of the global key space: its id, bounds, and replica
/// set. Descriptors are immutable; splits, merges and reconfigurations
/// replace the whole descriptor atomically. An empty end key denotes an
/// uninitialized range still awaiting its initial snapshot.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RangeDescriptor {
    pub range_id: RangeID,
    #[serde(with = "serde_bytes")]
    pub start_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub end_key: Vec<u8>,
    pub replicas: Vec<ReplicaDescriptor>,
}

impl crate::encoding::Value for RangeDescriptor {}

impl RangeDescriptor {
    /// Returns true if the range contains the given key.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        key >= self.start_key.as_slice() && key < self.end_key.as_slice()
    }

    /// Returns true if the range contains the key span [start, end). An empty
    /// end is treated as the point span of start.
    pub fn contains_key_range(&self, start: &[u8], end: &[u8]) -> bool {
        if end.is_empty() {
            return self.contains_key(start);
        }
        if start > end {
            return false;
        }
        start >= self.start_key.as_slice() && end <= self.end_key.as_slice()
    }

    /// Returns the span covered by the range.
    pub fn span(&self) -> Span {
        Span::new(self.start_key.clone(), self.end_key.clone())
    }

    /// Looks up the replica located on the given store, if any.
    pub fn find_replica(&self, store_id: StoreID) -> Option<ReplicaDescriptor> {
        self.replicas.iter().find(|r| r.store_id == store_id).copied()
    }
}

/// A leader lease: a grant of exclusive write authority and local-read
/// authority over the interval [start, expiration) to a single Raft node.
/// The zero lease covers nothing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub start: Timestamp,
    pub expiration: Timestamp,
    pub raft_node_id: RaftNodeID,
}

impl crate::encoding::Value for Lease {}

impl Lease {
    /// Returns true if the lease interval contains the given timestamp. The
    /// holder of the current lease assumes responsibility for all past
    /// timestamps as well, so only the expiration bounds the interval.
    pub fn covers(&self, timestamp: Timestamp) -> bool {
        timestamp < self.expiration
    }

    /// Returns true if the lease belongs to the given Raft node.
    pub fn owned_by(&self, raft_node_id: RaftNodeID) -> bool {
        self.raft_node_id == raft_node_id && raft_node_id != 0
    }
}

impl std::fmt::Display for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "[{}-{})@{}", self.start, self.expiration, self.raft_node_id)
    }
}

/// A command identifier, uniquely naming a proposal for idempotency. Supplied
/// by the caller or synthesized from the clock's physical time and a random
/// number. The zero value means "absent".
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct CmdID {
    pub wall_time: i64,
    pub random: i64,
}

impl CmdID {
    pub fn is_empty(&self) -> bool {
        self.wall_time == 0 && self.random == 0
    }
}

impl std::fmt::Display for CmdID {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}.{}", self.wall_time, self.random)
    }
}

/// The status of a transaction record.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum TxnStatus {
    #[default]
    Pending,
    Committed,
    Aborted,
}

/// A transaction, as carried in request headers and persisted as a
/// transaction record at its anchor key.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Txn {
    pub id: TxnID,
    /// The anchor key determines which range owns the transaction record.
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    pub timestamp: Timestamp,
    pub priority: u32,
    pub status: TxnStatus,
}

/// A provisional, transaction-scoped MVCC value awaiting commit or abort. An
/// empty end key denotes a point intent.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub end_key: Vec<u8>,
    pub txn: Txn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raft_node_id_roundtrip() {
        let id = make_raft_node_id(3, 7);
        assert_eq!(decode_raft_node_id(id), (3, 7));
        assert_eq!(decode_raft_node_id(make_raft_node_id(0, 1)), (0, 1));
    }

    #[test]
    fn descriptor_contains() {
        let desc = RangeDescriptor {
            range_id: 1,
            start_key: b"b".to_vec(),
            end_key: b"m".to_vec(),
            replicas: vec![ReplicaDescriptor { node_id: 1, store_id: 1 }],
        };
        assert!(desc.contains_key(b"b"));
        assert!(desc.contains_key(b"c"));
        assert!(!desc.contains_key(b"m"));
        assert!(!desc.contains_key(b"a"));

        assert!(desc.contains_key_range(b"b", b"m"));
        assert!(desc.contains_key_range(b"c", b""));
        assert!(!desc.contains_key_range(b"c", b"z"));
        assert!(!desc.contains_key_range(b"a", b"c"));
    }

    #[test]
    fn lease_covers_and_ownership() {
        let lease = Lease {
            start: Timestamp::new(10, 0),
            expiration: Timestamp::new(1000, 0),
            raft_node_id: make_raft_node_id(1, 1),
        };
        assert!(lease.covers(Timestamp::new(500, 0)));
        assert!(lease.covers(Timestamp::new(5, 0)));
        assert!(!lease.covers(Timestamp::new(1000, 0)));
        assert!(lease.owned_by(make_raft_node_id(1, 1)));
        assert!(!lease.owned_by(make_raft_node_id(2, 1)));

        // The zero lease covers nothing and belongs to nobody.
        let zero = Lease::default();
        assert!(!zero.covers(Timestamp::ZERO));
        assert!(!zero.owned_by(0));
    }

    #[test]
    fn span_overlap() {
        let ab = Span::new(b"a".to_vec(), b"c".to_vec());
        assert!(ab.overlaps(&Span::new(b"b".to_vec(), b"d".to_vec())));
        assert!(ab.overlaps(&Span::point(b"b".to_vec())));
        assert!(!ab.overlaps(&Span::new(b"d".to_vec(), b"e".to_vec())));
        // The end bound is exclusive: a point at the end does not overlap,
        // and neither do adjacent spans.
        assert!(!ab.overlaps(&Span::point(b"c".to_vec())));
        assert!(!ab.overlaps(&Span::new(b"c".to_vec(), b"d".to_vec())));
        assert!(Span::point(b"b".to_vec()).overlaps(&Span::point(b"b".to_vec())));
    }
}
