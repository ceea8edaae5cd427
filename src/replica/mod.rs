//! A replica is one per-node participant in a range's consensus group: a
//! contiguous keyspace with writes managed through a replicated log. The
//! replica turns the ordered log of committed commands into a consistent,
//! serializable view of the range's keys, enforcing single-leader writes via
//! leader leases, transaction semantics via intents and the timestamp cache,
//! and idempotent retries via the response cache.
//!
//! Commands enter through [`Replica::add_command`]. Reads gate through the
//! command queue, verify the lease, and execute against an engine snapshot.
//! Writes additionally reconcile their timestamps against the timestamp
//! cache and are proposed to the consensus transport; once the transport
//! delivers the committed entry, [`Replica::process_raft_command`] re-enters
//! the replica, executes the batch against a fresh storage batch, records
//! the outcome in the response cache, and commits everything atomically
//! before signalling the waiting caller.

mod cmdqueue;
mod config;
mod exec;
mod respcache;
mod tscache;

pub use cmdqueue::CommandQueue;
pub use config::{
    default_descriptors, ConfigDescriptor, ConfigMap, PrefixConfig, SystemConfig, ZoneConfig,
};
pub use respcache::{CachedResponse, ResponseCache};
pub use tscache::TimestampCache;

use crate::encoding::Key as _;
use crate::encoding::Value as _;
use crate::error::{Error, Result};
use crate::hlc::Timestamp;
use crate::keys::{self, Key};
use crate::rangemgr::RangeManager;
use crate::request::{
    BatchRequest, BatchResponse, LeaderLeaseRequest, PushTxnType, ReadConsistency, Request,
    RequestHeader, Response, ResponseHeader,
};
use crate::storage::mvcc::Stats;
use crate::storage::WriteBatch;
use crate::types::{
    decode_raft_node_id, CmdID, Intent, Lease, RaftNodeID, RangeDescriptor, Span,
};
use crate::wire::{RaftCommand, RaftSnapshotData, RAFT_INITIAL_LOG_INDEX};

use arc_swap::ArcSwap;
use crossbeam::channel::{Receiver, Sender};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Bound::{Excluded, Included};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

/// A consensus log index.
pub type Index = u64;

impl crate::encoding::Value for Index {}

/// The default duration of a leader lease, in nanoseconds.
pub const DEFAULT_LEADER_LEASE_DURATION_NANOS: i64 = 1_000_000_000;

/// How often transaction coordinators are expected to heartbeat live
/// transactions, in nanoseconds. A transaction without activity within twice
/// this interval may be considered abandoned and pushed by conflicting
/// transactions.
pub const DEFAULT_HEARTBEAT_INTERVAL_NANOS: i64 = 5_000_000_000;

/// Garbage collection bookkeeping for a range, stored at a range-local key.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct GCMetadata {
    /// Wall time of the last completed GC scan.
    pub last_scan_nanos: i64,
    /// Wall time of the oldest unresolved intent seen, if any.
    pub oldest_intent_nanos: Option<i64>,
}

impl crate::encoding::Value for GCMetadata {}

/// Configuration injected at replica construction. There is deliberately no
/// process-global state: tests inject command filters and GC behavior here.
#[derive(Clone)]
pub struct ReplicaOptions {
    /// Intercepts commands before execution, e.g. to inject errors in tests.
    pub command_filter: Option<Arc<dyn Fn(&Request) -> Result<()> + Send + Sync>>,
    /// Whether transaction records are deleted immediately on EndTransaction
    /// when all intents were local and resolved synchronously.
    pub auto_gc_transactions: bool,
    /// The configuration maps this replica may gossip.
    pub config_descriptors: Vec<ConfigDescriptor>,
}

impl Default for ReplicaOptions {
    fn default() -> Self {
        ReplicaOptions {
            command_filter: None,
            auto_gc_transactions: true,
            config_descriptors: config::default_descriptors(),
        }
    }
}

/// A command proposed to the log and awaiting its applied result. The done
/// channel is buffered so apply never blocks on an abandoned caller.
struct PendingCmd {
    done: Sender<CachedResponse>,
}

/// State guarded by the replica's reader-writer lock. The write lock is held
/// only while inserting or removing queue entries and updating caches, never
/// across I/O.
struct Inner {
    cmd_queue: CommandQueue,
    ts_cache: TimestampCache,
    pending_cmds: HashMap<CmdID, PendingCmd>,
    /// Content hashes of config maps at last gossip, to suppress redundant
    /// gossip.
    config_hashes: HashMap<&'static str, Vec<u8>>,
    system_config_hash: Vec<u8>,
}

/// Signals a single-shot completion when explicitly triggered or dropped,
/// so early returns still release waiters.
struct Signal(Option<Sender<()>>);

impl Signal {
    fn signal(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for Signal {
    fn drop(&mut self) {
        self.signal();
    }
}

/// A per-node replica of a range. Many ranges may exist in a store and they
/// are unlikely to be contiguous; ranges are independent units responsible
/// for maintaining their own integrity.
pub struct Replica {
    weak: Weak<Replica>,
    pub(crate) rm: Arc<dyn RangeManager>,
    pub(crate) opts: ReplicaOptions,
    /// The current range descriptor, replaced atomically as a whole.
    desc: ArcSwap<RangeDescriptor>,
    /// The current leader lease, replaced atomically as a whole.
    lease: ArcSwap<Lease>,
    /// Last log index applied to the state machine. Never decreases.
    applied_index: AtomicU64,
    /// Last log index persisted (not necessarily applied).
    last_index: AtomicU64,
    /// Max bytes before split, cached from the zone config. Zero disables.
    max_bytes: AtomicI64,
    /// Set when the replica trips an integrity invariant; all subsequent
    /// admissions are refused with this error.
    corrupt: Mutex<Option<Error>>,
    resp_cache: ResponseCache,
    /// Cached copy of the persisted range MVCC statistics.
    stats: Mutex<Stats>,
    /// Serializes lease acquisition so at most one lease proposal is in
    /// flight per replica.
    lease_mu: Mutex<()>,
    inner: RwLock<Inner>,
}

impl std::fmt::Display for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let desc = self.desc();
        write!(f, "range={} {}", desc.range_id, desc.span())
    }
}

impl Replica {
    /// Creates a replica from a range descriptor, loading any persisted
    /// indices, lease, and statistics from the engine.
    pub fn new(
        desc: RangeDescriptor,
        rm: Arc<dyn RangeManager>,
        opts: ReplicaOptions,
    ) -> Result<Arc<Replica>> {
        let range_id = desc.range_id;
        let batch = WriteBatch::new(rm.engine());
        let applied_index = batch
            .get(&Key::AppliedIndex(range_id).encode()?)?
            .map(|v| Index::decode(&v))
            .transpose()?
            .unwrap_or(0);
        let last_index = batch
            .get(&Key::LastIndex(range_id).encode()?)?
            .map(|v| Index::decode(&v))
            .transpose()?
            .unwrap_or(applied_index);
        let lease = batch
            .get(&Key::LeaderLease(range_id).encode()?)?
            .map(|v| Lease::decode(&v))
            .transpose()?
            .unwrap_or_default();
        let stats = batch
            .get(&Key::RangeStats(range_id).encode()?)?
            .map(|v| Stats::decode(&v))
            .transpose()?
            .unwrap_or_default();
        drop(batch);

        let low_water = rm.clock().now()?;
        let replica = Arc::new_cyclic(|weak| Replica {
            weak: weak.clone(),
            rm,
            opts,
            desc: ArcSwap::from_pointee(desc),
            lease: ArcSwap::from_pointee(lease),
            applied_index: AtomicU64::new(applied_index),
            last_index: AtomicU64::new(last_index),
            max_bytes: AtomicI64::new(0),
            corrupt: Mutex::new(None),
            resp_cache: ResponseCache::new(range_id),
            stats: Mutex::new(stats),
            lease_mu: Mutex::new(()),
            inner: RwLock::new(Inner {
                cmd_queue: CommandQueue::new(),
                ts_cache: TimestampCache::new(low_water),
                pending_cmds: HashMap::new(),
                config_hashes: HashMap::new(),
                system_config_hash: Vec::new(),
            }),
        });

        // Gossip configs eagerly: they might not be gossiped again until
        // they are updated or a leader lease is acquired.
        replica.maybe_gossip_configs(|prefix| replica.contains_key(prefix))?;
        if replica.contains_key(keys::SYSTEM_CONFIG_PREFIX) {
            replica.maybe_gossip_system_config()?;
        }

        Ok(replica)
    }

    /// Returns the current range descriptor.
    pub fn desc(&self) -> Arc<RangeDescriptor> {
        self.desc.load_full()
    }

    /// Returns the range ID.
    pub fn range_id(&self) -> crate::types::RangeID {
        self.desc().range_id
    }

    /// Replaces the range descriptor and notifies the range manager so it
    /// can update its lookup structures.
    pub fn set_desc(&self, desc: RangeDescriptor) -> Result<()> {
        self.set_desc_without_process_update(desc);
        self.rm.process_range_descriptor_update(self)
    }

    /// Replaces the range descriptor without notifying the range manager.
    pub fn set_desc_without_process_update(&self, desc: RangeDescriptor) {
        self.desc.store(Arc::new(desc));
    }

    /// True once the replica knows its range bounds, either because it
    /// created the range or received its initial snapshot.
    pub fn is_initialized(&self) -> bool {
        !self.desc().end_key.is_empty()
    }

    /// True if this replica belongs to the first range of the keyspace.
    pub fn is_first_range(&self) -> bool {
        self.desc().start_key == keys::KEY_MIN
    }

    /// Returns whether the range contains the given key.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.desc().contains_key(key)
    }

    /// Returns whether the range contains the span [start, end).
    pub fn contains_key_range(&self, start: &[u8], end: &[u8]) -> bool {
        self.desc().contains_key_range(start, end)
    }

    /// Returns the current leader lease.
    pub fn lease(&self) -> Lease {
        **self.lease.load()
    }

    /// Returns the highest applied log index.
    pub fn applied_index(&self) -> Index {
        self.applied_index.load(Ordering::SeqCst)
    }

    /// Returns the last persisted log index.
    pub fn last_index(&self) -> Index {
        self.last_index.load(Ordering::SeqCst)
    }

    /// Persists and caches the last log index.
    pub fn set_last_index(&self, index: Index) -> Result<()> {
        let mut batch = WriteBatch::new(self.rm.engine());
        batch.set(&Key::LastIndex(self.range_id()).encode()?, index.encode()?);
        batch.commit()?;
        self.last_index.store(index, Ordering::SeqCst);
        Ok(())
    }

    /// Returns the range maximum byte limit before splitting.
    pub fn get_max_bytes(&self) -> i64 {
        self.max_bytes.load(Ordering::SeqCst)
    }

    /// Sets the maximum byte limit before splitting. This value is cached by
    /// the range for efficiency.
    pub fn set_max_bytes(&self, max_bytes: i64) {
        self.max_bytes.store(max_bytes, Ordering::SeqCst);
    }

    /// Returns a copy of the range's MVCC statistics.
    pub fn stats(&self) -> Result<Stats> {
        Ok(*self.stats.lock()?)
    }

    /// Reads the range's GC metadata.
    pub fn gc_metadata(&self) -> Result<GCMetadata> {
        let batch = WriteBatch::new(self.rm.engine());
        batch
            .get(&Key::GCMetadata(self.range_id()).encode()?)?
            .map(|v| GCMetadata::decode(&v))
            .transpose()
            .map(|meta| meta.unwrap_or_default())
    }

    /// Writes the range's GC metadata.
    pub fn set_gc_metadata(&self, meta: &GCMetadata) -> Result<()> {
        let mut batch = WriteBatch::new(self.rm.engine());
        batch.set(&Key::GCMetadata(self.range_id()).encode()?, meta.encode()?);
        batch.commit()
    }

    /// Reads the timestamp at which the range's data was last verified.
    pub fn last_verification_timestamp(&self) -> Result<Timestamp> {
        let batch = WriteBatch::new(self.rm.engine());
        batch
            .get(&Key::LastVerification(self.range_id()).encode()?)?
            .map(|v| Timestamp::decode(&v))
            .transpose()
            .map(|ts| ts.unwrap_or(Timestamp::ZERO))
    }

    /// Writes the timestamp at which the range's data was last verified.
    pub fn set_last_verification_timestamp(&self, timestamp: Timestamp) -> Result<()> {
        let mut batch = WriteBatch::new(self.rm.engine());
        batch.set(&Key::LastVerification(self.range_id()).encode()?, timestamp.encode()?);
        batch.commit()
    }

    /// Destroys the replica, clearing all data associated with the range
    /// (administrative and user alike) in a single atomic batch.
    pub fn destroy(&self) -> Result<()> {
        let mut batch = WriteBatch::new(self.rm.engine());
        self.clear_range_data(&mut batch)?;
        batch.commit()
    }

    /// Buffers deletions of every key belonging to the range.
    fn clear_range_data(&self, batch: &mut WriteBatch) -> Result<()> {
        let desc = self.desc();
        let range_id = desc.range_id;
        for key in [
            Key::AppliedIndex(range_id).encode()?,
            Key::LastIndex(range_id).encode()?,
            Key::LeaderLease(range_id).encode()?,
            Key::GCMetadata(range_id).encode()?,
            Key::LastVerification(range_id).encode()?,
            Key::RangeStats(range_id).encode()?,
        ] {
            batch.delete(&key);
        }
        self.resp_cache.clear_data(batch)?;

        if desc.end_key.is_empty() {
            return Ok(());
        }
        let spans = [
            (
                Key::Meta(desc.start_key.as_slice().into()).encode()?,
                Key::Meta(desc.end_key.as_slice().into()).encode()?,
            ),
            (
                Key::Txn(desc.start_key.as_slice().into(), 0).encode()?,
                Key::Txn(desc.end_key.as_slice().into(), 0).encode()?,
            ),
            (
                Key::version(&desc.start_key, Timestamp::ZERO).encode()?,
                Key::version(&desc.end_key, Timestamp::ZERO).encode()?,
            ),
        ];
        for (from, to) in spans {
            for (key, _) in batch.scan((Included(from), Excluded(to)))? {
                batch.delete(&key);
            }
        }
        Ok(())
    }

    /// Synthesizes a snapshot of the range's full contents, returning the
    /// snapshot data and the log index it represents. Bootstrapped ranges
    /// that have not applied anything yet report the initial log index, as
    /// if a log prefix had already been truncated.
    pub fn snapshot(&self) -> Result<(RaftSnapshotData, Index)> {
        let desc = self.desc();
        let range_id = desc.range_id;
        let batch = WriteBatch::new(self.rm.engine());

        let mut kv = Vec::new();
        for key in [
            Key::AppliedIndex(range_id).encode()?,
            Key::LastIndex(range_id).encode()?,
            Key::LeaderLease(range_id).encode()?,
            Key::GCMetadata(range_id).encode()?,
            Key::LastVerification(range_id).encode()?,
            Key::RangeStats(range_id).encode()?,
        ] {
            if let Some(value) = batch.get(&key)? {
                kv.push((key, value));
            }
        }
        kv.extend(batch.scan_prefix(
            &crate::keys::KeyPrefix::Response(range_id).encode()?,
        )?);
        if !desc.end_key.is_empty() {
            let spans = [
                (
                    Key::Meta(desc.start_key.as_slice().into()).encode()?,
                    Key::Meta(desc.end_key.as_slice().into()).encode()?,
                ),
                (
                    Key::Txn(desc.start_key.as_slice().into(), 0).encode()?,
                    Key::Txn(desc.end_key.as_slice().into(), 0).encode()?,
                ),
                (
                    Key::version(&desc.start_key, Timestamp::ZERO).encode()?,
                    Key::version(&desc.end_key, Timestamp::ZERO).encode()?,
                ),
            ];
            for (from, to) in spans {
                kv.extend(batch.scan((Included(from), Excluded(to)))?);
            }
        }

        let index = self.applied_index().max(RAFT_INITIAL_LOG_INDEX);
        Ok((RaftSnapshotData::new(&desc, kv)?, index))
    }

    /// Applies a snapshot, replacing the range's contents wholesale and
    /// advancing the applied and last indices to the snapshot's index.
    pub fn apply_snapshot(&self, data: RaftSnapshotData, index: Index) -> Result<()> {
        let desc = data.descriptor()?;
        let mut batch = WriteBatch::new(self.rm.engine());
        self.clear_range_data(&mut batch)?;
        for kv in &data.kv {
            batch.set(&kv.key, kv.value.clone());
        }
        batch.set(&Key::AppliedIndex(desc.range_id).encode()?, index.encode()?);
        batch.set(&Key::LastIndex(desc.range_id).encode()?, index.encode()?);
        batch.commit()?;

        self.applied_index.store(index, Ordering::SeqCst);
        self.last_index.store(index, Ordering::SeqCst);

        // The snapshot may carry a lease and stats; reload them.
        let batch = WriteBatch::new(self.rm.engine());
        if let Some(v) = batch.get(&Key::LeaderLease(desc.range_id).encode()?)? {
            self.lease.store(Arc::new(Lease::decode(&v)?));
        }
        if let Some(v) = batch.get(&Key::RangeStats(desc.range_id).encode()?)? {
            *self.stats.lock()? = Stats::decode(&v)?;
        }
        self.set_desc(desc)
    }

    // Lease handling.

    /// Swaps the in-memory lease. When leadership changes hands, the new
    /// holder cannot have observed the previous holder's reads, so the
    /// timestamp cache low-water mark is raised to the lease start.
    pub(crate) fn install_lease(&self, lease: Lease) -> Result<()> {
        let prev = **self.lease.load();
        self.lease.store(Arc::new(lease));
        if prev.raft_node_id != lease.raft_node_id {
            self.inner.write()?.ts_cache.set_low_water(lease.start);
        }
        Ok(())
    }

    /// Builds a NotLeaderError carrying the current holder (if any) of the
    /// given lease, for client redirection.
    fn new_not_leader_error(&self, lease: &Lease, origin: RaftNodeID) -> Error {
        let desc = self.desc();
        let (_, origin_store) = decode_raft_node_id(origin);
        let leader = if lease.raft_node_id != 0 {
            let (_, holder_store) = decode_raft_node_id(lease.raft_node_id);
            desc.find_replica(holder_store)
        } else {
            None
        };
        Error::NotLeader {
            range_id: desc.range_id,
            replica: desc.find_replica(origin_store),
            leader,
        }
    }

    /// Proposes a leader lease for an interval starting at the given
    /// timestamp, directly to the log (skipping the command queue), and
    /// waits for it to apply. Unless an error is returned, the obtained
    /// lease covers the requested timestamp.
    fn request_leader_lease(&self, timestamp: Timestamp) -> Result<()> {
        let desc = self.desc();
        let expiration = timestamp.add(DEFAULT_LEADER_LEASE_DURATION_NANOS, 0);
        let header = RequestHeader {
            key: desc.start_key.clone(),
            timestamp,
            range_id: desc.range_id,
            ..Default::default()
        };
        let mut batch = BatchRequest::new(header.clone());
        batch.add(Request::LeaderLease(LeaderLeaseRequest {
            header,
            lease: Lease {
                start: timestamp,
                expiration,
                raft_node_id: self.rm.raft_node_id(),
            },
        }));

        let (err_rx, done_rx) = self.propose_raft_command(&mut batch)?;
        err_rx.recv()??;
        done_rx.recv()??;
        Ok(())
    }

    /// Checks whether this replica holds the leader lease at the given
    /// timestamp. If it does, returns success. If another replica holds it,
    /// redirects by returning NotLeaderError. If the lease is expired, a
    /// renewal is synchronously requested. The lease mutex guarantees at
    /// most one pending lease request per replica.
    pub fn redirect_on_or_acquire_leader_lease(&self, timestamp: Timestamp) -> Result<()> {
        let _guard = self.lease_mu.lock()?;
        let raft_node_id = self.rm.raft_node_id();

        let lease = self.lease();
        if lease.covers(timestamp) {
            if lease.owned_by(raft_node_id) {
                // Happy path: we have an active lease, nothing to do.
                return Ok(());
            }
            // The lease is currently held by another node; redirect.
            return Err(self.new_not_leader_error(&lease, raft_node_id));
        }

        // No active lease: request a renewal. A LeaseRejected outcome means
        // someone else got there first; if their lease covers our timestamp,
        // redirect to them.
        match self.request_leader_lease(timestamp) {
            Err(err @ Error::LeaseRejected { .. }) => {
                let lease = self.lease();
                if lease.covers(timestamp) {
                    return Err(self.new_not_leader_error(&lease, raft_node_id));
                }
                Err(err)
            }
            result => result,
        }
    }

    // Corruption handling.

    /// Refuses admission while the replica is marked corrupt.
    fn check_not_corrupt(&self) -> Result<()> {
        match &*self.corrupt.lock()? {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Stand-in for proper handling of failing replicas: a corruption error
    /// stalls the range (further admissions are refused) and is marked as
    /// processed. Quarantine policy beyond that is the operator's.
    fn maybe_set_corrupt(&self, result: CachedResponse) -> CachedResponse {
        let Err(Error::Corrupt { causes, .. }) = &result else { return result };
        error!("stalling replica {self} due to corruption: {causes:?}");
        let processed = Error::Corrupt { causes: causes.clone(), processed: true };
        if let Ok(mut corrupt) = self.corrupt.lock() {
            corrupt.get_or_insert_with(|| processed.clone());
        }
        Err(processed)
    }

    // Command admission.

    /// Adds a command for execution on this range. The command's affected
    /// keys are verified to be contained within the range and the range's
    /// leadership is confirmed. The command is then dispatched along the
    /// admin, read-only, or write path.
    pub fn add_command(&self, request: Request) -> Result<Response> {
        self.check_not_corrupt()?;
        if request.is_admin() {
            return self.add_admin_cmd(request);
        }

        // Wrap the request in a singleton batch and unwrap the reply.
        let mut batch = BatchRequest::new(request.header().clone());
        batch.add(request);
        let mut reply = self.add_batch_internal(batch)?;
        if reply.responses.len() != 1 {
            return Err(Error::Internal(format!(
                "expected a single wrapped response, got {}",
                reply.responses.len()
            )));
        }
        Ok(reply.responses.remove(0))
    }

    /// Adds a batch of commands for execution on this range. An empty batch
    /// succeeds with no state change and no log entry.
    pub fn add_batch_command(&self, batch: BatchRequest) -> Result<BatchResponse> {
        self.check_not_corrupt()?;
        self.add_batch_internal(batch)
    }

    fn add_batch_internal(&self, mut batch: BatchRequest) -> Result<BatchResponse> {
        Self::set_batch_timestamps(&mut batch);
        if batch.requests.is_empty() {
            return Ok(BatchResponse {
                header: ResponseHeader {
                    timestamp: batch.header.timestamp,
                    txn: batch.header.txn.clone(),
                },
                responses: Vec::new(),
            });
        }
        if batch.is_read_only() {
            self.add_read_only_cmd(batch)
        } else {
            self.add_write_cmd(batch, None)
        }
    }

    /// Offsets the timestamps of individual requests in a non-transactional
    /// write batch by their index position in logical ticks. This allows
    /// self-overlapping commands within the batch, which would otherwise
    /// loop on write-too-old errors. PushTxn is exempt: a batch of pushes
    /// against the same transaction must not ratchet the pushee by
    /// iteration.
    fn set_batch_timestamps(batch: &mut BatchRequest) {
        if batch.header.txn.is_some()
            || batch.header.timestamp.is_zero()
            || !batch.is_write()
        {
            return;
        }
        let base = batch.header.timestamp;
        for (i, request) in batch.requests.iter_mut().enumerate() {
            if !matches!(request, Request::PushTxn(_)) {
                request.header_mut().timestamp.forward(base.add(0, i as u32));
            }
        }
    }

    /// Verifies that the request's key span is fully contained in the range.
    fn check_cmd_header(&self, header: &RequestHeader) -> Result<()> {
        if !self.contains_key_range(&header.key, &header.end_key) {
            return Err(Error::RangeKeyMismatch {
                span: header.span(),
                range_span: self.desc().span(),
            });
        }
        Ok(())
    }

    /// Verifies batch validity requirements: wall time, priority and
    /// transaction must agree between the batch header and all constituent
    /// requests; a batch is either entirely read-only or entirely writes;
    /// EndTransaction must be alone in its batch; inconsistent reads are
    /// forbidden inside transactions; consensus reads are unsupported.
    fn check_batch_request(&self, batch: &BatchRequest) -> Result<()> {
        let mut read_only = false;
        for (i, request) in batch.requests.iter().enumerate() {
            if request.is_admin() {
                return Err(Error::InvalidInput("admin commands cannot be batched".into()));
            }
            if matches!(request, Request::EndTransaction(_)) && batch.requests.len() != 1 {
                return Err(Error::InvalidInput(
                    "cannot mix EndTransaction with other operations in a batch".into(),
                ));
            }
            let header = request.header();
            // Compare only wall time: logical ticks are used to offset
            // self-overlapping batches.
            if !header.timestamp.is_zero()
                && header.timestamp.wall_time != batch.header.timestamp.wall_time
            {
                return Err(Error::InvalidInput(format!(
                    "conflicting timestamp {} on request in batch at {}",
                    header.timestamp, batch.header.timestamp
                )));
            }
            if header.priority != batch.header.priority {
                return Err(Error::InvalidInput(
                    "conflicting user priority on request in batch".into(),
                ));
            }
            if header.txn != batch.header.txn {
                return Err(Error::InvalidInput(
                    "conflicting transaction on request in transactional batch".into(),
                ));
            }
            if request.is_read_only() {
                match header.read_consistency {
                    ReadConsistency::Inconsistent if header.txn.is_some() => {
                        return Err(Error::InvalidInput(
                            "cannot allow inconsistent reads within a transaction".into(),
                        ));
                    }
                    ReadConsistency::Consensus => {
                        return Err(Error::InvalidInput("consensus reads not implemented".into()));
                    }
                    _ => {}
                }
            }
            if i == 0 {
                read_only = request.is_read_only();
            } else if request.is_read_only() != read_only {
                return Err(Error::InvalidInput(
                    "batch mixes read-only and write requests".into(),
                ));
            }
        }
        Ok(())
    }

    /// Waits for overlapping, already-executing commands via the command
    /// queue, then adds this batch to gate subsequent overlapping commands.
    /// Returns the queue key for a later end_cmds(). Inconsistent reads
    /// bypass the queue entirely.
    ///
    /// The batch timestamp is stamped from the clock only after the wait, so
    /// the node clock has absorbed the high-water marks of prior overlapping
    /// commands.
    fn begin_cmds(&self, batch: &mut BatchRequest) -> Result<Option<cmdqueue::CmdKey>> {
        let mut key = None;
        if batch.header.read_consistency != ReadConsistency::Inconsistent {
            let read_only = batch.is_read_only();
            let spans: Vec<Span> = batch.requests.iter().map(|r| r.header().span()).collect();
            let waits = {
                let mut inner = self.inner.write()?;
                let waits = inner.cmd_queue.get_wait(read_only, &spans);
                key = Some(inner.cmd_queue.add(read_only, spans));
                waits
            };
            cmdqueue::wait_for(waits);
        }

        if batch.header.timestamp.is_zero() {
            batch.header.timestamp = self.rm.clock().now()?;
        }
        for request in &mut batch.requests {
            if request.header().timestamp.is_zero() {
                request.header_mut().timestamp = batch.header.timestamp;
            }
        }
        Ok(key)
    }

    /// Removes the batch from the command queue and, on success, records its
    /// final timestamps in the timestamp cache.
    fn end_cmds(&self, key: Option<cmdqueue::CmdKey>, batch: &BatchRequest, ok: bool) -> Result<()> {
        let mut inner = self.inner.write()?;
        if ok {
            for request in &batch.requests {
                if request.uses_timestamp_cache() {
                    let header = request.header();
                    inner.ts_cache.add(
                        &header.key,
                        &header.end_key,
                        header.timestamp,
                        header.txn.as_ref().map(|t| t.id),
                        request.is_read_only(),
                    );
                }
            }
        }
        if let Some(key) = key {
            inner.cmd_queue.remove(key);
        }
        Ok(())
    }

    /// Executes an admin command directly. There is no interaction with the
    /// command queue or the timestamp cache, as admin commands do not
    /// consistently access or modify the underlying data. Admin commands
    /// must run on the leader replica.
    fn add_admin_cmd(&self, request: Request) -> Result<Response> {
        let header = request.header();
        self.check_cmd_header(header)?;

        let timestamp = if header.timestamp.is_zero() {
            self.rm.clock().now()?
        } else {
            header.timestamp
        };
        self.redirect_on_or_acquire_leader_lease(timestamp)?;
        self.execute_admin_cmd(&request)
    }

    /// Executes a read-only batch: gate through the command queue, confirm
    /// the lease, then execute against a non-mutating engine snapshot.
    fn add_read_only_cmd(&self, mut batch: BatchRequest) -> Result<BatchResponse> {
        self.check_cmd_header(&batch.header)?;
        self.check_batch_request(&batch)?;

        let key = self.begin_cmds(&mut batch)?;

        // If the read went through the command queue it requires the leader
        // lease; inconsistent reads can be served by any replica.
        if key.is_some() {
            if let Err(err) = self.redirect_on_or_acquire_leader_lease(batch.header.timestamp) {
                self.end_cmds(key, &batch, false)?;
                return Err(err);
            }
        }

        let result = self.execute_read_only(&batch);
        self.end_cmds(key, &batch, result.is_ok())?;
        result
    }

    fn execute_read_only(&self, batch: &BatchRequest) -> Result<BatchResponse> {
        let snapshot = self.rm.new_snapshot()?;
        let mut view = WriteBatch::new(snapshot);
        let mut stats = Stats::default();
        let mut reply = BatchResponse {
            header: ResponseHeader {
                timestamp: batch.header.timestamp,
                txn: batch.header.txn.clone(),
            },
            responses: Vec::new(),
        };
        for request in &batch.requests {
            let (response, intents) = self.execute_cmd(&mut view, &mut stats, request)?;
            // Intents skipped by inconsistent reads are cleaned up in the
            // background.
            self.handle_skipped_intents(intents);
            reply.add(response);
        }
        Ok(reply)
    }

    /// Executes a write batch: gate through the command queue, confirm the
    /// lease, reconcile timestamps against the timestamp cache, propose to
    /// the log, and wait for the applied result. If a proposed signal is
    /// supplied, it fires when the command enters the log (or the function
    /// returns early with a preprocessing error), whichever happens first.
    fn add_write_cmd(
        &self,
        mut batch: BatchRequest,
        proposed: Option<Sender<()>>,
    ) -> Result<BatchResponse> {
        // Fires on drop, so early error returns also release the signal.
        let mut signal = Signal(proposed);

        self.check_cmd_header(&batch.header)?;
        self.check_batch_request(&batch)?;

        let key = self.begin_cmds(&mut batch)?;

        // This replica must have a valid leader lease to process a write.
        if let Err(err) = self.redirect_on_or_acquire_leader_lease(batch.header.timestamp) {
            self.end_cmds(key, &batch, false)?;
            return Err(err);
        }

        // Two important invariants: (1) a write must be ordered after the
        // most recent read of an overlapping key, and (2) a
        // non-transactional write must be ordered after the most recent
        // write. Transactional writes accept write conflicts here and defer
        // to the transaction protocol, in case the conflicting intent can be
        // pushed. Find the timestamp satisfying all requests in the batch.
        {
            let inner = self.inner.read()?;
            let mut timestamp = batch.header.timestamp;
            for request in &batch.requests {
                if !request.uses_timestamp_cache() {
                    continue;
                }
                let header = request.header();
                let (read_ts, write_ts) = inner.ts_cache.get_max(
                    &header.key,
                    &header.end_key,
                    header.txn.as_ref().map(|t| t.id),
                );
                if read_ts >= timestamp {
                    timestamp = read_ts.next();
                }
                if write_ts >= timestamp && batch.header.txn.is_none() {
                    timestamp = write_ts.next();
                }
            }
            batch.header.timestamp = timestamp;
        }
        // Copy the batch timestamp to each request, preserving the logical
        // self-overlap offsets via forward.
        let timestamp = batch.header.timestamp;
        for request in &mut batch.requests {
            request.header_mut().timestamp.forward(timestamp);
        }

        let (err_rx, done_rx) = self.propose_raft_command(&mut batch)?;
        signal.signal();

        // First wait for the log to commit or abort the command, then for
        // the state machine to apply it.
        let result = match err_rx.recv()? {
            Err(err) => Err(err),
            Ok(()) => done_rx.recv()?,
        };

        self.end_cmds(key, &batch, result.is_ok())?;
        result
    }

    // Proposal and apply.

    /// Registers a pending command and hands the batch to the consensus
    /// transport. Returns the proposal outcome channel and the applied
    /// result channel.
    fn propose_raft_command(
        &self,
        batch: &mut BatchRequest,
    ) -> Result<(Receiver<Result<()>>, Receiver<CachedResponse>)> {
        let cmd_id = batch.get_or_create_cmd_id(self.rm.clock().physical_now());
        let raft_cmd = RaftCommand::new(self.range_id(), self.rm.raft_node_id(), batch)?;

        let (done_tx, done_rx) = crossbeam::channel::bounded(1);
        self.inner.write()?.pending_cmds.insert(cmd_id, PendingCmd { done: done_tx });
        let err_rx = self.rm.propose_raft_command(cmd_id, raft_cmd);
        Ok((err_rx, done_rx))
    }

    /// Processes a committed log entry, invoked by the consensus transport
    /// strictly in index order. Applies the command to the state machine and
    /// signals the original caller, if it is still waiting here.
    pub fn process_raft_command(
        &self,
        id_key: CmdID,
        index: Index,
        cmd: RaftCommand,
    ) -> Result<BatchResponse> {
        assert!(index > 0, "process_raft_command requires a non-zero index");

        let pending = self.inner.write()?.pending_cmds.remove(&id_key);
        let batch = cmd.batch()?;

        let result = self.apply_raft_command(index, cmd.origin_node_id, &batch);
        let result = self.maybe_set_corrupt(result);

        match pending {
            Some(pending) => {
                // The caller may have been abandoned; the buffered channel
                // absorbs the result either way.
                let _ = pending.done.send(result.clone());
            }
            None => {
                if let Err(err) = &result {
                    debug!("error applying raft command on {self}: {err}");
                }
            }
        }
        result
    }

    /// Applies a command from the replicated log to the state machine,
    /// committing its effects, the response cache entry, and the advanced
    /// applied index in one atomic batch. Failures of the apply machinery
    /// itself (as opposed to failures of the command) surface as replica
    /// corruption.
    fn apply_raft_command(
        &self,
        index: Index,
        origin: RaftNodeID,
        batch_req: &BatchRequest,
    ) -> CachedResponse {
        let applied_index = self.applied_index();
        if index <= applied_index {
            return Err(Error::corrupt(
                format!("applied index moved backwards: {applied_index} >= {index}"),
                vec![],
            ));
        }

        let mut stats_delta = Stats::default();
        let (mut batch, mut result) =
            self.apply_raft_command_in_batch(origin, batch_req, &mut stats_delta)?;

        // Advance the applied index within the same batch, then commit
        // everything at once. The batch must be committed even when the
        // command failed, since it carries the response cache entry.
        batch.set(&Key::AppliedIndex(self.range_id()).encode()?, index.encode()?);
        match batch.commit() {
            Ok(()) => {
                self.applied_index.store(index, Ordering::SeqCst);
                if result.is_ok() && batch_req.is_write() {
                    if let Ok(mut stats) = self.stats.lock() {
                        stats.merge(&stats_delta);
                    }
                }
            }
            Err(commit_err) => {
                let causes = match result {
                    Err(prev) => vec![commit_err, prev],
                    Ok(_) => vec![commit_err],
                };
                result = Err(Error::corrupt("could not commit batch", causes));
            }
        }

        // On successful writes, fire the split and gossip triggers.
        if result.is_ok() && batch_req.is_write() {
            self.maybe_add_to_split_queue();

            let acquired_lease = batch_req
                .requests
                .iter()
                .any(|r| matches!(r, Request::LeaderLease(_)));
            let committed_txn = batch_req
                .requests
                .iter()
                .any(|r| matches!(r, Request::EndTransaction(_)));
            if acquired_lease {
                // A fresh lease may have to re-publish everything.
                let _ = self.maybe_gossip_configs(|prefix| self.contains_key(prefix));
                if self.contains_key(keys::SYSTEM_CONFIG_PREFIX) {
                    let _ = self.maybe_gossip_system_config();
                }
            } else {
                // Writes below the system boundary outside of a transaction
                // may have changed a config map. Transactional writes are
                // deferred to the commit trigger, since they are invisible
                // until then.
                let key = batch_req.header.key.clone();
                if key.as_slice() < keys::SYSTEM_MAX && batch_req.header.txn.is_none() {
                    let _ = self.maybe_gossip_configs(|prefix| key.starts_with(prefix));
                    if key.starts_with(keys::SYSTEM_CONFIG_PREFIX) {
                        let _ = self.maybe_gossip_system_config();
                    }
                }
                if committed_txn && self.contains_key(keys::SYSTEM_CONFIG_PREFIX) {
                    let _ = self.maybe_gossip_system_config();
                }
            }
        }

        result
    }

    /// Executes the command in a fresh storage batch, consulting and
    /// updating the response cache, and returns the batch for the caller to
    /// commit. The caller commits the batch even on command failure, since
    /// failed outcomes are cached too.
    fn apply_raft_command_in_batch(
        &self,
        origin: RaftNodeID,
        batch_req: &BatchRequest,
        stats_delta: &mut Stats,
    ) -> Result<(WriteBatch, CachedResponse)> {
        let mut batch = WriteBatch::new(self.rm.engine());

        // Check the response cache to ensure idempotency: a replayed
        // proposal returns its original outcome without re-execution.
        if batch_req.is_write() {
            match self.resp_cache.get_response(&batch, batch_req.header.cmd_id) {
                Err(err) => {
                    let corrupt =
                        Error::corrupt("could not read from response cache", vec![err]);
                    return Ok((batch, Err(corrupt)));
                }
                Ok(Some(cached)) => {
                    debug!("found response cache entry for {}", batch_req.header.cmd_id);
                    return Ok((batch, cached));
                }
                Ok(None) => {}
            }
        }

        let mut reply = BatchResponse {
            header: ResponseHeader {
                timestamp: batch_req.header.timestamp,
                txn: batch_req.header.txn.clone(),
            },
            responses: Vec::new(),
        };
        let mut failure = None;
        for request in &batch_req.requests {
            // Verify the lease is held by the origin node and still covers
            // the request, unless this command is itself acquiring it. The
            // lease held at proposal time may have changed hands since; the
            // new leader assumes responsibility for all past timestamps, so
            // execution here is no longer valid. Crucially, the response
            // cache is NOT updated for this error: the request will be
            // retried with the same command ID at the proper leader, and a
            // cached leadership error would poison that retry.
            if !matches!(request, Request::LeaderLease(_)) {
                let lease = self.lease();
                if !lease.owned_by(origin) || !lease.covers(request.header().timestamp) {
                    return Ok((batch, Err(self.new_not_leader_error(&lease, origin))));
                }
            }

            match self.execute_cmd(&mut batch, stats_delta, request) {
                Ok((mut response, intents)) => {
                    // Resolve skipped intents on the origin replica only.
                    if origin == self.rm.raft_node_id() {
                        self.handle_skipped_intents(intents);
                    }
                    response.header_mut().timestamp = request.header().timestamp;
                    reply.add(response);
                }
                Err(err) => {
                    reply.responses.clear();
                    failure = Some(err);
                    break;
                }
            }
        }

        let result = match failure {
            Some(err) => Err(err),
            None => Ok(reply),
        };

        // Add the outcome to the response cache for write commands. This is
        // part of command execution so every replica maintains the same
        // responses, keeping retries idempotent even across leadership
        // changes.
        if batch_req.is_write() {
            if result.is_ok() {
                // Flush the accumulated MVCC stats into the batch.
                let merged = {
                    let mut stats = *self.stats.lock()?;
                    stats.merge(stats_delta);
                    stats
                };
                batch.set(&Key::RangeStats(self.range_id()).encode()?, merged.encode()?);
            } else {
                // Reset the batch to clear out the partial execution and
                // keep only the response cache entry.
                batch = WriteBatch::new(self.rm.engine());
            }
            self.resp_cache.put_response(&mut batch, batch_req.header.cmd_id, &result)?;
        }

        Ok((batch, result))
    }

    // Intent resolution.

    /// Kicks off asynchronous resolution of intents encountered (and left in
    /// place) during command execution. They belong to other transactions;
    /// the range manager pushes those transactions and resolves the intents
    /// through the proper ranges.
    pub(crate) fn handle_skipped_intents(&self, intents: Vec<Intent>) {
        if intents.is_empty() {
            return;
        }
        let Some(this) = self.weak.upgrade() else { return };
        let task = move || {
            if let Err(err) =
                this.rm.resolve_write_intent_error(&this, intents, PushTxnType::Cleanup)
            {
                warn!("failed to resolve skipped intents: {err}");
            }
        };
        // During shutdown, run the resolution synchronously instead of
        // dropping it: blocked commands may depend on it.
        if let Err(task) = self.rm.stopper().run_async_task(task) {
            task();
        }
    }

    /// Resolves intents with a known transaction outcome. Intents local to
    /// this range are proposed through its own log; the call returns once
    /// they have been *proposed* (not applied), so a client retrying right
    /// after conflict resolution does not hit the same intents again. All
    /// non-local intents are resolved asynchronously in a batch via the
    /// shared client.
    pub fn resolve_intents(&self, intents: Vec<Intent>) -> Result<()> {
        let mut local = BatchRequest::new(RequestHeader {
            range_id: self.range_id(),
            ..Default::default()
        });
        let mut external = BatchRequest::new(RequestHeader::default());
        for intent in intents {
            let header = RequestHeader {
                key: intent.key.clone(),
                end_key: intent.end_key.clone(),
                ..Default::default()
            };
            if intent.end_key.is_empty() {
                let is_local = self.contains_key(&intent.key);
                let request = Request::ResolveIntent(crate::request::ResolveIntentRequest {
                    header,
                    intent_txn: intent.txn,
                });
                if is_local { local.add(request) } else { external.add(request) }
            } else {
                let is_local = self.contains_key_range(&intent.key, &intent.end_key);
                let request =
                    Request::ResolveIntentRange(crate::request::ResolveIntentRangeRequest {
                        header,
                        intent_txn: intent.txn,
                    });
                if is_local { local.add(request) } else { external.add(request) }
            }
        }

        if !local.requests.is_empty() {
            let Some(this) = self.weak.upgrade() else { return Ok(()) };
            let (proposed_tx, proposed_rx) = crossbeam::channel::bounded(1);
            let task = move || {
                if let Err(err) = this.add_write_cmd(local, Some(proposed_tx)) {
                    warn!("local intent resolution failed: {err}");
                }
            };
            if let Err(task) = self.rm.stopper().run_async_task(task) {
                task();
            }
            // Wait until the local batch has been proposed.
            let _ = proposed_rx.recv();
        }

        if !external.requests.is_empty() {
            let Some(this) = self.weak.upgrade() else { return Ok(()) };
            let task = move || {
                if let Err(err) = this.rm.send_external(external) {
                    debug!("external intent resolution failed: {err}");
                }
            };
            if let Err(task) = self.rm.stopper().run_async_task(task) {
                task();
            }
        }

        Ok(())
    }

    // Gossip triggers.

    /// Tries to obtain a leader lease for gossiping. Only the lease holder
    /// gossips; the returned bool indicates whether that's us. Leadership
    /// errors are expected and not propagated.
    fn get_lease_for_gossip(&self) -> Result<bool> {
        if self.rm.gossip().is_none() || !self.is_initialized() {
            return Err(Error::Internal("no gossip or range not initialized".into()));
        }
        let mut has_lease = false;
        let executed = self.rm.stopper().run_task(|| {
            let Ok(timestamp) = self.rm.clock().now() else { return };
            match self.redirect_on_or_acquire_leader_lease(timestamp) {
                Ok(()) => has_lease = true,
                // Someone else holds or just acquired the lease; they will
                // gossip instead.
                Err(Error::NotLeader { .. }) | Err(Error::LeaseRejected { .. }) => {}
                Err(err) => warn!("could not acquire lease for range gossip: {err}"),
            }
        });
        if !executed {
            return Err(Error::Abort);
        }
        Ok(has_lease)
    }

    /// Adds the cluster ID, sentinel, and first-range metadata to gossip if
    /// this is the first range and a leader lease can be obtained. The store
    /// calls this periodically on first-range replicas.
    pub fn maybe_gossip_first_range(&self) -> Result<()> {
        if !self.is_first_range() {
            return Ok(());
        }
        let Some(gossip) = self.rm.gossip() else { return Ok(()) };
        let cluster_id = self.rm.cluster_id();

        // The cluster ID is gossiped by all replicas of the first range.
        if let Err(err) = gossip.add_info(
            crate::gossip::KEY_CLUSTER_ID,
            cluster_id.clone().into_bytes(),
            crate::gossip::CLUSTER_ID_GOSSIP_TTL,
        ) {
            error!("failed to gossip cluster ID: {err}");
        }

        if !self.get_lease_for_gossip()? {
            return Ok(());
        }
        info!("gossiping sentinel and first range from {self}");
        if let Err(err) = gossip.add_info(
            crate::gossip::KEY_SENTINEL,
            cluster_id.into_bytes(),
            crate::gossip::CLUSTER_ID_GOSSIP_TTL,
        ) {
            error!("failed to gossip sentinel: {err}");
        }
        match self.desc().encode() {
            Ok(encoded) => {
                if let Err(err) = gossip.add_info(
                    crate::gossip::KEY_FIRST_RANGE,
                    encoded,
                    crate::gossip::CONFIG_GOSSIP_TTL,
                ) {
                    error!("failed to gossip first range metadata: {err}");
                }
            }
            Err(err) => error!("failed to encode first range descriptor: {err}"),
        }
        Ok(())
    }

    /// Gossips the configuration maps matching the given prefix predicate,
    /// if their content hash has changed since the last gossip. Gossip only
    /// happens while a valid lease is actually held; the method deliberately
    /// does not request one, since it is called from lease acquisition and
    /// apply paths.
    pub fn maybe_gossip_configs(&self, matches: impl Fn(&[u8]) -> bool) -> Result<()> {
        let mut inner = self.inner.write()?;
        self.maybe_gossip_configs_locked(&mut inner, matches);
        Ok(())
    }

    fn maybe_gossip_configs_locked(&self, inner: &mut Inner, matches: impl Fn(&[u8]) -> bool) {
        let Some(gossip) = self.rm.gossip() else { return };
        if !self.is_initialized() {
            return;
        }
        let lease = self.lease();
        let Ok(now) = self.rm.clock().now() else { return };
        if !lease.owned_by(self.rm.raft_node_id()) || !lease.covers(now) {
            // Do not gossip without holding the lease.
            return;
        }

        let batch = WriteBatch::new(self.rm.engine());
        for desc in &self.opts.config_descriptors {
            if !matches(&desc.key_prefix) {
                continue;
            }
            // Ranges must never split a config map; see the split queue.
            if !self.contains_key(&keys::prefix_end(&desc.key_prefix)) {
                error!("range {self} splits configuration values for {}", desc.gossip_key);
                continue;
            }
            let (config_map, hash) = match config::load_config_map(&batch, desc) {
                Ok(loaded) => loaded,
                Err(err) => {
                    // Unresolved intents in the span fail the load; the next
                    // trigger retries.
                    error!("failed loading {} config map: {err}", desc.gossip_key);
                    continue;
                }
            };
            if inner.config_hashes.get(desc.gossip_key) == Some(&hash) {
                continue;
            }
            inner.config_hashes.insert(desc.gossip_key, hash);
            info!("gossiping {} config from {self}", desc.gossip_key);
            match config_map.encode() {
                Ok(encoded) => {
                    if let Err(err) =
                        gossip.add_info(desc.gossip_key, encoded, crate::gossip::CONFIG_GOSSIP_TTL)
                    {
                        error!("failed to gossip {} config map: {err}", desc.gossip_key);
                    }
                }
                Err(err) => error!("failed to encode {} config map: {err}", desc.gossip_key),
            }
        }
    }

    /// Gossips the system configuration span as a whole if its content hash
    /// has changed since the last gossip. As with config maps, gossip only
    /// happens while a valid lease is actually held.
    pub fn maybe_gossip_system_config(&self) -> Result<()> {
        let mut inner = self.inner.write()?;
        let Some(gossip) = self.rm.gossip() else { return Ok(()) };
        if !self.is_initialized() {
            return Ok(());
        }
        let lease = self.lease();
        let now = self.rm.clock().now()?;
        if !lease.owned_by(self.rm.raft_node_id()) || !lease.covers(now) {
            return Ok(());
        }

        let batch = WriteBatch::new(self.rm.engine());
        let (system_config, hash) = match config::load_system_config(&batch) {
            Ok(loaded) => loaded,
            Err(err) => {
                error!("could not load system config: {err}");
                return Ok(());
            }
        };
        if inner.system_config_hash == hash {
            return Ok(());
        }
        inner.system_config_hash = hash;
        info!("gossiping system config from {self}");
        match system_config.encode() {
            Ok(encoded) => {
                if let Err(err) = gossip.add_info(
                    crate::gossip::KEY_SYSTEM_CONFIG,
                    encoded,
                    crate::gossip::CONFIG_GOSSIP_TTL,
                ) {
                    error!("failed to gossip system config: {err}");
                }
            }
            Err(err) => error!("failed to encode system config: {err}"),
        }
        Ok(())
    }

    /// Checks whether the range has outgrown the max size from its zone
    /// config and, if so, hands it to the split queue.
    fn maybe_add_to_split_queue(&self) {
        let max_bytes = self.get_max_bytes();
        let Ok(stats) = self.stats() else { return };
        if max_bytes > 0 && stats.key_bytes + stats.val_bytes > max_bytes {
            self.rm.maybe_enqueue_split(self);
        }
    }
}
