//! Test harness: a loopback range manager that commits proposals
//! immediately and applies them to the registered replica in log order, plus
//! a convenience context wiring up a replica with a manual clock, an
//! in-memory engine, and in-memory gossip.

use crate::error::{Error, Result};
use crate::gossip::{Gossip, MemGossip};
use crate::hlc::{Clock, ManualClock};
use crate::rangemgr::RangeManager;
use crate::replica::{Replica, ReplicaOptions};
use crate::request::{BatchRequest, BatchResponse, PushTxnType};
use crate::stopper::Stopper;
use crate::storage::engine::share;
use crate::storage::{Engine as _, Memory, SharedEngine};
use crate::types::{
    make_raft_node_id, CmdID, Intent, RaftNodeID, RangeDescriptor, ReplicaDescriptor, StoreID,
};
use crate::wire::RaftCommand;

use crossbeam::channel::Receiver;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// One second in nanoseconds, for readable manual clock arithmetic.
pub const SECOND: i64 = 1_000_000_000;

/// A loopback range manager for a single replica. Proposals commit
/// immediately and apply inline on the proposing thread, strictly in index
/// order (serialized by a mutex, since background tasks may propose
/// concurrently).
pub struct TestRangeManager {
    clock: Clock,
    engine: SharedEngine,
    gossip: Option<MemGossip>,
    stopper: Stopper,
    store_id: StoreID,
    raft_node_id: RaftNodeID,
    replica: Mutex<Weak<Replica>>,
    /// The next log index to assign, guarded to keep applies in log order.
    next_index: Mutex<u64>,
    /// Number of proposals handed to the "transport".
    pub proposals: AtomicU64,
    /// Intents handed off for asynchronous conflict resolution.
    pub resolved_intents: Mutex<Vec<Intent>>,
    /// Batches sent to other ranges via the shared client.
    pub external_batches: Mutex<Vec<BatchRequest>>,
    /// Split keys requested via admin commands.
    pub splits: Mutex<Vec<Vec<u8>>>,
}

impl TestRangeManager {
    pub fn new(manual: &ManualClock, gossip: bool) -> Arc<Self> {
        Arc::new(TestRangeManager {
            clock: manual.clock(),
            engine: share(Memory::new()),
            gossip: gossip.then(MemGossip::new),
            stopper: Stopper::new(),
            store_id: 1,
            raft_node_id: make_raft_node_id(1, 1),
            replica: Mutex::new(Weak::new()),
            next_index: Mutex::new(1),
            proposals: AtomicU64::new(0),
            resolved_intents: Mutex::new(Vec::new()),
            external_batches: Mutex::new(Vec::new()),
            splits: Mutex::new(Vec::new()),
        })
    }

    /// Registers the replica that committed commands are applied to, and
    /// aligns the log index with its applied index.
    pub fn register(&self, replica: &Arc<Replica>) {
        *self.replica.lock().unwrap() = Arc::downgrade(replica);
        *self.next_index.lock().unwrap() = replica.applied_index() + 1;
    }

    /// The in-memory gossip network, if enabled.
    pub fn mem_gossip(&self) -> Option<&MemGossip> {
        self.gossip.as_ref()
    }
}

impl RangeManager for TestRangeManager {
    fn cluster_id(&self) -> String {
        "test-cluster".to_string()
    }

    fn store_id(&self) -> StoreID {
        self.store_id
    }

    fn raft_node_id(&self) -> RaftNodeID {
        self.raft_node_id
    }

    fn clock(&self) -> &Clock {
        &self.clock
    }

    fn engine(&self) -> SharedEngine {
        self.engine.clone()
    }

    fn gossip(&self) -> Option<&dyn Gossip> {
        self.gossip.as_ref().map(|g| g as &dyn Gossip)
    }

    fn stopper(&self) -> &Stopper {
        &self.stopper
    }

    fn propose_raft_command(&self, id_key: CmdID, cmd: RaftCommand) -> Receiver<Result<()>> {
        self.proposals.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = crossbeam::channel::bounded(1);
        let Some(replica) = self.replica.lock().unwrap().upgrade() else {
            let _ = tx.send(Err(Error::Internal("no replica registered".into())));
            return rx;
        };
        // Commit the proposal, then apply it inline at the next log index.
        // The index lock keeps concurrent proposers in log order. Snapshots
        // may have advanced the applied index past our counter.
        let _ = tx.send(Ok(()));
        let mut next_index = self.next_index.lock().unwrap();
        let index = (*next_index).max(replica.applied_index() + 1);
        *next_index = index + 1;
        let _ = replica.process_raft_command(id_key, index, cmd);
        rx
    }

    fn new_snapshot(&self) -> Result<SharedEngine> {
        let mut engine = self.engine.lock()?;
        let mut snapshot = Memory::new();
        for item in engine.scan_dyn((std::ops::Bound::Unbounded, std::ops::Bound::Unbounded)) {
            let (key, value) = item?;
            snapshot.set(&key, value)?;
        }
        Ok(share(snapshot))
    }

    fn send_external(&self, batch: BatchRequest) -> Result<BatchResponse> {
        self.external_batches.lock()?.push(batch);
        Ok(BatchResponse::default())
    }

    fn resolve_write_intent_error(
        &self,
        _replica: &Replica,
        intents: Vec<Intent>,
        _push_type: PushTxnType,
    ) -> Result<()> {
        self.resolved_intents.lock()?.extend(intents);
        Ok(())
    }

    fn split_range(&self, _replica: &Replica, split_key: Vec<u8>) -> Result<()> {
        self.splits.lock()?.push(split_key);
        Ok(())
    }

    fn merge_range(&self, _replica: &Replica) -> Result<()> {
        Ok(())
    }

    fn remove_replica(&self, _replica: &Replica) -> Result<()> {
        Ok(())
    }

    fn process_range_descriptor_update(&self, _replica: &Replica) -> Result<()> {
        Ok(())
    }
}

/// A replica under test, with its manual clock and loopback manager.
pub struct TestContext {
    pub manual: ManualClock,
    pub rm: Arc<TestRangeManager>,
    pub replica: Arc<Replica>,
}

impl TestContext {
    /// Creates a first-range replica covering the whole keyspace, with the
    /// manual clock at one second.
    pub fn new() -> Result<TestContext> {
        Self::with_options(ReplicaOptions::default())
    }

    pub fn with_options(opts: ReplicaOptions) -> Result<TestContext> {
        let manual = ManualClock::new(SECOND);
        let rm = TestRangeManager::new(&manual, true);
        let desc = RangeDescriptor {
            range_id: 1,
            start_key: crate::keys::KEY_MIN.to_vec(),
            end_key: crate::keys::KEY_MAX.to_vec(),
            replicas: vec![
                ReplicaDescriptor { node_id: 1, store_id: 1 },
                ReplicaDescriptor { node_id: 2, store_id: 2 },
            ],
        };
        let replica = Replica::new(desc, rm.clone(), opts)?;
        rm.register(&replica);
        Ok(TestContext { manual, rm, replica })
    }
}
