//! The contract between a replica and its enclosing store. The store owns the
//! shared machinery a replica needs: the clock, the storage engine, the
//! gossip network, the consensus transport, and the cluster-level range
//! lifecycle operations (splits, merges, rebalancing). The replica only ever
//! talks to this trait, which keeps it testable with a loopback
//! implementation.

use crate::error::Result;
use crate::gossip::Gossip;
use crate::hlc::Clock;
use crate::replica::Replica;
use crate::request::{BatchRequest, BatchResponse, PushTxnType};
use crate::stopper::Stopper;
use crate::storage::SharedEngine;
use crate::types::{CmdID, Intent, RaftNodeID, StoreID};
use crate::wire::RaftCommand;

use crossbeam::channel::Receiver;

/// The store-side interface consumed by replicas.
pub trait RangeManager: Send + Sync {
    /// The cluster identity, gossiped by first-range replicas.
    fn cluster_id(&self) -> String;

    /// The store this manager belongs to.
    fn store_id(&self) -> StoreID;

    /// The Raft participant identity of this store.
    fn raft_node_id(&self) -> RaftNodeID;

    /// The store's hybrid logical clock.
    fn clock(&self) -> &Clock;

    /// The store's storage engine, shared by all its replicas.
    fn engine(&self) -> SharedEngine;

    /// The gossip network, if connected. May be None in tests.
    fn gossip(&self) -> Option<&dyn Gossip>;

    /// The background task runner.
    fn stopper(&self) -> &Stopper;

    /// Hands a command to the consensus transport. The returned channel
    /// yields the proposal outcome: Ok once the command has committed to the
    /// log, or an error if it was aborted. The applied result is delivered
    /// separately via Replica::process_raft_command, invoked by the transport
    /// in log order.
    fn propose_raft_command(&self, id_key: CmdID, cmd: RaftCommand) -> Receiver<Result<()>>;

    /// Returns a read-only snapshot of the engine for read execution.
    fn new_snapshot(&self) -> Result<SharedEngine>;

    /// Sends a batch whose keys live outside this store via the shared
    /// client, routing it to the proper ranges.
    fn send_external(&self, batch: BatchRequest) -> Result<BatchResponse>;

    /// Resolves conflicting intents on behalf of a replica: pushes the
    /// owning transactions as needed, then resolves the intents through the
    /// proper ranges.
    fn resolve_write_intent_error(
        &self,
        replica: &Replica,
        intents: Vec<Intent>,
        push_type: PushTxnType,
    ) -> Result<()>;

    /// Splits a range at the given key, creating a new range for the right
    /// half.
    fn split_range(&self, replica: &Replica, split_key: Vec<u8>) -> Result<()>;

    /// Merges the range with its right-hand neighbor.
    fn merge_range(&self, replica: &Replica) -> Result<()>;

    /// Removes the replica from this store.
    fn remove_replica(&self, replica: &Replica) -> Result<()>;

    /// Called whenever a replica's range descriptor changes, so the store
    /// can update its lookup structures.
    fn process_range_descriptor_update(&self, replica: &Replica) -> Result<()>;

    /// Considers the range for a split based on its size. Default: no split
    /// queue.
    fn maybe_enqueue_split(&self, _replica: &Replica) {}
}
