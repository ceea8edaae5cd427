//! The executor: dispatches individual requests against a storage batch,
//! collecting responses and any intents skipped during execution. Apply
//! calls this for writes in log order, the read-only path calls it against
//! an engine snapshot.

use super::{Replica, DEFAULT_HEARTBEAT_INTERVAL_NANOS};
use crate::encoding::Key as _;
use crate::encoding::Value as _;
use crate::error::{Error, Result};
use crate::keys::Key;
use crate::request::{
    AdminMergeResponse, AdminSplitResponse, ConditionalPutResponse, DeleteRangeResponse,
    DeleteResponse, EndTransactionRequest, EndTransactionResponse, GetResponse,
    IncrementResponse, KeyValue, LeaderLeaseRequest, LeaderLeaseResponse, PushTxnRequest,
    PushTxnResponse, PushTxnType, PutResponse, ReadConsistency, Request, RequestHeader,
    ResolveIntentRangeResponse, ResolveIntentResponse, Response, ResponseHeader,
    ReverseScanResponse, ScanResponse,
};
use crate::storage::mvcc::{self, Stats};
use crate::storage::WriteBatch;
use crate::types::{Intent, Span, TxnStatus};

/// Builds a response header echoing the request's timestamp and transaction.
fn response_header(header: &RequestHeader) -> ResponseHeader {
    ResponseHeader { timestamp: header.timestamp, txn: header.txn.clone() }
}

/// Returns the scan span of a header, using the successor key for point
/// requests.
fn scan_span(header: &RequestHeader) -> (Vec<u8>, Vec<u8>) {
    let span = header.span();
    let end = span.end_exclusive();
    (span.start, end)
}

impl Replica {
    /// Executes a single request against the given batch, returning its
    /// response and any intents that were skipped over during execution and
    /// should be resolved asynchronously.
    pub(crate) fn execute_cmd(
        &self,
        batch: &mut WriteBatch,
        stats: &mut Stats,
        request: &Request,
    ) -> Result<(Response, Vec<Intent>)> {
        if let Some(filter) = &self.opts.command_filter {
            filter(request)?;
        }

        let header = request.header();
        let ts = header.timestamp;
        let txn = header.txn.as_ref();
        let consistent = header.read_consistency != ReadConsistency::Inconsistent;

        match request {
            Request::Get(r) => {
                let (value, intents) = mvcc::get(batch, &r.header.key, ts, txn, consistent)?;
                let resp = GetResponse { header: response_header(header), value };
                Ok((Response::Get(resp), intents))
            }

            Request::Put(r) => {
                mvcc::put(batch, stats, &r.header.key, ts, r.value.clone(), txn)?;
                Ok((Response::Put(PutResponse { header: response_header(header) }), vec![]))
            }

            Request::ConditionalPut(r) => {
                mvcc::conditional_put(
                    batch,
                    stats,
                    &r.header.key,
                    ts,
                    r.value.clone(),
                    r.expected.clone(),
                    txn,
                )?;
                let resp = ConditionalPutResponse { header: response_header(header) };
                Ok((Response::ConditionalPut(resp), vec![]))
            }

            Request::Increment(r) => {
                let new_value =
                    mvcc::increment(batch, stats, &r.header.key, ts, r.increment, txn)?;
                let resp = IncrementResponse { header: response_header(header), new_value };
                Ok((Response::Increment(resp), vec![]))
            }

            Request::Delete(r) => {
                mvcc::delete(batch, stats, &r.header.key, ts, txn)?;
                Ok((Response::Delete(DeleteResponse { header: response_header(header) }), vec![]))
            }

            Request::DeleteRange(r) => {
                if r.header.end_key.is_empty() {
                    return Err(Error::InvalidInput("DeleteRange requires an end key".into()));
                }
                let num_deleted = mvcc::delete_range(
                    batch,
                    stats,
                    &r.header.key,
                    &r.header.end_key,
                    ts,
                    txn,
                )?;
                let resp = DeleteRangeResponse { header: response_header(header), num_deleted };
                Ok((Response::DeleteRange(resp), vec![]))
            }

            Request::Scan(r) => {
                let (start, end) = scan_span(&r.header);
                let (rows, intents) = mvcc::scan(batch, &start, &end, ts, txn, consistent)?;
                let mut rows: Vec<KeyValue> =
                    rows.into_iter().map(|(key, value)| KeyValue { key, value }).collect();
                if r.max_results > 0 {
                    rows.truncate(r.max_results as usize);
                }
                let resp = ScanResponse { header: response_header(header), rows };
                Ok((Response::Scan(resp), intents))
            }

            Request::ReverseScan(r) => {
                let (start, end) = scan_span(&r.header);
                let (rows, intents) = mvcc::scan(batch, &start, &end, ts, txn, consistent)?;
                let mut rows: Vec<KeyValue> = rows
                    .into_iter()
                    .rev()
                    .map(|(key, value)| KeyValue { key, value })
                    .collect();
                if r.max_results > 0 {
                    rows.truncate(r.max_results as usize);
                }
                let resp = ReverseScanResponse { header: response_header(header), rows };
                Ok((Response::ReverseScan(resp), intents))
            }

            Request::EndTransaction(r) => self.execute_end_transaction(batch, stats, r),

            Request::PushTxn(r) => self.execute_push_txn(batch, r),

            Request::ResolveIntent(r) => {
                mvcc::resolve_intent(batch, stats, &r.header.key, &r.intent_txn)?;
                let resp = ResolveIntentResponse { header: response_header(header) };
                Ok((Response::ResolveIntent(resp), vec![]))
            }

            Request::ResolveIntentRange(r) => {
                if r.header.end_key.is_empty() {
                    return Err(Error::InvalidInput(
                        "ResolveIntentRange requires an end key".into(),
                    ));
                }
                let num_resolved = mvcc::resolve_intent_range(
                    batch,
                    stats,
                    &r.header.key,
                    &r.header.end_key,
                    &r.intent_txn,
                )?;
                let resp =
                    ResolveIntentRangeResponse { header: response_header(header), num_resolved };
                Ok((Response::ResolveIntentRange(resp), vec![]))
            }

            Request::LeaderLease(r) => self.execute_leader_lease(batch, r),

            Request::AdminSplit(_) | Request::AdminMerge(_) => Err(Error::Internal(format!(
                "admin command {} cannot be executed through the log",
                request.name()
            ))),
        }
    }

    /// Finalizes a transaction: commits or aborts its record, resolves its
    /// locally-anchored intents inside the same batch, and returns non-local
    /// intents as skipped intents for asynchronous resolution. Resolving
    /// everything locally allows the record itself to be garbage collected
    /// immediately.
    fn execute_end_transaction(
        &self,
        batch: &mut WriteBatch,
        stats: &mut Stats,
        r: &EndTransactionRequest,
    ) -> Result<(Response, Vec<Intent>)> {
        let Some(header_txn) = &r.header.txn else {
            return Err(Error::InvalidInput("EndTransaction outside of a transaction".into()));
        };

        let mut record = mvcc::get_txn_record(batch, &header_txn.key, header_txn.id)?
            .unwrap_or_else(|| header_txn.clone());
        match record.status {
            TxnStatus::Committed => {
                return Err(Error::InvalidInput("transaction already committed".into()))
            }
            TxnStatus::Aborted => {
                return Err(Error::InvalidInput("transaction already aborted".into()))
            }
            TxnStatus::Pending => {}
        }
        record.timestamp.forward(r.header.timestamp);
        record.status = if r.commit { TxnStatus::Committed } else { TxnStatus::Aborted };

        // Intents on this range resolve synchronously in the same batch, so
        // the transaction's effects become visible atomically with its
        // record. The rest is the caller's to resolve asynchronously.
        let desc = self.desc();
        let mut external = Vec::new();
        for intent in &r.intents {
            let local = if intent.end_key.is_empty() {
                desc.contains_key(&intent.key)
            } else {
                desc.contains_key_range(&intent.key, &intent.end_key)
            };
            if local {
                if intent.end_key.is_empty() {
                    mvcc::resolve_intent(batch, stats, &intent.key, &record)?;
                } else {
                    mvcc::resolve_intent_range(
                        batch,
                        stats,
                        &intent.key,
                        &intent.end_key,
                        &record,
                    )?;
                }
            } else {
                let mut intent = intent.clone();
                intent.txn = record.clone();
                external.push(intent);
            }
        }

        if self.opts.auto_gc_transactions && external.is_empty() {
            mvcc::delete_txn_record(batch, &record)?;
        } else {
            mvcc::put_txn_record(batch, &record)?;
        }

        let resp = EndTransactionResponse {
            header: ResponseHeader { timestamp: r.header.timestamp, txn: Some(record) },
        };
        Ok((Response::EndTransaction(resp), external))
    }

    /// Pushes another transaction, either aborting it or forwarding its
    /// timestamp. A finalized pushee is returned as-is. The push succeeds if
    /// the pusher has strictly higher priority, or if a cleanup push finds
    /// the pushee expired (no activity within twice the heartbeat interval).
    fn execute_push_txn(
        &self,
        batch: &mut WriteBatch,
        r: &PushTxnRequest,
    ) -> Result<(Response, Vec<Intent>)> {
        let mut pushee = mvcc::get_txn_record(batch, &r.pushee.key, r.pushee.id)?
            .unwrap_or_else(|| r.pushee.clone());
        if pushee.status != TxnStatus::Pending {
            let resp = PushTxnResponse { header: response_header(&r.header), pushee };
            return Ok((Response::PushTxn(resp), vec![]));
        }

        let pusher_priority =
            r.header.txn.as_ref().map(|t| t.priority).unwrap_or(r.header.priority);
        let expired = r.header.timestamp.wall_time
            > pushee.timestamp.wall_time + 2 * DEFAULT_HEARTBEAT_INTERVAL_NANOS;
        let wins = match r.push_type {
            PushTxnType::Timestamp | PushTxnType::Abort => pusher_priority > pushee.priority,
            PushTxnType::Cleanup => expired || pusher_priority > pushee.priority,
        };
        if !wins {
            return Err(Error::InvalidInput(format!(
                "failed to push transaction {}: pushee has priority {}",
                pushee.id, pushee.priority
            )));
        }

        match r.push_type {
            PushTxnType::Abort | PushTxnType::Cleanup => pushee.status = TxnStatus::Aborted,
            PushTxnType::Timestamp => {
                pushee.timestamp.forward(r.header.timestamp.next());
            }
        }
        mvcc::put_txn_record(batch, &pushee)?;

        let resp = PushTxnResponse { header: response_header(&r.header), pushee };
        Ok((Response::PushTxn(resp), vec![]))
    }

    /// Applies a leader lease request. The requested lease is rejected if it
    /// overlaps a live lease held by another node; otherwise the lease record
    /// is persisted and the in-memory lease swapped. This runs on every
    /// replica through the log, so all replicas agree on the lease.
    fn execute_leader_lease(
        &self,
        batch: &mut WriteBatch,
        r: &LeaderLeaseRequest,
    ) -> Result<(Response, Vec<Intent>)> {
        let existing = self.lease();
        if existing.covers(r.lease.start) && !existing.owned_by(r.lease.raft_node_id) {
            return Err(Error::LeaseRejected { requested: r.lease, existing });
        }

        let range_id = self.desc().range_id;
        batch.set(&Key::LeaderLease(range_id).encode()?, r.lease.encode()?);
        self.install_lease(r.lease)?;

        let resp = LeaderLeaseResponse { header: response_header(&r.header) };
        Ok((Response::LeaderLease(resp), vec![]))
    }

    /// Executes an admin request directly, outside the command queue and the
    /// consensus log, delegating range restructuring to the range manager.
    pub(super) fn execute_admin_cmd(&self, request: &Request) -> Result<Response> {
        match request {
            Request::AdminSplit(r) => {
                let desc = self.desc();
                if !desc.contains_key(&r.split_key) || r.split_key == desc.start_key {
                    return Err(Error::InvalidInput(format!(
                        "invalid split key {} for {}",
                        crate::types::fmt_key(&r.split_key),
                        Span::new(desc.start_key.clone(), desc.end_key.clone()),
                    )));
                }
                self.rm.split_range(self, r.split_key.clone())?;
                let resp = AdminSplitResponse { header: response_header(request.header()) };
                Ok(Response::AdminSplit(resp))
            }
            Request::AdminMerge(_) => {
                self.rm.merge_range(self)?;
                let resp = AdminMergeResponse { header: response_header(request.header()) };
                Ok(Response::AdminMerge(resp))
            }
            request => {
                Err(Error::Internal(format!("unrecognized admin command {}", request.name())))
            }
        }
    }
}

// Executor-level behavior is exercised by the replica tests in the parent
// module, which run against a full replica and loopback range manager.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_span_uses_successor_for_points() {
        let header =
            RequestHeader { key: b"k".to_vec(), end_key: Vec::new(), ..Default::default() };
        let (start, end) = scan_span(&header);
        assert_eq!(start, b"k".to_vec());
        assert_eq!(end, b"k\x00".to_vec());

        let header =
            RequestHeader { key: b"a".to_vec(), end_key: b"z".to_vec(), ..Default::default() };
        let (start, end) = scan_span(&header);
        assert_eq!((start, end), (b"a".to_vec(), b"z".to_vec()));
    }
}
