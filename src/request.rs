//! The command surface of a range: a closed union of request kinds, their
//! responses, and the batches that carry them through admission, proposal and
//! apply. Requests partition into three disjoint classes: read-only requests
//! execute against a snapshot, write requests go through the consensus log,
//! and admin requests bypass the data path entirely.

use crate::hlc::Timestamp;
use crate::types::{CmdID, Intent, Lease, RangeID, Span, Txn};

use serde::{Deserialize, Serialize};

/// The read consistency of a request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum ReadConsistency {
    /// Reads gate through the command queue and require the leader lease.
    #[default]
    Consistent,
    /// Reads bypass the command queue and lease, and may see stale data or
    /// skip over intents (reporting them for asynchronous cleanup).
    Inconsistent,
    /// Reads through the consensus log. Unsupported.
    Consensus,
}

/// The header shared by all requests.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// The first key affected by the request.
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    /// The end of the affected key span, exclusive. Empty for point requests.
    #[serde(with = "serde_bytes")]
    pub end_key: Vec<u8>,
    /// The request timestamp. Zero timestamps are stamped by the replica's
    /// clock after command queue admission.
    pub timestamp: Timestamp,
    /// The command identifier, for idempotent retries of writes.
    pub cmd_id: CmdID,
    /// The target range.
    pub range_id: RangeID,
    /// The user priority, used for transaction conflict resolution.
    pub priority: u32,
    /// The transaction this request is part of, if any.
    pub txn: Option<Txn>,
    /// The read consistency. Only meaningful for read-only requests.
    pub read_consistency: ReadConsistency,
}

impl RequestHeader {
    /// Returns the key span affected by the request.
    pub fn span(&self) -> Span {
        if self.end_key.is_empty() {
            Span::point(self.key.clone())
        } else {
            Span::new(self.key.clone(), self.end_key.clone())
        }
    }
}

/// The type of a transaction push.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PushTxnType {
    /// Move the pushee's timestamp forward, allowing the pusher to read
    /// below it.
    Timestamp,
    /// Abort the pushee, allowing the pusher to write.
    Abort,
    /// Clean up an abandoned transaction encountered via its intents.
    Cleanup,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct GetRequest {
    pub header: RequestHeader,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PutRequest {
    pub header: RequestHeader,
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConditionalPutRequest {
    pub header: RequestHeader,
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
    /// The expected current value, or None if the key must not exist.
    pub expected: Option<Vec<u8>>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct IncrementRequest {
    pub header: RequestHeader,
    pub increment: i64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub header: RequestHeader,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeleteRangeRequest {
    pub header: RequestHeader,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub header: RequestHeader,
    /// Maximum number of results, 0 for no limit.
    pub max_results: u64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReverseScanRequest {
    pub header: RequestHeader,
    /// Maximum number of results, 0 for no limit.
    pub max_results: u64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct EndTransactionRequest {
    pub header: RequestHeader,
    /// True to commit, false to abort.
    pub commit: bool,
    /// The intents written by the transaction, as known to the coordinator.
    pub intents: Vec<Intent>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PushTxnRequest {
    pub header: RequestHeader,
    /// The transaction to push.
    pub pushee: Txn,
    pub push_type: PushTxnType,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResolveIntentRequest {
    pub header: RequestHeader,
    /// The transaction whose intent is being resolved, with its
    /// authoritative status and final timestamp.
    pub intent_txn: Txn,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResolveIntentRangeRequest {
    pub header: RequestHeader,
    /// The transaction whose intents are being resolved.
    pub intent_txn: Txn,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct LeaderLeaseRequest {
    pub header: RequestHeader,
    /// The requested lease.
    pub lease: Lease,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct AdminSplitRequest {
    pub header: RequestHeader,
    /// The key to split at.
    #[serde(with = "serde_bytes")]
    pub split_key: Vec<u8>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct AdminMergeRequest {
    pub header: RequestHeader,
}

/// A request to a range. The executor dispatches on the variant; admission
/// partitions the variants into read-only, write, and admin classes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Request {
    Get(GetRequest),
    Put(PutRequest),
    ConditionalPut(ConditionalPutRequest),
    Increment(IncrementRequest),
    Delete(DeleteRequest),
    DeleteRange(DeleteRangeRequest),
    Scan(ScanRequest),
    ReverseScan(ReverseScanRequest),
    EndTransaction(EndTransactionRequest),
    PushTxn(PushTxnRequest),
    ResolveIntent(ResolveIntentRequest),
    ResolveIntentRange(ResolveIntentRangeRequest),
    LeaderLease(LeaderLeaseRequest),
    AdminSplit(AdminSplitRequest),
    AdminMerge(AdminMergeRequest),
}

impl Request {
    /// Returns the request header.
    pub fn header(&self) -> &RequestHeader {
        match self {
            Request::Get(r) => &r.header,
            Request::Put(r) => &r.header,
            Request::ConditionalPut(r) => &r.header,
            Request::Increment(r) => &r.header,
            Request::Delete(r) => &r.header,
            Request::DeleteRange(r) => &r.header,
            Request::Scan(r) => &r.header,
            Request::ReverseScan(r) => &r.header,
            Request::EndTransaction(r) => &r.header,
            Request::PushTxn(r) => &r.header,
            Request::ResolveIntent(r) => &r.header,
            Request::ResolveIntentRange(r) => &r.header,
            Request::LeaderLease(r) => &r.header,
            Request::AdminSplit(r) => &r.header,
            Request::AdminMerge(r) => &r.header,
        }
    }

    /// Returns the request header mutably.
    pub fn header_mut(&mut self) -> &mut RequestHeader {
        match self {
            Request::Get(r) => &mut r.header,
            Request::Put(r) => &mut r.header,
            Request::ConditionalPut(r) => &mut r.header,
            Request::Increment(r) => &mut r.header,
            Request::Delete(r) => &mut r.header,
            Request::DeleteRange(r) => &mut r.header,
            Request::Scan(r) => &mut r.header,
            Request::ReverseScan(r) => &mut r.header,
            Request::EndTransaction(r) => &mut r.header,
            Request::PushTxn(r) => &mut r.header,
            Request::ResolveIntent(r) => &mut r.header,
            Request::ResolveIntentRange(r) => &mut r.header,
            Request::LeaderLease(r) => &mut r.header,
            Request::AdminSplit(r) => &mut r.header,
            Request::AdminMerge(r) => &mut r.header,
        }
    }

    /// The request kind, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Get(_) => "Get",
            Request::Put(_) => "Put",
            Request::ConditionalPut(_) => "ConditionalPut",
            Request::Increment(_) => "Increment",
            Request::Delete(_) => "Delete",
            Request::DeleteRange(_) => "DeleteRange",
            Request::Scan(_) => "Scan",
            Request::ReverseScan(_) => "ReverseScan",
            Request::EndTransaction(_) => "EndTransaction",
            Request::PushTxn(_) => "PushTxn",
            Request::ResolveIntent(_) => "ResolveIntent",
            Request::ResolveIntentRange(_) => "ResolveIntentRange",
            Request::LeaderLease(_) => "LeaderLease",
            Request::AdminSplit(_) => "AdminSplit",
            Request::AdminMerge(_) => "AdminMerge",
        }
    }

    /// Returns true if the request only reads data.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Request::Get(_) | Request::Scan(_) | Request::ReverseScan(_))
    }

    /// Returns true if the request mutates data and must go through the
    /// consensus log. Note that PushTxn is classified as a write even though
    /// it may not mutate anything; see the module documentation on open
    /// semantics questions.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Request::Put(_)
                | Request::ConditionalPut(_)
                | Request::Increment(_)
                | Request::Delete(_)
                | Request::DeleteRange(_)
                | Request::EndTransaction(_)
                | Request::PushTxn(_)
                | Request::ResolveIntent(_)
                | Request::ResolveIntentRange(_)
                | Request::LeaderLease(_)
        )
    }

    /// Returns true if the request is an administrative command, which
    /// bypasses the command queue and timestamp cache.
    pub fn is_admin(&self) -> bool {
        matches!(self, Request::AdminSplit(_) | Request::AdminMerge(_))
    }

    /// Returns true if the request can be wrapped in a batch. Admin commands
    /// must be alone.
    pub fn can_batch(&self) -> bool {
        !self.is_admin()
    }

    /// Returns true if the request affects or is affected by the timestamp
    /// cache. Inconsistent reads bypass the cache.
    pub fn uses_timestamp_cache(&self) -> bool {
        if self.is_read_only() && self.header().read_consistency == ReadConsistency::Inconsistent {
            return false;
        }
        matches!(
            self,
            Request::Get(_)
                | Request::Put(_)
                | Request::ConditionalPut(_)
                | Request::Increment(_)
                | Request::Scan(_)
                | Request::ReverseScan(_)
                | Request::Delete(_)
                | Request::DeleteRange(_)
                | Request::ResolveIntent(_)
                | Request::ResolveIntentRange(_)
        )
    }
}

/// The header shared by all responses.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResponseHeader {
    /// The timestamp at which the request finally executed.
    pub timestamp: Timestamp,
    /// The updated transaction, if the request was transactional.
    pub txn: Option<Txn>,
}

/// A key/value pair returned by scans.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct GetResponse {
    pub header: ResponseHeader,
    pub value: Option<Vec<u8>>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PutResponse {
    pub header: ResponseHeader,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConditionalPutResponse {
    pub header: ResponseHeader,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct IncrementResponse {
    pub header: ResponseHeader,
    pub new_value: i64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub header: ResponseHeader,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeleteRangeResponse {
    pub header: ResponseHeader,
    pub num_deleted: u64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub header: ResponseHeader,
    pub rows: Vec<KeyValue>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReverseScanResponse {
    pub header: ResponseHeader,
    pub rows: Vec<KeyValue>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct EndTransactionResponse {
    pub header: ResponseHeader,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PushTxnResponse {
    pub header: ResponseHeader,
    /// The pushee's record after the push.
    pub pushee: Txn,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResolveIntentResponse {
    pub header: ResponseHeader,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResolveIntentRangeResponse {
    pub header: ResponseHeader,
    pub num_resolved: u64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct LeaderLeaseResponse {
    pub header: ResponseHeader,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct AdminSplitResponse {
    pub header: ResponseHeader,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct AdminMergeResponse {
    pub header: ResponseHeader,
}

/// A response from a range, mirroring the request union.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Get(GetResponse),
    Put(PutResponse),
    ConditionalPut(ConditionalPutResponse),
    Increment(IncrementResponse),
    Delete(DeleteResponse),
    DeleteRange(DeleteRangeResponse),
    Scan(ScanResponse),
    ReverseScan(ReverseScanResponse),
    EndTransaction(EndTransactionResponse),
    PushTxn(PushTxnResponse),
    ResolveIntent(ResolveIntentResponse),
    ResolveIntentRange(ResolveIntentRangeResponse),
    LeaderLease(LeaderLeaseResponse),
    AdminSplit(AdminSplitResponse),
    AdminMerge(AdminMergeResponse),
}

impl Response {
    /// Returns the response header.
    pub fn header(&self) -> &ResponseHeader {
        match self {
            Response::Get(r) => &r.header,
            Response::Put(r) => &r.header,
            Response::ConditionalPut(r) => &r.header,
            Response::Increment(r) => &r.header,
            Response::Delete(r) => &r.header,
            Response::DeleteRange(r) => &r.header,
            Response::Scan(r) => &r.header,
            Response::ReverseScan(r) => &r.header,
            Response::EndTransaction(r) => &r.header,
            Response::PushTxn(r) => &r.header,
            Response::ResolveIntent(r) => &r.header,
            Response::ResolveIntentRange(r) => &r.header,
            Response::LeaderLease(r) => &r.header,
            Response::AdminSplit(r) => &r.header,
            Response::AdminMerge(r) => &r.header,
        }
    }

    /// Returns the response header mutably.
    pub fn header_mut(&mut self) -> &mut ResponseHeader {
        match self {
            Response::Get(r) => &mut r.header,
            Response::Put(r) => &mut r.header,
            Response::ConditionalPut(r) => &mut r.header,
            Response::Increment(r) => &mut r.header,
            Response::Delete(r) => &mut r.header,
            Response::DeleteRange(r) => &mut r.header,
            Response::Scan(r) => &mut r.header,
            Response::ReverseScan(r) => &mut r.header,
            Response::EndTransaction(r) => &mut r.header,
            Response::PushTxn(r) => &mut r.header,
            Response::ResolveIntent(r) => &mut r.header,
            Response::ResolveIntentRange(r) => &mut r.header,
            Response::LeaderLease(r) => &mut r.header,
            Response::AdminSplit(r) => &mut r.header,
            Response::AdminMerge(r) => &mut r.header,
        }
    }
}

/// A batch of requests executed as a unit. A batch is either entirely
/// read-only or entirely writes, and shares a single header whose timestamp,
/// priority and transaction must agree with every constituent request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub header: RequestHeader,
    pub requests: Vec<Request>,
}

impl crate::encoding::Value for BatchRequest {}

impl BatchRequest {
    /// Creates a batch with the given header.
    pub fn new(header: RequestHeader) -> Self {
        BatchRequest { header, requests: Vec::new() }
    }

    /// Adds a request to the batch, growing the batch's key span to cover
    /// the request's span.
    pub fn add(&mut self, request: Request) {
        let span = {
            let header = request.header();
            Span::new(header.key.clone(), header.end_key.clone())
        };
        if self.requests.is_empty() {
            self.header.key = span.start;
            self.header.end_key = span.end;
        } else {
            // Normalize the existing point span before growing it, so the
            // original point key stays covered.
            if self.header.end_key.is_empty() {
                self.header.end_key = Span::point(self.header.key.clone()).end_exclusive();
            }
            let end = span.end_exclusive();
            if span.start < self.header.key {
                self.header.key = span.start;
            }
            if end > self.header.end_key {
                self.header.end_key = end;
            }
        }
        self.requests.push(request);
    }

    /// Returns true if every request in the batch is read-only.
    pub fn is_read_only(&self) -> bool {
        self.requests.iter().all(|r| r.is_read_only())
    }

    /// Returns true if the batch contains write requests.
    pub fn is_write(&self) -> bool {
        self.requests.iter().any(|r| r.is_write())
    }

    /// Returns the batch's command ID, creating one from the given physical
    /// time and a random number if absent.
    pub fn get_or_create_cmd_id(&mut self, physical_now: i64) -> CmdID {
        if self.header.cmd_id.is_empty() {
            self.header.cmd_id = CmdID { wall_time: physical_now, random: rand::random() };
        }
        self.header.cmd_id
    }
}

/// A batch response. On error the batch response is empty; errors apply to
/// the batch as a whole.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub header: ResponseHeader,
    pub responses: Vec<Response>,
}

impl crate::encoding::Value for BatchResponse {}

impl BatchResponse {
    pub fn add(&mut self, response: Response) {
        self.responses.push(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(key: &[u8], end_key: &[u8]) -> RequestHeader {
        RequestHeader { key: key.to_vec(), end_key: end_key.to_vec(), ..Default::default() }
    }

    #[test]
    fn classification_is_a_partition() {
        let requests = [
            Request::Get(GetRequest { header: Default::default() }),
            Request::Put(PutRequest::default()),
            Request::ConditionalPut(ConditionalPutRequest::default()),
            Request::Increment(IncrementRequest::default()),
            Request::Delete(DeleteRequest::default()),
            Request::DeleteRange(DeleteRangeRequest::default()),
            Request::Scan(ScanRequest::default()),
            Request::ReverseScan(ReverseScanRequest::default()),
            Request::EndTransaction(EndTransactionRequest::default()),
            Request::PushTxn(PushTxnRequest {
                header: Default::default(),
                pushee: Default::default(),
                push_type: PushTxnType::Abort,
            }),
            Request::ResolveIntent(ResolveIntentRequest::default()),
            Request::ResolveIntentRange(ResolveIntentRangeRequest::default()),
            Request::LeaderLease(LeaderLeaseRequest::default()),
            Request::AdminSplit(AdminSplitRequest::default()),
            Request::AdminMerge(AdminMergeRequest::default()),
        ];
        for request in &requests {
            let classes =
                [request.is_read_only(), request.is_write(), request.is_admin()];
            assert_eq!(
                classes.iter().filter(|c| **c).count(),
                1,
                "request {} must be in exactly one class",
                request.name()
            );
        }
    }

    #[test]
    fn inconsistent_reads_bypass_timestamp_cache() {
        let mut get = GetRequest { header: header(b"a", b"") };
        assert!(Request::Get(get.clone()).uses_timestamp_cache());
        get.header.read_consistency = ReadConsistency::Inconsistent;
        assert!(!Request::Get(get).uses_timestamp_cache());

        // Writes use the cache regardless; leases and transaction commands
        // do not.
        assert!(Request::Put(PutRequest { header: header(b"a", b""), value: vec![] })
            .uses_timestamp_cache());
        assert!(!Request::LeaderLease(LeaderLeaseRequest::default()).uses_timestamp_cache());
        assert!(!Request::EndTransaction(EndTransactionRequest::default())
            .uses_timestamp_cache());
    }

    #[test]
    fn batch_add_grows_span() {
        let mut batch = BatchRequest::new(header(b"", b""));
        batch.add(Request::Put(PutRequest { header: header(b"c", b""), value: vec![1] }));
        assert_eq!(batch.header.key, b"c".to_vec());

        batch.add(Request::Put(PutRequest { header: header(b"a", b""), value: vec![1] }));
        batch.add(Request::DeleteRange(DeleteRangeRequest { header: header(b"d", b"f") }));
        assert_eq!(batch.header.key, b"a".to_vec());
        assert_eq!(batch.header.end_key, b"f".to_vec());
    }

    #[test]
    fn batch_cmd_id_created_once() {
        let mut batch = BatchRequest::default();
        let id = batch.get_or_create_cmd_id(123);
        assert_eq!(id.wall_time, 123);
        assert!(!id.is_empty());
        assert_eq!(batch.get_or_create_cmd_id(456), id);
    }
}
