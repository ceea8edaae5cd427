//! Protobuf wire formats shared with the consensus transport and the storage
//! engine's merge operator. These formats are long-lived on disk and on the
//! wire, so their field numbers and types are fixed; application payloads
//! (batches, descriptors) are embedded as length-delimited bytes holding the
//! crate's value encoding.

use crate::encoding::Value as _;
use crate::error::Result;
use crate::request::BatchRequest;
use crate::types::{RangeDescriptor, RangeID, RaftNodeID};

use prost::Message as _;

/// The initial consensus log index of a bootstrapped range. Membership is
/// bootstrapped by synthesizing a snapshot as if a log prefix had already
/// been truncated, so the log begins at an index greater than one.
pub const RAFT_INITIAL_LOG_INDEX: u64 = 10;
/// The term of the notional truncated log prefix.
pub const RAFT_INITIAL_LOG_TERM: u64 = 5;

/// Value tags for values created internally. Stored in the tag field of
/// values so the storage engine's merge operator can apply specialized
/// semantics.
#[derive(Clone, Copy, Debug, Eq, PartialEq, prost::Enumeration)]
#[repr(i32)]
pub enum InternalValueType {
    /// The value contains InternalTimeSeriesData.
    TimeSeries = 1,
}

/// A command proposed to the consensus log, carrying the batch to apply and
/// the node it originated on.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RaftCommand {
    #[prost(uint64, tag = "1")]
    pub range_id: RangeID,
    #[prost(uint64, tag = "2")]
    pub origin_node_id: RaftNodeID,
    /// The encoded BatchRequest.
    #[prost(bytes = "vec", tag = "3")]
    pub cmd: Vec<u8>,
}

impl RaftCommand {
    /// Creates a command for the given batch.
    pub fn new(range_id: RangeID, origin_node_id: RaftNodeID, batch: &BatchRequest) -> Result<Self> {
        Ok(RaftCommand { range_id, origin_node_id, cmd: batch.encode()? })
    }

    /// Decodes the embedded batch.
    pub fn batch(&self) -> Result<BatchRequest> {
        BatchRequest::decode(&self.cmd)
    }

    /// Encodes the command to wire bytes.
    pub fn marshal(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Decodes a command from wire bytes.
    pub fn unmarshal(bytes: &[u8]) -> Result<Self> {
        Ok(Self::decode(bytes)?)
    }
}

/// A collection of data samples for some measurable value, where each sample
/// aggregates measurements over a uniform time interval. The measured
/// variable is identified by the key the value is stored under, not by the
/// payload.
#[derive(Clone, PartialEq, prost::Message)]
pub struct InternalTimeSeriesData {
    /// Wall time of the earliest possible sample, in nanoseconds since the
    /// Unix epoch.
    #[prost(int64, tag = "1")]
    pub start_timestamp_nanos: i64,
    /// The duration of each sample interval, in nanoseconds.
    #[prost(int64, tag = "2")]
    pub sample_duration_nanos: i64,
    #[prost(message, repeated, tag = "3")]
    pub samples: Vec<InternalTimeSeriesSample>,
}

/// Aggregated measurements of a variable within one sample interval, offset
/// from the collection's start timestamp by a whole number of intervals.
#[derive(Clone, PartialEq, prost::Message)]
pub struct InternalTimeSeriesSample {
    /// Interval offset from the collection's start timestamp.
    #[prost(int32, tag = "1")]
    pub offset: i32,
    /// Count of measurements in this sample. Samples with a zero count must
    /// be omitted from the collection.
    #[prost(uint32, tag = "6")]
    pub count: u32,
    /// Sum of all measurements.
    #[prost(double, tag = "7")]
    pub sum: f64,
    /// Maximum measurement. May be omitted when count == 1, in which case it
    /// equals the sum.
    #[prost(double, optional, tag = "8")]
    pub max: Option<f64>,
    /// Minimum measurement. May be omitted when count == 1, in which case it
    /// equals the sum.
    #[prost(double, optional, tag = "9")]
    pub min: Option<f64>,
}

impl InternalTimeSeriesSample {
    /// The maximum measurement, falling back to the sum for single-sample
    /// entries.
    pub fn maximum(&self) -> f64 {
        self.max.unwrap_or(self.sum)
    }

    /// The minimum measurement, falling back to the sum for single-sample
    /// entries.
    pub fn minimum(&self) -> f64 {
        self.min.unwrap_or(self.sum)
    }
}

impl InternalTimeSeriesData {
    /// Normalizes the collection: samples with a zero count are dropped, and
    /// single-measurement samples omit their redundant max/min.
    pub fn normalize(&mut self) {
        self.samples.retain(|s| s.count > 0);
        for sample in &mut self.samples {
            if sample.count == 1 {
                sample.max = None;
                sample.min = None;
            }
        }
    }
}

/// The highest log index and term that have been truncated from the head of
/// the consensus log.
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct RaftTruncatedState {
    #[prost(uint64, tag = "1")]
    pub index: u64,
    #[prost(uint64, tag = "2")]
    pub term: u64,
}

/// A snapshot of a range's full contents, used to catch up a lagging or
/// freshly added replica.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RaftSnapshotData {
    /// The encoded RangeDescriptor as of the snapshot.
    #[prost(bytes = "vec", tag = "1")]
    pub range_descriptor: Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub kv: Vec<RaftSnapshotKeyValue>,
}

/// A raw engine key/value pair within a snapshot.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RaftSnapshotKeyValue {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

impl RaftSnapshotData {
    /// Creates snapshot data for the given descriptor and key/value pairs.
    pub fn new(desc: &RangeDescriptor, kv: Vec<(Vec<u8>, Vec<u8>)>) -> Result<Self> {
        Ok(RaftSnapshotData {
            range_descriptor: desc.encode()?,
            kv: kv
                .into_iter()
                .map(|(key, value)| RaftSnapshotKeyValue { key, value })
                .collect(),
        })
    }

    /// Decodes the embedded range descriptor.
    pub fn descriptor(&self) -> Result<RangeDescriptor> {
        RangeDescriptor::decode(&self.range_descriptor)
    }
}
