use crate::hlc::Timestamp;
use crate::types::{Intent, Lease, RangeID, ReplicaDescriptor, Span};

use serde::{Deserialize, Serialize};

/// A rangedb error. Errors are part of the replicated state machine: apply
/// results (including failures) are persisted in the response cache and sent
/// across channels, so all variants serialize.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// The operation was aborted, e.g. because the node is shutting down or
    /// the caller abandoned the request.
    Abort,
    /// Another replica holds the leader lease covering the request timestamp.
    /// Carries the current leader and the requester's replica (when known)
    /// so the client can redirect. Never cached in the response cache.
    NotLeader {
        range_id: RangeID,
        replica: Option<ReplicaDescriptor>,
        leader: Option<ReplicaDescriptor>,
    },
    /// A proposed leader lease lost the race against an existing lease.
    LeaseRejected { requested: Lease, existing: Lease },
    /// The request's key span is not fully contained in the range; the
    /// client must re-route.
    RangeKeyMismatch { span: Span, range_span: Span },
    /// Another transaction's intent blocks progress. Carries the intents so
    /// the caller can trigger resolution. Resolved is set once the intents
    /// have been cleaned up and the request can be retried.
    WriteIntent { intents: Vec<Intent>, resolved: bool },
    /// A write at or below an already-written timestamp, detected by the
    /// timestamp cache or the MVCC layer.
    WriteTooOld { timestamp: Timestamp, existing: Timestamp },
    /// The replica has violated an integrity invariant (e.g. the applied
    /// index moved backwards, or a batch commit failed) and can no longer
    /// participate in writes. Wraps a chain of causes; processed is set once
    /// the error has been surfaced to the operator hook.
    Corrupt { causes: Vec<String>, processed: bool },
    /// Invalid or corrupt persisted/wire data.
    InvalidData(String),
    /// An invalid request, e.g. an incoherent batch header.
    InvalidInput(String),
    /// An internal error that should not happen in correct usage.
    Internal(String),
}

/// A rangedb result type, using the crate Error.
pub type Result<T> = std::result::Result<T, Error>;

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Abort => write!(f, "operation aborted"),
            Error::NotLeader { range_id, leader, .. } => match leader {
                Some(l) => write!(
                    f,
                    "range {} leader lease is held by node {} store {}",
                    range_id, l.node_id, l.store_id
                ),
                None => write!(f, "range {} leader lease is not held here", range_id),
            },
            Error::LeaseRejected { requested, existing } => {
                write!(f, "lease {requested} rejected, existing lease {existing}")
            }
            Error::RangeKeyMismatch { span, range_span } => {
                write!(f, "key span {span} outside of range bounds {range_span}")
            }
            Error::WriteIntent { intents, resolved } => {
                write!(f, "conflicting intents on {} keys (resolved={resolved})", intents.len())
            }
            Error::WriteTooOld { timestamp, existing } => {
                write!(f, "write at {timestamp} too old, existing write at {existing}")
            }
            Error::Corrupt { causes, processed } => {
                write!(f, "replica corruption (processed={processed}): ")?;
                match causes.split_first() {
                    Some((first, rest)) => {
                        write!(f, "{first}")?;
                        for cause in rest {
                            write!(f, " (caused by {cause})")?;
                        }
                        Ok(())
                    }
                    None => write!(f, "unknown cause"),
                }
            }
            Error::InvalidData(msg) | Error::InvalidInput(msg) | Error::Internal(msg) => {
                write!(f, "{msg}")
            }
        }
    }
}

impl Error {
    /// Creates a replica corruption error from a message and a chain of
    /// optional underlying causes, most recent first.
    pub fn corrupt(msg: impl std::fmt::Display, causes: Vec<Error>) -> Self {
        let mut chain = vec![msg.to_string()];
        chain.extend(causes.iter().map(|e| e.to_string()));
        Error::Corrupt { causes: chain, processed: false }
    }

    /// Returns true if this is a replica corruption error.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::Corrupt { .. })
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(err: prost::DecodeError) -> Self {
        Error::InvalidData(err.to_string())
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(err: std::num::TryFromIntError) -> Self {
        Error::InvalidData(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Internal(err.to_string())
    }
}

impl<T> From<crossbeam::channel::SendError<T>> for Error {
    fn from(_: crossbeam::channel::SendError<T>) -> Self {
        Error::Abort
    }
}

impl From<crossbeam::channel::RecvError> for Error {
    fn from(_: crossbeam::channel::RecvError) -> Self {
        Error::Abort
    }
}

impl serde::de::Error for Error {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Error::InvalidData(msg.to_string())
    }
}

impl serde::ser::Error for Error {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Error::InvalidData(msg.to_string())
    }
}
