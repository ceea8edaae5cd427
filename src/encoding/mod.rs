//! Binary data encodings.
//!
//! - keycode: order-preserving encoding, used for keys in the storage engine.
//! - bincode: used for values in the storage engine and for command payloads
//!   embedded in Raft proposals.

pub mod bincode;
pub mod keycode;

use crate::error::Result;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Adds automatic Bincode encode/decode methods to value types. These are
/// primarily stored in the storage engine as values, or embedded as command
/// payloads in Raft proposals.
pub trait Value: Serialize + DeserializeOwned {
    fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
    }
}

/// Adds automatic KeyCode encode/decode methods to key types. These are used
/// for keys in the storage engine, where the encoding must preserve the
/// ordering and grouping of the logical keys.
pub trait Key<'de>: Serialize + Deserialize<'de> {
    fn encode(&self) -> Result<Vec<u8>> {
        keycode::serialize(self)
    }

    fn decode(bytes: &'de [u8]) -> Result<Self> {
        keycode::deserialize(bytes)
    }
}
