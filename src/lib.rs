#![warn(clippy::all)]
#![allow(clippy::large_enum_variant)]
#![allow(clippy::type_complexity)]

pub mod encoding;
pub mod error;
pub mod gossip;
pub mod hlc;
pub mod keys;
pub mod privilege;
pub mod rangemgr;
pub mod replica;
pub mod request;
pub mod stopper;
pub mod storage;
pub mod types;
pub mod wire;

#[cfg(test)]
pub mod testing;

pub use error::{Error, Result};
pub use replica::Replica;
