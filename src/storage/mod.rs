//! Key/value storage engines, including the MVCC layer used by command
//! execution. For details, see the [`engine`] and [`mvcc`] module
//! documentation.

pub mod engine;
pub mod memory;
pub mod mvcc;

pub use engine::{Engine, ScanIterator, SharedEngine, Status, WriteBatch};
pub use memory::Memory;
