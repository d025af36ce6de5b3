//! Local durable store: port, in-memory implementation and typed namespaces.

pub mod local;
pub mod memory;
pub mod ports;

pub use local::{LocalStore, Versioned};
pub use memory::MemoryKeyValueStore;
pub use ports::{KeyValueStore, KvOp, Precondition, Txn};
