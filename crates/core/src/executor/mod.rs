//! Request execution: network-first reads, offline-tolerant writes.

pub mod refresh;
pub mod service;

pub use refresh::RefreshWorker;
pub use service::{ReadOptions, RequestExecutor};
