//! # Haven Core
//!
//! Offline-first sync logic - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces (traits) for storage, the REST backend and token storage
//! - Connectivity monitoring with debounced transitions
//! - The TTL cache, the durable outbox and the sync engine that drains it
//! - The request executor that routes reads and writes by connectivity
//! - Offline credential verification
//!
//! ## Architecture Principles
//! - Only depends on `haven-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits

pub mod auth;
pub mod cache;
pub mod clock;
pub mod connectivity;
pub mod executor;
pub mod store;
pub mod sync;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use auth::{CredentialVault, TokenStore};
pub use cache::{CacheManager, RefreshRequest};
pub use clock::{Clock, ManualClock, SystemClock};
pub use connectivity::{ConnectivityMonitor, ListenerId};
pub use executor::{ReadOptions, RefreshWorker, RequestExecutor};
pub use store::{KeyValueStore, LocalStore, MemoryKeyValueStore, Txn};
pub use sync::{
    BackgroundWake, DrainReport, EngineSettings, EnqueueOutcome, MutationRequest, OutboxEvent,
    OutboxQueue, OutboxSyncEngine, RemoteApi, RetryPolicy, WakeCallback,
};
