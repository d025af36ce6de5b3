//! # Haven Infrastructure
//!
//! Infrastructure implementations of core ports.
//!
//! This crate contains:
//! - The SQLCipher-backed key/value store and its connection pool
//! - The REST client for the learning platform backend
//! - Keychain storage for the database key and access token
//! - Background workers: outbox sync and reachability probing
//! - Configuration loading from the environment and config files
//!
//! ## Architecture
//! - Implements traits defined in `haven-core`
//! - Contains all "impure" code (I/O, keychain, network)

pub mod api;
pub mod auth;
pub mod config;
pub mod connectivity;
pub mod database;
pub mod errors;
pub mod http;
pub mod key_manager;
pub mod sync;

pub use api::RestApiClient;
pub use auth::{KeychainTokenStore, MemoryTokenStore};
pub use connectivity::ReachabilityProbe;
pub use database::{DbManager, SqliteKeyValueStore};
pub use errors::InfraError;
pub use http::{HttpClient, HttpClientBuilder};
pub use key_manager::KeyManager;
pub use sync::{SyncTrigger, SyncWorker, SyncWorkerConfig, WakeSignal};
