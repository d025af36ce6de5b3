//! # Haven
//!
//! Offline-first data sync for the learning platform client.
//!
//! This crate contains:
//! - [`SyncContext`], the entry point that wires the store, executor,
//!   outbox engine, credential vault and background workers together
//! - Logging initialisation and structured operation logging
//!
//! ## Architecture
//! - Depends on `haven-domain`, `haven-core` and `haven-infra`
//! - Wires up the hexagonal architecture
//! - Hosts call into the context; nothing here is global

pub mod context;
pub mod utils;

pub use context::{ContextParts, SyncContext};
pub use haven_core::ReadOptions;
pub use haven_domain::{Config, HavenError, Result};
pub use utils::{init_tracing, log_operation};
