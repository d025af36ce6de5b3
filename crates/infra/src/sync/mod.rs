//! Outbox delivery triggers

pub mod background;
pub mod worker;

pub use background::WakeSignal;
pub use worker::{SyncTrigger, SyncWorker, SyncWorkerConfig};
