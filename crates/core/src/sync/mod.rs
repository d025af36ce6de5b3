//! Outbox sync
//!
//! Queue, retry policy and the engine that delivers queued mutations.

pub mod engine;
pub mod outbox;
pub mod ports;
pub mod retry;

pub use engine::{DrainReport, EngineSettings, OutboxEvent, OutboxSyncEngine};
pub use outbox::{EnqueueOutcome, OutboxQueue};
pub use ports::{BackgroundWake, MutationRequest, RemoteApi, WakeCallback};
pub use retry::RetryPolicy;
