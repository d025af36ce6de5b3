//! Shared fixtures for `SyncContext` integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use haven::{Config, ContextParts, SyncContext};
use haven_core::testing::MockRemoteApi;
use haven_core::{Clock, ManualClock, MemoryKeyValueStore, SystemClock};
use haven_domain::{
    Course, EntityPayload, JobApplication, MutationPayload, OutboxItem, OutboxStatus,
};
use haven_infra::{MemoryTokenStore, WakeSignal};
use serde_json::Map;

pub struct Harness {
    pub context: SyncContext,
    pub remote: Arc<MockRemoteApi>,
    pub tokens: Arc<MemoryTokenStore>,
    pub wake: Arc<WakeSignal>,
}

/// Config with the probe off, no debounce and millisecond backoff.
pub fn test_config(online: bool, background_sync: bool) -> Config {
    let mut config = Config::default();
    config.connectivity.initially_online = online;
    config.connectivity.probe_enabled = false;
    config.connectivity.debounce_ms = 0;
    config.sync.enabled = background_sync;
    config.sync.backoff_base_ms = 10;
    config.sync.backoff_max_ms = 20;
    config.sync.jitter = 0.0;
    config.api.request_timeout_ms = 500;
    config
}

pub async fn harness(config: Config) -> Harness {
    harness_with_clock(config, Arc::new(SystemClock)).await
}

pub async fn harness_with_clock(config: Config, clock: Arc<dyn Clock>) -> Harness {
    let remote = Arc::new(MockRemoteApi::new());
    let tokens = Arc::new(MemoryTokenStore::default());
    let wake = Arc::new(WakeSignal::new());
    let context = SyncContext::from_parts(
        config,
        ContextParts {
            store: Arc::new(MemoryKeyValueStore::new()),
            remote: remote.clone(),
            tokens: tokens.clone(),
            clock,
            background: Some(wake.clone()),
        },
    )
    .await
    .expect("context");
    Harness { context, remote, tokens, wake }
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::default())
}

pub fn course(id: &str, title: &str) -> EntityPayload {
    EntityPayload::Course(Course {
        id: id.into(),
        title: title.into(),
        description: None,
        duration: None,
        difficulty_level: None,
        is_active: true,
        extra: Map::new(),
    })
}

pub fn job_application() -> MutationPayload {
    MutationPayload::JobApplication(JobApplication {
        cover_letter: Some("I would like to apply.".into()),
        resume_url: None,
    })
}

/// Poll until the item reaches `status` or two seconds pass.
pub async fn wait_for_status(context: &SyncContext, id: &str, status: OutboxStatus) -> OutboxItem {
    for _ in 0..200 {
        let items = context.outbox_items().await.expect("outbox items");
        if let Some(item) = items.into_iter().find(|i| i.id == id && i.status == status) {
            return item;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("item {id} never reached {status}");
}
