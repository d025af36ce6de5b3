//! Background refresh of stale cache entries.
//!
//! Consumes [`RefreshRequest`]s produced by stale cache hits. At most one
//! refresh per key runs at a time; requests arriving while offline are
//! dropped, since the next online read fetches anyway.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use haven_domain::CacheKey;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::service::RequestExecutor;
use crate::cache::RefreshRequest;

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Background task that refetches stale cache keys, one fetch per key at a time.
pub struct RefreshWorker {
    executor: RequestExecutor,
    rx: Arc<Mutex<mpsc::Receiver<RefreshRequest>>>,
    in_flight: Arc<DashSet<CacheKey>>,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl RefreshWorker {
    pub fn new(executor: RequestExecutor, rx: mpsc::Receiver<RefreshRequest>) -> Self {
        Self {
            executor,
            rx: Arc::new(Mutex::new(rx)),
            in_flight: Arc::new(DashSet::new()),
            cancellation: CancellationToken::new(),
            task_handle: None,
        }
    }

    pub fn start(&mut self) -> Result<(), String> {
        if self.is_running() {
            return Err("Refresh worker already running".to_string());
        }
        self.cancellation = CancellationToken::new();

        let executor = self.executor.clone();
        let rx = Arc::clone(&self.rx);
        let in_flight = Arc::clone(&self.in_flight);
        let cancel = self.cancellation.clone();
        self.task_handle = Some(tokio::spawn(async move {
            Self::run(executor, rx, in_flight, cancel).await;
        }));
        info!("Refresh worker started");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), String> {
        let Some(handle) = self.task_handle.take() else {
            return Err("Refresh worker not running".to_string());
        };
        self.cancellation.cancel();
        match tokio::time::timeout(JOIN_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Refresh worker panicked: {}", e);
                return Err("Refresh worker panicked".to_string());
            }
            Err(_) => return Err("Refresh worker stop timed out".to_string()),
        }
        info!("Refresh worker stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    async fn run(
        executor: RequestExecutor,
        rx: Arc<Mutex<mpsc::Receiver<RefreshRequest>>>,
        in_flight: Arc<DashSet<CacheKey>>,
        cancel: CancellationToken,
    ) {
        let mut rx = rx.lock().await;
        loop {
            let request = tokio::select! {
                _ = cancel.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            if !in_flight.insert(request.key.clone()) {
                debug!(key = %request.key, "refresh already running");
                continue;
            }
            let executor = executor.clone();
            let in_flight = Arc::clone(&in_flight);
            tokio::spawn(async move {
                if let Err(err) = executor.refresh(&request.key).await {
                    debug!(key = %request.key, error = %err, "background refresh failed");
                }
                in_flight.remove(&request.key);
            });
        }
        debug!("Refresh worker loop exited");
    }
}

impl Drop for RefreshWorker {
    fn drop(&mut self) {
        if self.is_running() {
            self.cancellation.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use haven_domain::{Course, EntityPayload, EntityType};
    use serde_json::Map;

    use super::*;
    use crate::cache::CacheManager;
    use crate::clock::ManualClock;
    use crate::connectivity::ConnectivityMonitor;
    use crate::executor::ReadOptions;
    use crate::store::{LocalStore, MemoryKeyValueStore};
    use crate::sync::OutboxQueue;
    use crate::testing::MockRemoteApi;

    fn course(title: &str) -> EntityPayload {
        EntityPayload::Course(Course {
            id: "c1".into(),
            title: title.into(),
            description: None,
            duration: None,
            difficulty_level: None,
            is_active: true,
            extra: Map::new(),
        })
    }

    #[tokio::test]
    async fn stale_hit_is_refreshed_in_background() {
        let clock = Arc::new(ManualClock::default());
        let store = LocalStore::new(Arc::new(MemoryKeyValueStore::new()));
        let monitor = ConnectivityMonitor::new(false, Duration::ZERO, clock.clone());
        let remote = Arc::new(MockRemoteApi::new());
        let (tx, rx) = mpsc::channel(8);
        let cache = CacheManager::new(store.clone(), monitor.clone(), clock.clone(), 60_000)
            .with_refresh_sink(tx);
        let executor = RequestExecutor::new(
            remote.clone(),
            cache.clone(),
            OutboxQueue::new(store, clock.clone()),
            monitor.clone(),
            clock.clone(),
            Duration::from_secs(2),
        );
        let key = CacheKey::entity(EntityType::Course, "c1");
        cache
            .write(&key, haven_domain::EntityData::Single { item: course("old") })
            .await
            .unwrap();

        let mut worker = RefreshWorker::new(executor.clone(), rx);
        worker.start().unwrap();

        monitor.set_online(true);
        remote.insert_entity(course("new"));
        clock.advance(ChronoDuration::minutes(5));
        // Served straight from cache: the read goes through the cache
        // manager directly so only the refresher touches the network.
        let stale = cache.read(&key, 60_000).await.unwrap();
        assert!(stale.as_hit().unwrap().is_stale);

        for _ in 0..50 {
            if remote.fetch_calls() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(remote.fetch_calls(), 1);

        monitor.set_online(false);
        let fresh = executor.get_entity(EntityType::Course, "c1", ReadOptions::default()).await.unwrap();
        assert_eq!(
            fresh.into_data().unwrap(),
            haven_domain::EntityData::Single { item: course("new") }
        );

        worker.stop().await.unwrap();
    }
}
