//! Outbox sync worker.
//!
//! Drives [`OutboxSyncEngine::drain`] from every trigger the platform
//! offers: connectivity returning, explicit wakes (enqueue, host background
//! callbacks, `sync_now`), the earliest scheduled retry, and a slow
//! safety-net interval for anything the other triggers missed. Passes never
//! overlap; the engine serializes them.

use std::sync::Arc;
use std::time::Duration;

use haven_core::sync::{DrainReport, OutboxSyncEngine};
use haven_core::{Clock, ConnectivityMonitor};
use haven_domain::SyncConfig;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Configuration for the sync worker.
#[derive(Debug, Clone)]
pub struct SyncWorkerConfig {
    /// Upper bound between drain passes when nothing else fires
    pub safety_net_interval: Duration,
    /// Synced items older than this are purged after a pass
    pub synced_retention: chrono::Duration,
    /// Join timeout when stopping
    pub join_timeout: Duration,
}

impl Default for SyncWorkerConfig {
    fn default() -> Self {
        Self::from_sync_config(&SyncConfig::default())
    }
}

impl SyncWorkerConfig {
    pub fn from_sync_config(config: &SyncConfig) -> Self {
        let synced_retention = i64::try_from(config.synced_retention_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX);
        Self {
            safety_net_interval: Duration::from_secs(config.safety_net_interval_secs.max(1)),
            synced_retention,
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// Cloneable handle that asks the worker for an immediate pass.
#[derive(Clone, Default)]
pub struct SyncTrigger {
    notify: Arc<Notify>,
}

impl SyncTrigger {
    /// Wakes coalesce: several calls before the worker runs yield one pass.
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}

/// Background worker with explicit lifecycle management.
pub struct SyncWorker {
    engine: Arc<OutboxSyncEngine>,
    monitor: ConnectivityMonitor,
    clock: Arc<dyn Clock>,
    config: SyncWorkerConfig,
    trigger: SyncTrigger,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    /// Not started; call `start` to spawn the drain loop.
    pub fn new(
        engine: Arc<OutboxSyncEngine>,
        monitor: ConnectivityMonitor,
        clock: Arc<dyn Clock>,
        config: SyncWorkerConfig,
    ) -> Self {
        Self {
            engine,
            monitor,
            clock,
            config,
            trigger: SyncTrigger::default(),
            cancellation: CancellationToken::new(),
            task_handle: None,
        }
    }

    pub fn trigger(&self) -> SyncTrigger {
        self.trigger.clone()
    }

    /// Start the worker. The first pass runs immediately.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<(), String> {
        if self.is_running() {
            return Err("Sync worker already running".to_string());
        }
        self.cancellation = CancellationToken::new();

        let engine = Arc::clone(&self.engine);
        let monitor = self.monitor.clone();
        let clock = Arc::clone(&self.clock);
        let config = self.config.clone();
        let notify = Arc::clone(&self.trigger.notify);
        let cancel = self.cancellation.clone();

        self.task_handle = Some(tokio::spawn(async move {
            Self::run_loop(engine, monitor, clock, config, notify, cancel).await;
        }));
        info!("Sync worker started");
        Ok(())
    }

    /// Stop the worker. An interrupted pass leaves its claimed item to lease
    /// recovery on the next start.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<(), String> {
        let Some(handle) = self.task_handle.take() else {
            return Err("Sync worker not running".to_string());
        };
        self.cancellation.cancel();

        match tokio::time::timeout(self.config.join_timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Sync worker panicked: {}", e);
                return Err("Sync worker panicked".to_string());
            }
            Err(_) => {
                warn!("Sync worker did not complete within timeout");
                return Err("Sync worker stop timed out".to_string());
            }
        }
        info!("Sync worker stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    async fn run_loop(
        engine: Arc<OutboxSyncEngine>,
        monitor: ConnectivityMonitor,
        clock: Arc<dyn Clock>,
        config: SyncWorkerConfig,
        notify: Arc<Notify>,
        cancel: CancellationToken,
    ) {
        let mut connectivity = monitor.subscribe();
        let mut safety_net = tokio::time::interval(config.safety_net_interval);
        safety_net.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately and doubles as the startup pass.

        let mut next_retry: Option<Duration> = None;

        loop {
            let pending_retry = next_retry;
            let retry_sleep = async move {
                match pending_retry {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => std::future::pending().await,
                }
            };

            let reason = tokio::select! {
                _ = cancel.cancelled() => break,
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if !connectivity.borrow_and_update().online {
                        continue;
                    }
                    "connectivity restored"
                }
                _ = notify.notified() => "wake",
                _ = safety_net.tick() => "safety net",
                _ = retry_sleep => "retry due",
            };

            let report = tokio::select! {
                _ = cancel.cancelled() => break,
                report = Self::pass(&engine, &config, reason) => report,
            };
            next_retry = report.and_then(|r| r.next_retry_at).map(|at| {
                (at - clock.now()).to_std().unwrap_or(Duration::ZERO)
            });
        }
        debug!("Sync worker loop exited");
    }

    async fn pass(
        engine: &OutboxSyncEngine,
        config: &SyncWorkerConfig,
        reason: &'static str,
    ) -> Option<DrainReport> {
        debug!(reason, "outbox drain triggered");
        let report = match engine.drain().await {
            Ok(report) => report,
            Err(err) => {
                warn!(error = %err, reason, "outbox drain failed");
                return None;
            }
        };

        if !report.skipped_offline {
            if let Err(err) = engine.purge_synced(config.synced_retention).await {
                warn!(error = %err, "failed to purge synced outbox items");
            }
        }
        Some(report)
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        if self.is_running() {
            self.cancellation.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use haven_core::store::LocalStore;
    use haven_core::sync::{EngineSettings, OutboxQueue, RetryPolicy};
    use haven_core::testing::{MockRemoteApi, MockResponse};
    use haven_core::{CacheManager, MemoryKeyValueStore, SystemClock};
    use haven_domain::{CourseEnrollment, MutationKind, MutationPayload, OutboxStatus};

    use super::*;

    struct Harness {
        engine: Arc<OutboxSyncEngine>,
        remote: Arc<MockRemoteApi>,
        monitor: ConnectivityMonitor,
        worker: SyncWorker,
    }

    fn harness(online: bool, policy: RetryPolicy) -> Harness {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = LocalStore::new(Arc::new(MemoryKeyValueStore::new()));
        let remote = Arc::new(MockRemoteApi::new());
        let monitor = ConnectivityMonitor::new(online, Duration::ZERO, Arc::clone(&clock));
        let cache = CacheManager::new(store.clone(), monitor.clone(), Arc::clone(&clock), 60_000);
        let engine = Arc::new(OutboxSyncEngine::new(
            OutboxQueue::new(store, Arc::clone(&clock)),
            remote.clone(),
            cache,
            monitor.clone(),
            Arc::clone(&clock),
            EngineSettings { policy, ..EngineSettings::default() },
        ));
        let worker = SyncWorker::new(
            Arc::clone(&engine),
            monitor.clone(),
            clock,
            SyncWorkerConfig {
                safety_net_interval: Duration::from_secs(3600),
                ..SyncWorkerConfig::default()
            },
        );
        Harness { engine, remote, monitor, worker }
    }

    async fn enqueue(engine: &OutboxSyncEngine, target: &str) -> String {
        engine
            .queue()
            .enqueue_new(
                MutationKind::CourseEnrollment,
                target,
                MutationPayload::CourseEnrollment(CourseEnrollment {}),
            )
            .await
            .unwrap()
            .item
            .id
    }

    async fn wait_for_status(engine: &OutboxSyncEngine, id: &str, status: OutboxStatus) {
        for _ in 0..200 {
            if engine.queue().get(id).await.unwrap().map(|i| i.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("item {id} never reached {status}");
    }

    #[tokio::test]
    async fn connectivity_restored_drains_queue() {
        let mut h = harness(false, RetryPolicy::default());
        let id = enqueue(&h.engine, "c1").await;
        h.worker.start().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.remote.submit_calls(), 0);

        h.monitor.set_online(true);
        wait_for_status(&h.engine, &id, OutboxStatus::Synced).await;
        h.worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn wake_runs_a_pass() {
        let mut h = harness(true, RetryPolicy::default());
        h.worker.start().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let id = enqueue(&h.engine, "c1").await;
        h.worker.trigger().wake();
        wait_for_status(&h.engine, &id, OutboxStatus::Synced).await;
        h.worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn scheduled_retry_fires_without_other_triggers() {
        let policy =
            RetryPolicy { max_attempts: 3, base_delay_ms: 50, max_delay_ms: 50, jitter: 0.0 };
        let mut h = harness(true, policy);
        h.remote.script_mutations([MockResponse::Status(503)]);
        let id = enqueue(&h.engine, "c1").await;

        h.worker.start().unwrap();
        wait_for_status(&h.engine, &id, OutboxStatus::Synced).await;
        assert_eq!(h.remote.submit_calls(), 2);
        h.worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn lifecycle_is_guarded() {
        let mut h = harness(true, RetryPolicy::default());
        assert!(h.worker.stop().await.is_err());
        h.worker.start().unwrap();
        assert!(h.worker.start().is_err());
        h.worker.stop().await.unwrap();
        assert!(!h.worker.is_running());
    }
}
