//! Connectivity-aware request executor.
//!
//! Reads go network-first while online and fall back to the cache on any
//! failure. Writes are attempted once while online; a transport failure or
//! offline state lands them in the outbox instead of surfacing an error.
//!
//! Network work runs on a spawned task so it completes (and lands in the
//! cache or outbox) even if the caller's future is dropped.

use std::sync::Arc;
use std::time::Duration;

use haven_domain::{
    CacheKey, CacheRead, CachedData, DataSource, EntityData, EntityType, HavenError, MutationKind,
    MutationPayload, OutboxItem, Result, WriteOutcome,
};
use tracing::{debug, info, instrument, warn};

use crate::cache::CacheManager;
use crate::clock::Clock;
use crate::connectivity::ConnectivityMonitor;
use crate::sync::{MutationRequest, OutboxQueue, RemoteApi, RetryPolicy};

/// Per-call read options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Overrides the configured cache TTL.
    pub ttl_ms: Option<u64>,
}

/// Routes reads and writes between the server, the cache and the outbox
/// according to connectivity.
#[derive(Clone)]
pub struct RequestExecutor {
    remote: Arc<dyn RemoteApi>,
    cache: CacheManager,
    outbox: OutboxQueue,
    monitor: ConnectivityMonitor,
    clock: Arc<dyn Clock>,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl RequestExecutor {
    /// `outbox` should share its store with the sync engine's queue.
    /// Uses the default retry policy until [`Self::with_retry_policy`].
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        cache: CacheManager,
        outbox: OutboxQueue,
        monitor: ConnectivityMonitor,
        clock: Arc<dyn Clock>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            remote,
            cache,
            outbox,
            monitor,
            clock,
            request_timeout,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Policy that schedules the first background retry of a write whose
    /// online attempt failed.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    #[instrument(skip(self))]
    pub async fn get_entity(
        &self,
        entity_type: EntityType,
        id: &str,
        options: ReadOptions,
    ) -> Result<CacheRead<EntityData>> {
        if id.trim().is_empty() {
            return Err(HavenError::InvalidPayload(format!("{entity_type} id must not be empty")));
        }
        self.read(CacheKey::entity(entity_type, id), options).await
    }

    #[instrument(skip(self))]
    pub async fn list_entities(
        &self,
        entity_type: EntityType,
        options: ReadOptions,
    ) -> Result<CacheRead<EntityData>> {
        if !entity_type.supports_listing() {
            return Err(HavenError::InvalidPayload(format!("{entity_type} cannot be listed")));
        }
        self.read(CacheKey::collection(entity_type), options).await
    }

    async fn read(&self, key: CacheKey, options: ReadOptions) -> Result<CacheRead<EntityData>> {
        let ttl_ms = options.ttl_ms.unwrap_or_else(|| self.cache.default_ttl_ms());

        if !self.monitor.is_online() {
            debug!(key = %key, "offline, reading from cache");
            return self.cache.read(&key, ttl_ms).await;
        }

        let this = self.clone();
        let task_key = key.clone();
        let fetched = tokio::spawn(async move { this.fetch_and_store(&task_key).await })
            .await
            .unwrap_or_else(|err| Err(HavenError::Internal(format!("fetch task failed: {err}"))));

        match fetched {
            Ok(data) => Ok(CacheRead::Hit(CachedData {
                data,
                is_stale: false,
                fetched_at: self.clock.now(),
                source: DataSource::Network,
            })),
            Err(err) => {
                debug!(key = %key, error = %err, "network read failed, falling back to cache");
                let cached = self.cache.read(&key, ttl_ms).await?;
                if cached.is_miss() && err.is_rejection() {
                    return Err(err);
                }
                Ok(cached)
            }
        }
    }

    /// Fetch `key` from the server and write it through to the cache.
    pub async fn fetch_and_store(&self, key: &CacheKey) -> Result<EntityData> {
        let call = async {
            match key {
                CacheKey::Entity { entity_type, id } => {
                    let item = self.remote.fetch_entity(*entity_type, id).await?;
                    Ok(EntityData::Single { item })
                }
                CacheKey::Collection { entity_type } => {
                    let items = self.remote.list_entities(*entity_type).await?;
                    Ok(EntityData::List { entity_type: *entity_type, items })
                }
            }
        };
        let data = self.with_timeout(call).await.inspect_err(|err| self.observe_failure(err))?;

        if let Err(err) = self.cache.write(key, data.clone()).await {
            warn!(key = %key, error = %err, "fetched data not cached");
        }
        Ok(data)
    }

    /// Refetch a stale key; used by the background refresher.
    pub async fn refresh(&self, key: &CacheKey) -> Result<()> {
        if !self.monitor.is_online() {
            return Ok(());
        }
        self.fetch_and_store(key).await.map(|_| ())
    }

    /// Submit a mutation.
    ///
    /// Returns `Synced` when the server accepted it now, `AcceptedOffline`
    /// when it was queued. Server rejections and invalid payloads are errors;
    /// transport failures never are.
    #[instrument(skip(self, payload))]
    pub async fn submit_mutation(
        &self,
        kind: MutationKind,
        target_entity_id: &str,
        payload: MutationPayload,
    ) -> Result<WriteOutcome> {
        payload.validate_for(kind, target_entity_id)?;
        let item = self.outbox.mint(kind, target_entity_id, payload);

        if !self.monitor.is_online() {
            debug!(%kind, "offline, queueing mutation");
            return self.enqueue(item).await;
        }
        if self.has_queued(kind).await? {
            // Earlier writes of this kind are still queued; keep them in order.
            debug!(%kind, "earlier mutations of this kind queued, queueing behind them");
            return self.enqueue(item).await;
        }

        let this = self.clone();
        tokio::spawn(async move { this.attempt_online(item).await })
            .await
            .unwrap_or_else(|err| Err(HavenError::Internal(format!("submit task failed: {err}"))))
    }

    async fn attempt_online(&self, mut item: OutboxItem) -> Result<WriteOutcome> {
        let request = MutationRequest::from(&item);
        match self.with_timeout(self.remote.submit_mutation(&request)).await {
            Ok(receipt) => {
                info!(kind = %item.kind, target = %item.target_entity_id, "mutation synced");
                if let Err(err) =
                    self.cache.invalidate_all(&item.kind.affected_keys(&item.target_entity_id)).await
                {
                    warn!(error = %err, "failed to invalidate cache after mutation");
                }
                Ok(WriteOutcome::Synced { receipt })
            }
            Err(err) if err.is_rejection() || matches!(err, HavenError::InvalidPayload(_)) => {
                warn!(kind = %item.kind, error = %err, "mutation rejected");
                Err(err)
            }
            Err(err) => {
                self.observe_failure(&err);
                // The online try does not count as an attempt, but the server
                // just failed, so the first background retry waits.
                let retry_at = self.clock.now() + self.retry_policy.delay_for(1);
                item.next_attempt_at = Some(retry_at);
                info!(
                    kind = %item.kind,
                    error = %err,
                    retry_at = %retry_at,
                    "mutation not delivered, queueing"
                );
                self.enqueue(item).await
            }
        }
    }

    async fn enqueue(&self, item: OutboxItem) -> Result<WriteOutcome> {
        let outcome = self.outbox.enqueue(item).await?;
        Ok(WriteOutcome::AcceptedOffline {
            item_id: outcome.item.id,
            idempotency_key: outcome.item.idempotency_key,
        })
    }

    async fn has_queued(&self, kind: MutationKind) -> Result<bool> {
        Ok(self
            .outbox
            .list()
            .await?
            .iter()
            .any(|item| item.kind == kind && !item.status.is_terminal()))
    }

    async fn with_timeout<T>(&self, call: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(HavenError::ServerUnavailable {
                status: None,
                message: format!("no response within {:?}", self.request_timeout),
            }),
        }
    }

    fn observe_failure(&self, err: &HavenError) {
        if matches!(err, HavenError::NetworkUnavailable(_)) {
            self.monitor.report(false);
        }
    }
}
