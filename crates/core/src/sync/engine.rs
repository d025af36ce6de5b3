//! Outbox sync engine.
//!
//! The only writer of outbox item status. A drain pass groups non-terminal
//! items by kind; each kind is delivered strictly in enqueue order while the
//! kinds run concurrently, so one stuck kind never holds up another.
//!
//! Per item:
//! `Pending --claim--> InFlight --2xx--> Synced`,
//! `InFlight --4xx--> Failed`,
//! `InFlight --5xx/timeout/network--> Pending` (backoff) or `Failed` once the
//! attempt budget is spent.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use haven_domain::{
    HavenError, MutationKind, OutboxItem, OutboxStatus, Result, OUTBOX_EVENT_CAPACITY,
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};

use super::outbox::OutboxQueue;
use super::ports::{MutationRequest, RemoteApi};
use super::retry::RetryPolicy;
use crate::cache::CacheManager;
use crate::clock::Clock;
use crate::connectivity::ConnectivityMonitor;
use crate::store::Versioned;

/// Broadcast whenever the engine changes an item's status.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboxEvent {
    StatusChanged {
        item_id: String,
        kind: MutationKind,
        from: OutboxStatus,
        to: OutboxStatus,
        attempts: u32,
    },
    /// Terminal failure that needs manual attention.
    Failed { item_id: String, kind: MutationKind, error: HavenError },
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub synced: usize,
    pub failed: usize,
    pub retried: usize,
    pub recovered: usize,
    pub skipped_offline: bool,
    /// Earliest scheduled retry still pending after the pass.
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl DrainReport {
    fn merge(&mut self, lane: LaneReport) {
        self.synced += lane.synced;
        self.failed += lane.failed;
        self.retried += lane.retried;
    }
}

#[derive(Debug, Default)]
struct LaneReport {
    synced: usize,
    failed: usize,
    retried: usize,
}

enum Delivery {
    Synced,
    Failed,
    Retrying,
    /// Another context changed the item under us.
    Lost,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub policy: RetryPolicy,
    pub request_timeout: Duration,
    pub inflight_lease: chrono::Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let sync = haven_domain::SyncConfig::default();
        Self {
            policy: RetryPolicy::from_config(&sync),
            request_timeout: Duration::from_millis(haven_domain::DEFAULT_REQUEST_TIMEOUT_MS),
            inflight_lease: chrono::Duration::seconds(
                i64::try_from(sync.inflight_lease_secs).unwrap_or(i64::MAX),
            ),
        }
    }
}

/// Drains the outbox against the server.
///
/// Items are grouped into one lane per [`MutationKind`]. Each lane is strict
/// FIFO and lanes run concurrently. A drain holds an internal lock, so two
/// drains never interleave on the same queue.
pub struct OutboxSyncEngine {
    queue: OutboxQueue,
    remote: Arc<dyn RemoteApi>,
    cache: CacheManager,
    monitor: ConnectivityMonitor,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    drain_lock: Mutex<()>,
    events: broadcast::Sender<OutboxEvent>,
}

impl OutboxSyncEngine {
    /// `queue` and `cache` must share a store with the request executor so
    /// that online writes and background drains see the same outbox.
    pub fn new(
        queue: OutboxQueue,
        remote: Arc<dyn RemoteApi>,
        cache: CacheManager,
        monitor: ConnectivityMonitor,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let (events, _rx) = broadcast::channel(OUTBOX_EVENT_CAPACITY);
        Self { queue, remote, cache, monitor, clock, settings, drain_lock: Mutex::new(()), events }
    }

    pub fn queue(&self) -> &OutboxQueue {
        &self.queue
    }

    /// Status changes and dead-letter notices. Slow receivers lose the oldest.
    pub fn subscribe(&self) -> broadcast::Receiver<OutboxEvent> {
        self.events.subscribe()
    }

    /// Deliver everything that is due. Passes are serialized; a pass while
    /// offline does nothing.
    #[instrument(skip(self))]
    pub async fn drain(&self) -> Result<DrainReport> {
        let _guard = self.drain_lock.lock().await;

        if !self.monitor.is_online() {
            debug!("offline, skipping outbox drain");
            return Ok(DrainReport {
                skipped_offline: true,
                next_retry_at: self.next_retry_at().await?,
                ..DrainReport::default()
            });
        }

        let mut report =
            DrainReport { recovered: self.recover_expired_leases().await?, ..DrainReport::default() };

        let mut lanes: BTreeMap<MutationKind, Vec<Versioned<OutboxItem>>> = BTreeMap::new();
        for item in self.queue.snapshot().await? {
            if !item.value.status.is_terminal() {
                lanes.entry(item.value.kind).or_default().push(item);
            }
        }

        let results = join_all(lanes.into_values().map(|lane| self.drain_lane(lane))).await;
        for lane in results {
            report.merge(lane?);
        }

        report.next_retry_at = self.next_retry_at().await?;
        if report.synced + report.failed + report.retried > 0 {
            info!(
                synced = report.synced,
                failed = report.failed,
                retried = report.retried,
                "outbox drain complete"
            );
        }
        Ok(report)
    }

    /// Strict FIFO over one kind: stop at the first item that is not done.
    async fn drain_lane(&self, lane: Vec<Versioned<OutboxItem>>) -> Result<LaneReport> {
        let mut report = LaneReport::default();
        for current in lane {
            if !self.monitor.is_online() {
                break;
            }
            if current.value.status == OutboxStatus::InFlight {
                // Claimed by another context with a live lease.
                break;
            }
            if !current.value.is_due(self.clock.now()) {
                break;
            }
            match self.deliver(current).await? {
                Delivery::Synced => report.synced += 1,
                Delivery::Failed => report.failed += 1,
                Delivery::Retrying => {
                    report.retried += 1;
                    break;
                }
                Delivery::Lost => break,
            }
        }
        Ok(report)
    }

    async fn deliver(&self, current: Versioned<OutboxItem>) -> Result<Delivery> {
        let now = self.clock.now();
        let mut claim = current.value.clone();
        claim.status = OutboxStatus::InFlight;
        claim.claimed_at = Some(now);
        claim.updated_at = now;

        let Some(claimed) = self.queue.transition(&current, claim).await? else {
            debug!(item_id = %current.value.id, "claim lost to another context");
            return Ok(Delivery::Lost);
        };
        self.emit_status(&claimed.value, OutboxStatus::Pending);

        let request = MutationRequest::from(&claimed.value);
        let result =
            match tokio::time::timeout(self.settings.request_timeout, self.remote.submit_mutation(&request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(HavenError::ServerUnavailable {
                    status: None,
                    message: format!("no response within {:?}", self.settings.request_timeout),
                }),
            };

        let mut next = claimed.value.clone();
        next.claimed_at = None;
        next.updated_at = self.clock.now();

        let outcome = match result {
            Ok(receipt) => {
                next.status = OutboxStatus::Synced;
                next.next_attempt_at = None;
                info!(item_id = %next.id, kind = %next.kind, status = receipt.status, "outbox item synced");
                Delivery::Synced
            }
            Err(err) if err.is_rejection() || matches!(err, HavenError::InvalidPayload(_)) => {
                next.attempts += 1;
                next.status = OutboxStatus::Failed;
                next.last_error = Some(err.to_string());
                warn!(item_id = %next.id, kind = %next.kind, error = %err, "outbox item rejected");
                self.emit(OutboxEvent::Failed { item_id: next.id.clone(), kind: next.kind, error: err });
                Delivery::Failed
            }
            Err(err) => {
                next.attempts += 1;
                next.last_error = Some(err.to_string());
                if self.settings.policy.should_retry(next.attempts) {
                    let delay = self.settings.policy.delay_for(next.attempts);
                    next.status = OutboxStatus::Pending;
                    next.next_attempt_at = Some(next.updated_at + delay);
                    debug!(
                        item_id = %next.id,
                        attempts = next.attempts,
                        delay_ms = delay.num_milliseconds(),
                        error = %err,
                        "outbox delivery failed, retry scheduled"
                    );
                    Delivery::Retrying
                } else {
                    let exhausted = HavenError::OutboxExhausted {
                        item_id: next.id.clone(),
                        attempts: next.attempts,
                        last_error: err.to_string(),
                    };
                    next.status = OutboxStatus::Failed;
                    next.next_attempt_at = None;
                    next.last_error = Some(exhausted.to_string());
                    warn!(item_id = %next.id, attempts = next.attempts, "outbox item exhausted retries");
                    self.emit(OutboxEvent::Failed {
                        item_id: next.id.clone(),
                        kind: next.kind,
                        error: exhausted,
                    });
                    Delivery::Failed
                }
            }
        };

        let synced = next.status == OutboxStatus::Synced;
        let affected = next.kind.affected_keys(&next.target_entity_id);
        match self.queue.transition(&claimed, next).await? {
            Some(done) => self.emit_status(&done.value, OutboxStatus::InFlight),
            None => {
                warn!(item_id = %claimed.value.id, "in-flight item changed before its result was recorded");
                return Ok(Delivery::Lost);
            }
        }

        if synced {
            if let Err(err) = self.cache.invalidate_all(&affected).await {
                warn!(error = %err, "failed to invalidate cache after sync");
            }
        }
        Ok(outcome)
    }

    /// Return abandoned `InFlight` items (a crash or kill mid-delivery) to
    /// `Pending`, counting the interrupted delivery as a failed attempt.
    async fn recover_expired_leases(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut recovered = 0;
        for current in self.queue.snapshot().await? {
            let item = &current.value;
            let expired = item.status == OutboxStatus::InFlight
                && item.claimed_at.map_or(true, |at| at + self.settings.inflight_lease <= now);
            if !expired {
                continue;
            }

            let mut next = item.clone();
            next.attempts += 1;
            next.claimed_at = None;
            next.updated_at = now;
            next.last_error = Some("delivery interrupted before a response was recorded".into());
            if self.settings.policy.should_retry(next.attempts) {
                next.status = OutboxStatus::Pending;
                next.next_attempt_at = None;
            } else {
                next.status = OutboxStatus::Failed;
                next.last_error = Some(
                    HavenError::OutboxExhausted {
                        item_id: next.id.clone(),
                        attempts: next.attempts,
                        last_error: "delivery interrupted".into(),
                    }
                    .to_string(),
                );
            }
            if let Some(done) = self.queue.transition(&current, next).await? {
                warn!(item_id = %done.value.id, status = %done.value.status, "recovered expired in-flight lease");
                self.emit_status(&done.value, OutboxStatus::InFlight);
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    /// Earliest `next_attempt_at` among pending items.
    pub async fn next_retry_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .queue
            .snapshot()
            .await?
            .into_iter()
            .filter(|v| v.value.status == OutboxStatus::Pending)
            .filter_map(|v| v.value.next_attempt_at)
            .min())
    }

    /// Delete synced items last updated more than `older_than` ago.
    pub async fn purge_synced(&self, older_than: chrono::Duration) -> Result<usize> {
        let _guard = self.drain_lock.lock().await;
        let cutoff = self.clock.now() - older_than;
        let mut purged = 0;
        for current in self.queue.snapshot().await? {
            if current.value.status == OutboxStatus::Synced
                && current.value.updated_at < cutoff
                && self.queue.remove(&current).await?
            {
                purged += 1;
            }
        }
        if purged > 0 {
            info!(purged, "purged synced outbox items");
        }
        Ok(purged)
    }

    fn emit_status(&self, item: &OutboxItem, from: OutboxStatus) {
        self.emit(OutboxEvent::StatusChanged {
            item_id: item.id.clone(),
            kind: item.kind,
            from,
            to: item.status,
            attempts: item.attempts,
        });
    }

    fn emit(&self, event: OutboxEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
