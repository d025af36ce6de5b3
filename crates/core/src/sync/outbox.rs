//! Append-only outbox queue.
//!
//! Callers may enqueue and inspect. Status changes are crate-private and only
//! the sync engine performs them.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use haven_domain::{HavenError, MutationKind, MutationPayload, OutboxItem, OutboxStatus, Result};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::store::{LocalStore, Versioned};

/// Bound on reissues when a key is taken, so a corrupt index cannot spin.
const MAX_KEY_COLLISIONS: usize = 64;

/// Result of putting an item in the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueOutcome {
    pub item: OutboxItem,
    /// The idempotency key was already queued; `item` is the existing entry.
    pub deduplicated: bool,
}

/// Durable queue of mutations awaiting delivery.
///
/// Clones share the store and the creation-time watermark, so every item
/// minted through any clone gets a distinct creation instant and therefore a
/// distinct idempotency key.
#[derive(Clone)]
pub struct OutboxQueue {
    store: LocalStore,
    clock: Arc<dyn Clock>,
    last_created: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl OutboxQueue {
    pub fn new(store: LocalStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock, last_created: Arc::new(Mutex::new(None)) }
    }

    /// Build a pending item stamped strictly after every item minted before.
    ///
    /// Two user actions in the same millisecond still get separate keys.
    pub fn mint(
        &self,
        kind: MutationKind,
        target_entity_id: &str,
        payload: MutationPayload,
    ) -> OutboxItem {
        let created_at = self.next_created_at(self.clock.now());
        OutboxItem::new(kind, target_entity_id, payload, created_at, 0)
    }

    fn next_created_at(&self, candidate: DateTime<Utc>) -> DateTime<Utc> {
        let mut last = self.last_created.lock();
        let created_at = match *last {
            Some(previous) if candidate <= previous => previous + Duration::milliseconds(1),
            _ => candidate,
        };
        *last = Some(created_at);
        created_at
    }

    /// Queue a mutation built now.
    pub async fn enqueue_new(
        &self,
        kind: MutationKind,
        target_entity_id: &str,
        payload: MutationPayload,
    ) -> Result<EnqueueOutcome> {
        let item = self.mint(kind, target_entity_id, payload);
        self.enqueue(item).await
    }

    /// Persist a prepared item (id and idempotency key already assigned).
    ///
    /// The sequence number is allocated here. Re-enqueueing the same
    /// mutation under a key that is already present is a no-op returning the
    /// existing item. A different mutation that collides on the key is moved
    /// to a later instant and stored under a fresh key.
    pub async fn enqueue(&self, item: OutboxItem) -> Result<EnqueueOutcome> {
        self.store_item(item, true).await
    }

    async fn store_item(&self, mut item: OutboxItem, dedupe: bool) -> Result<EnqueueOutcome> {
        if item.status != OutboxStatus::Pending {
            return Err(HavenError::Internal(format!(
                "cannot enqueue item {} in status {}",
                item.id, item.status
            )));
        }
        item.payload.validate_for(item.kind, &item.target_entity_id)?;

        for _ in 0..MAX_KEY_COLLISIONS {
            if let Some(existing) = self.find_by_key(&item.idempotency_key).await? {
                if dedupe && existing.same_mutation(&item) {
                    debug!(item_id = %existing.id, "duplicate enqueue ignored");
                    return Ok(EnqueueOutcome { item: existing, deduplicated: true });
                }
                let created_at =
                    self.next_created_at(item.created_at + Duration::milliseconds(1));
                debug!(
                    item_id = %item.id,
                    existing = %existing.id,
                    "idempotency key taken by another mutation, reissuing"
                );
                item.reissue_at(created_at);
                continue;
            }

            item.sequence = self.store.next_sequence().await?;
            if self.store.outbox_insert(&item).await? {
                info!(
                    item_id = %item.id,
                    kind = %item.kind,
                    sequence = item.sequence,
                    "mutation enqueued"
                );
                return Ok(EnqueueOutcome { item, deduplicated: false });
            }
            if let Some(stored) = self.get(&item.id).await? {
                // Same item already stored, possibly under a reissued key.
                if dedupe && stored.same_mutation(&item) {
                    return Ok(EnqueueOutcome { item: stored, deduplicated: true });
                }
                return Err(HavenError::Internal(format!(
                    "outbox item id {} already holds another mutation",
                    item.id
                )));
            }
            // Lost a race with a concurrent insert; look at the key again.
        }

        Err(HavenError::Internal(format!(
            "could not find a free idempotency key for outbox item {}",
            item.id
        )))
    }

    async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<OutboxItem>> {
        match self.store.outbox_id_for_key(idempotency_key).await? {
            Some(id) => self.get(&id).await,
            None => Ok(None),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<OutboxItem>> {
        Ok(self.store.outbox_get(id).await?.map(|v| v.value))
    }

    /// Every item, in enqueue order.
    pub async fn list(&self) -> Result<Vec<OutboxItem>> {
        Ok(self.snapshot().await?.into_iter().map(|v| v.value).collect())
    }

    pub async fn with_status(&self, status: OutboxStatus) -> Result<Vec<OutboxItem>> {
        Ok(self.list().await?.into_iter().filter(|item| item.status == status).collect())
    }

    /// Dead-lettered items awaiting manual attention.
    pub async fn failed_items(&self) -> Result<Vec<OutboxItem>> {
        self.with_status(OutboxStatus::Failed).await
    }

    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.list().await?.iter().filter(|item| !item.status.is_terminal()).count())
    }

    /// Queue a fresh copy of a failed item. The failed item stays terminal.
    pub async fn resubmit(&self, failed_id: &str) -> Result<EnqueueOutcome> {
        let failed = self
            .get(failed_id)
            .await?
            .ok_or_else(|| HavenError::NotFound(format!("outbox item {failed_id}")))?;
        if failed.status != OutboxStatus::Failed {
            return Err(HavenError::InvalidPayload(format!(
                "only failed items can be resubmitted; {failed_id} is {}",
                failed.status
            )));
        }
        let copy = self.mint(failed.kind, &failed.target_entity_id, failed.payload);
        self.store_item(copy, false).await
    }

    pub(crate) async fn snapshot(&self) -> Result<Vec<Versioned<OutboxItem>>> {
        self.store.outbox_scan().await
    }

    /// Move `current` to `next`, enforcing the status state machine. Returns
    /// `None` if another context changed the item first.
    pub(crate) async fn transition(
        &self,
        current: &Versioned<OutboxItem>,
        next: OutboxItem,
    ) -> Result<Option<Versioned<OutboxItem>>> {
        let from = current.value.status;
        if from != next.status && !from.can_transition_to(next.status) {
            return Err(HavenError::Internal(format!(
                "illegal outbox transition {from} -> {} for {}",
                next.status, current.value.id
            )));
        }
        self.store.outbox_replace(current, next).await
    }

    pub(crate) async fn remove(&self, current: &Versioned<OutboxItem>) -> Result<bool> {
        self.store.outbox_remove(current).await
    }
}
