//! Typed, namespaced view over a [`KeyValueStore`].

use std::sync::Arc;

use haven_domain::{
    CacheEntry, CacheKey, CredentialRecord, EntityData, HavenError, OfflineSession, OutboxItem,
    Result,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use super::ports::{KeyValueStore, Txn};

pub const CACHE_NS: &str = "cache/";
pub const OUTBOX_ITEM_NS: &str = "outbox/item/";
pub const OUTBOX_IDEM_NS: &str = "outbox/idem/";
pub const OUTBOX_SEQ_KEY: &str = "outbox/meta/seq";
pub const CREDENTIAL_NS: &str = "credential/";
pub const SESSION_KEY: &str = "session/current";

/// A decoded record together with the exact stored text, which serves as the
/// compare-and-swap token for a later update.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub raw: String,
}

#[derive(Clone)]
pub struct LocalStore {
    kv: Arc<dyn KeyValueStore>,
}

impl LocalStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    pub(crate) fn encode<T: Serialize>(value: &T) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    async fn get_versioned<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Versioned<T>>> {
        match self.kv.get(key).await? {
            Some(raw) => {
                let value = serde_json::from_str(&raw)?;
                Ok(Some(Versioned { value, raw }))
            }
            None => Ok(None),
        }
    }

    /// Decode every record under `prefix`, skipping (and logging) undecodable
    /// ones rather than failing the whole scan.
    async fn scan_versioned<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<Versioned<T>>> {
        let entries = self.kv.scan_prefix(prefix).await?;
        let mut out = Vec::with_capacity(entries.len());
        for (key, raw) in entries {
            match serde_json::from_str(&raw) {
                Ok(value) => out.push(Versioned { value, raw }),
                Err(err) => warn!(key = %key, error = %err, "skipping undecodable record"),
            }
        }
        Ok(out)
    }

    // ---- cache ----

    fn cache_key(key: &CacheKey) -> String {
        format!("{CACHE_NS}{key}")
    }

    /// Raw cache lookup. Returns `Err(Serialization)` when the stored record is
    /// corrupt so the caller can decide to treat it as a miss.
    pub async fn cache_get(&self, key: &CacheKey) -> Result<Option<CacheEntry<EntityData>>> {
        Ok(self.get_versioned(&Self::cache_key(key)).await?.map(|v| v.value))
    }

    pub async fn cache_put(&self, entry: &CacheEntry<EntityData>) -> Result<()> {
        self.kv.put(&Self::cache_key(&entry.key), Self::encode(entry)?).await
    }

    pub async fn cache_delete(&self, key: &CacheKey) -> Result<bool> {
        self.kv.delete(&Self::cache_key(key)).await
    }

    pub async fn cache_clear(&self) -> Result<usize> {
        self.kv.delete_prefix(CACHE_NS).await
    }

    // ---- outbox ----

    fn outbox_key(id: &str) -> String {
        format!("{OUTBOX_ITEM_NS}{id}")
    }

    fn idem_key(idempotency_key: &str) -> String {
        format!("{OUTBOX_IDEM_NS}{idempotency_key}")
    }

    /// Allocate the next enqueue sequence number.
    pub async fn next_sequence(&self) -> Result<u64> {
        loop {
            let current = self.kv.get(OUTBOX_SEQ_KEY).await?;
            let next = match &current {
                Some(raw) => raw
                    .parse::<u64>()
                    .map_err(|e| HavenError::Storage(format!("corrupt outbox sequence: {e}")))?
                    + 1,
                None => 1,
            };
            let txn = match &current {
                Some(raw) => Txn::new().require_equals(OUTBOX_SEQ_KEY, raw.clone()),
                None => Txn::new().require_absent(OUTBOX_SEQ_KEY),
            }
            .put(OUTBOX_SEQ_KEY, next.to_string());
            if self.kv.commit(txn).await? {
                return Ok(next);
            }
        }
    }

    /// Insert a new item and its idempotency index entry together. Returns
    /// `false` if the idempotency key is already taken.
    pub async fn outbox_insert(&self, item: &OutboxItem) -> Result<bool> {
        let txn = Txn::new()
            .require_absent(Self::idem_key(&item.idempotency_key))
            .require_absent(Self::outbox_key(&item.id))
            .put(Self::idem_key(&item.idempotency_key), item.id.clone())
            .put(Self::outbox_key(&item.id), Self::encode(item)?);
        self.kv.commit(txn).await
    }

    pub async fn outbox_id_for_key(&self, idempotency_key: &str) -> Result<Option<String>> {
        self.kv.get(&Self::idem_key(idempotency_key)).await
    }

    pub async fn outbox_get(&self, id: &str) -> Result<Option<Versioned<OutboxItem>>> {
        self.get_versioned(&Self::outbox_key(id)).await
    }

    pub async fn outbox_scan(&self) -> Result<Vec<Versioned<OutboxItem>>> {
        let mut items: Vec<Versioned<OutboxItem>> = self.scan_versioned(OUTBOX_ITEM_NS).await?;
        items.sort_by_key(|v| v.value.sequence);
        Ok(items)
    }

    /// Replace `current` with `next` only if the stored record is unchanged.
    /// Returns the new version on success.
    pub async fn outbox_replace(
        &self,
        current: &Versioned<OutboxItem>,
        next: OutboxItem,
    ) -> Result<Option<Versioned<OutboxItem>>> {
        let key = Self::outbox_key(&current.value.id);
        let raw = Self::encode(&next)?;
        if self.kv.compare_and_swap(&key, &current.raw, raw.clone()).await? {
            Ok(Some(Versioned { value: next, raw }))
        } else {
            Ok(None)
        }
    }

    /// Remove an item and its idempotency index entry if it is unchanged.
    pub async fn outbox_remove(&self, current: &Versioned<OutboxItem>) -> Result<bool> {
        let txn = Txn::new()
            .require_equals(Self::outbox_key(&current.value.id), current.raw.clone())
            .delete(Self::outbox_key(&current.value.id))
            .delete(Self::idem_key(&current.value.idempotency_key));
        self.kv.commit(txn).await
    }

    // ---- credentials & sessions ----

    fn credential_key(email: &str) -> String {
        format!("{CREDENTIAL_NS}{email}")
    }

    pub async fn credential_get(&self, email: &str) -> Result<Option<CredentialRecord>> {
        Ok(self.get_versioned(&Self::credential_key(email)).await?.map(|v| v.value))
    }

    pub async fn credential_put(&self, record: &CredentialRecord) -> Result<()> {
        self.kv.put(&Self::credential_key(&record.email), Self::encode(record)?).await
    }

    pub async fn credential_delete(&self, email: &str) -> Result<bool> {
        self.kv.delete(&Self::credential_key(email)).await
    }

    pub async fn session_get(&self) -> Result<Option<OfflineSession>> {
        Ok(self.get_versioned(SESSION_KEY).await?.map(|v| v.value))
    }

    pub async fn session_put(&self, session: &OfflineSession) -> Result<()> {
        self.kv.put(SESSION_KEY, Self::encode(session)?).await
    }

    pub async fn session_delete(&self) -> Result<bool> {
        self.kv.delete(SESSION_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use haven_domain::{CourseEnrollment, EntityType, MutationKind, MutationPayload};

    use super::*;
    use crate::store::MemoryKeyValueStore;

    fn store() -> LocalStore {
        LocalStore::new(Arc::new(MemoryKeyValueStore::new()))
    }

    fn enrollment(seq: u64) -> OutboxItem {
        OutboxItem::new(
            MutationKind::CourseEnrollment,
            format!("c{seq}"),
            MutationPayload::CourseEnrollment(CourseEnrollment {}),
            Utc::now(),
            seq,
        )
    }

    #[tokio::test]
    async fn sequence_is_monotonic() {
        let store = store();
        assert_eq!(store.next_sequence().await.unwrap(), 1);
        assert_eq!(store.next_sequence().await.unwrap(), 2);
        assert_eq!(store.next_sequence().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn outbox_insert_rejects_duplicate_idempotency_key() {
        let store = store();
        let first = enrollment(1);
        assert!(store.outbox_insert(&first).await.unwrap());

        let mut dup = enrollment(2);
        dup.idempotency_key = first.idempotency_key.clone();
        assert!(!store.outbox_insert(&dup).await.unwrap());
        assert_eq!(store.outbox_scan().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_replace_is_refused() {
        let store = store();
        let item = enrollment(1);
        store.outbox_insert(&item).await.unwrap();

        let snapshot = store.outbox_get(&item.id).await.unwrap().unwrap();
        let mut updated = snapshot.value.clone();
        updated.attempts = 1;
        assert!(store.outbox_replace(&snapshot, updated).await.unwrap().is_some());

        let mut conflicting = snapshot.value.clone();
        conflicting.attempts = 9;
        assert!(store.outbox_replace(&snapshot, conflicting).await.unwrap().is_none());
        assert_eq!(store.outbox_get(&item.id).await.unwrap().unwrap().value.attempts, 1);
    }

    #[tokio::test]
    async fn scan_orders_by_sequence() {
        let store = store();
        for seq in [3, 1, 2] {
            store.outbox_insert(&enrollment(seq)).await.unwrap();
        }
        let seqs: Vec<_> =
            store.outbox_scan().await.unwrap().into_iter().map(|v| v.value.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn cache_clear_leaves_outbox_alone() {
        let store = store();
        store.outbox_insert(&enrollment(1)).await.unwrap();
        let entry = CacheEntry::new(
            CacheKey::collection(EntityType::Course),
            EntityData::List { entity_type: EntityType::Course, items: vec![] },
            Utc::now(),
            1_000,
        );
        store.cache_put(&entry).await.unwrap();

        assert_eq!(store.cache_clear().await.unwrap(), 1);
        assert_eq!(store.outbox_scan().await.unwrap().len(), 1);
    }
}
