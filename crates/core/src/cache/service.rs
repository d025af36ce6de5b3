//! TTL-governed cache over the local durable store.

use std::sync::Arc;

use haven_domain::{
    CacheEntry, CacheKey, CacheRead, CachedData, DataSource, EntityData, HavenError, Result,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::connectivity::ConnectivityMonitor;
use crate::store::LocalStore;

/// Request to refetch a stale key in the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub key: CacheKey,
    pub ttl_ms: u64,
}

/// TTL-aware read-through cache over the local store.
///
/// Expired entries are still served, flagged stale. While online a stale read
/// also asks the refresh sink, if any, to refetch the key.
#[derive(Clone)]
pub struct CacheManager {
    store: LocalStore,
    monitor: ConnectivityMonitor,
    clock: Arc<dyn Clock>,
    default_ttl_ms: u64,
    refresh_tx: Option<mpsc::Sender<RefreshRequest>>,
}

impl CacheManager {
    /// `default_ttl_ms` applies to reads that do not pass their own TTL.
    pub fn new(
        store: LocalStore,
        monitor: ConnectivityMonitor,
        clock: Arc<dyn Clock>,
        default_ttl_ms: u64,
    ) -> Self {
        Self { store, monitor, clock, default_ttl_ms, refresh_tx: None }
    }

    /// Route stale-read refresh requests to `tx`.
    pub fn with_refresh_sink(mut self, tx: mpsc::Sender<RefreshRequest>) -> Self {
        self.refresh_tx = Some(tx);
        self
    }

    pub fn default_ttl_ms(&self) -> u64 {
        self.default_ttl_ms
    }

    /// Return cached data whenever present, fresh or not.
    ///
    /// A stale hit schedules a background refresh when online and never
    /// waits for it. Corrupt or mistyped records read as `Miss`.
    pub async fn read(&self, key: &CacheKey, ttl_ms: u64) -> Result<CacheRead<EntityData>> {
        let entry = match self.store.cache_get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(CacheRead::Miss),
            Err(HavenError::Serialization(err)) => {
                warn!(key = %key, error = %err, "dropping corrupt cache record");
                self.store.cache_delete(key).await?;
                return Ok(CacheRead::Miss);
            }
            Err(err) => return Err(err),
        };

        if !matches_key(key, &entry.payload) {
            warn!(
                key = %key,
                stored = %entry.payload.entity_type(),
                "cached payload does not match its key, treating as miss"
            );
            return Ok(CacheRead::Miss);
        }

        let is_stale = !entry.is_fresh(self.clock.now(), ttl_ms);
        if is_stale {
            self.schedule_refresh(key, ttl_ms);
        }

        Ok(CacheRead::Hit(CachedData {
            data: entry.payload,
            is_stale,
            fetched_at: entry.fetched_at,
            source: DataSource::Cache,
        }))
    }

    /// Replace the entry for `key` and reset its fetch time.
    pub async fn write(&self, key: &CacheKey, data: EntityData) -> Result<CacheEntry<EntityData>> {
        if !matches_key(key, &data) {
            return Err(HavenError::InvalidPayload(format!(
                "{} data cannot be cached under {key}",
                data.entity_type()
            )));
        }
        let entry = CacheEntry::new(key.clone(), data, self.clock.now(), self.default_ttl_ms);
        self.store.cache_put(&entry).await?;
        debug!(key = %key, "cache entry written");
        Ok(entry)
    }

    /// Force the next read of `key` to miss.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        let removed = self.store.cache_delete(key).await?;
        if removed {
            debug!(key = %key, "cache entry invalidated");
        }
        Ok(removed)
    }

    pub async fn invalidate_all(&self, keys: &[CacheKey]) -> Result<()> {
        for key in keys {
            self.invalidate(key).await?;
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<usize> {
        self.store.cache_clear().await
    }

    pub async fn is_available_offline(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.read_silently(key).await?.is_hit())
    }

    async fn read_silently(&self, key: &CacheKey) -> Result<CacheRead<()>> {
        Ok(match self.store.cache_get(key).await {
            Ok(Some(entry)) if matches_key(key, &entry.payload) => CacheRead::Hit(CachedData {
                data: (),
                is_stale: false,
                fetched_at: entry.fetched_at,
                source: DataSource::Cache,
            }),
            Ok(_) | Err(HavenError::Serialization(_)) => CacheRead::Miss,
            Err(err) => return Err(err),
        })
    }

    fn schedule_refresh(&self, key: &CacheKey, ttl_ms: u64) {
        if !self.monitor.is_online() {
            debug!(key = %key, "stale entry served offline, refresh deferred");
            return;
        }
        let Some(tx) = &self.refresh_tx else {
            return;
        };
        if let Err(err) = tx.try_send(RefreshRequest { key: key.clone(), ttl_ms }) {
            debug!(key = %key, error = %err, "refresh request dropped");
        }
    }
}

fn matches_key(key: &CacheKey, data: &EntityData) -> bool {
    if data.entity_type() != key.entity_type() || !data.is_consistent() {
        return false;
    }
    match (key, data) {
        (CacheKey::Entity { id, .. }, EntityData::Single { item }) => item.id() == id,
        (CacheKey::Collection { .. }, EntityData::List { .. }) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::Duration;
    use haven_domain::{Course, EntityPayload, EntityType, Job};
    use serde_json::Map;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{KeyValueStore, MemoryKeyValueStore};

    const TEN_MINUTES: u64 = 10 * 60 * 1000;

    struct Fixture {
        cache: CacheManager,
        clock: Arc<ManualClock>,
        monitor: ConnectivityMonitor,
        kv: Arc<MemoryKeyValueStore>,
        refresh_rx: mpsc::Receiver<RefreshRequest>,
    }

    fn fixture(online: bool) -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let kv = Arc::new(MemoryKeyValueStore::new());
        let monitor = ConnectivityMonitor::new(online, StdDuration::ZERO, clock.clone());
        let (tx, refresh_rx) = mpsc::channel(8);
        let cache =
            CacheManager::new(LocalStore::new(kv.clone()), monitor.clone(), clock.clone(), TEN_MINUTES)
                .with_refresh_sink(tx);
        Fixture { cache, clock, monitor, kv, refresh_rx }
    }

    fn course(id: &str) -> EntityPayload {
        EntityPayload::Course(Course {
            id: id.into(),
            title: format!("Course {id}"),
            description: None,
            duration: None,
            difficulty_level: None,
            is_active: true,
            extra: Map::new(),
        })
    }

    fn course_list() -> EntityData {
        EntityData::List { entity_type: EntityType::Course, items: vec![course("c1"), course("c2")] }
    }

    #[tokio::test]
    async fn fresh_read_returns_written_data_offline() {
        let mut fx = fixture(false);
        let key = CacheKey::collection(EntityType::Course);
        fx.cache.write(&key, course_list()).await.unwrap();

        fx.clock.advance(Duration::minutes(9));
        let CacheRead::Hit(hit) = fx.cache.read(&key, TEN_MINUTES).await.unwrap() else {
            panic!("expected hit");
        };
        assert!(!hit.is_stale);
        assert_eq!(hit.data, course_list());
        assert!(fx.refresh_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_offline_read_serves_data_without_refresh() {
        let mut fx = fixture(false);
        let key = CacheKey::collection(EntityType::Course);
        fx.cache.write(&key, course_list()).await.unwrap();

        fx.clock.advance(Duration::minutes(11));
        let hit = fx.cache.read(&key, TEN_MINUTES).await.unwrap();
        let hit = hit.as_hit().unwrap();
        assert!(hit.is_stale);
        assert!(hit.staleness_notice().is_some());
        assert!(fx.refresh_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_online_read_schedules_refresh() {
        let mut fx = fixture(true);
        let key = CacheKey::collection(EntityType::Course);
        fx.cache.write(&key, course_list()).await.unwrap();
        fx.clock.advance(Duration::minutes(11));

        assert!(fx.cache.read(&key, TEN_MINUTES).await.unwrap().is_hit());
        let request = fx.refresh_rx.try_recv().unwrap();
        assert_eq!(request.key, key);

        fx.monitor.set_online(false);
        fx.cache.read(&key, TEN_MINUTES).await.unwrap();
        assert!(fx.refresh_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalidate_forces_miss() {
        let fx = fixture(false);
        let key = CacheKey::entity(EntityType::Course, "c1");
        fx.cache.write(&key, EntityData::Single { item: course("c1") }).await.unwrap();

        assert!(fx.cache.invalidate(&key).await.unwrap());
        assert!(fx.cache.read(&key, TEN_MINUTES).await.unwrap().is_miss());
    }

    #[tokio::test]
    async fn empty_offline_read_is_miss() {
        let fx = fixture(false);
        let key = CacheKey::entity(EntityType::Job, "nope");
        assert!(fx.cache.read(&key, TEN_MINUTES).await.unwrap().is_miss());
    }

    #[tokio::test]
    async fn mistyped_write_is_rejected() {
        let fx = fixture(true);
        let key = CacheKey::entity(EntityType::Job, "c1");
        let err = fx.cache.write(&key, EntityData::Single { item: course("c1") }).await.unwrap_err();
        assert!(matches!(err, HavenError::InvalidPayload(_)));

        let job = EntityPayload::Job(Job {
            id: "j1".into(),
            title: "Welder".into(),
            description: None,
            location: None,
            job_type: None,
            salary_range: None,
            application_deadline: None,
            remote_work: false,
            extra: Map::new(),
        });
        let list_key = CacheKey::collection(EntityType::Course);
        let mixed = EntityData::List { entity_type: EntityType::Course, items: vec![course("c1"), job] };
        assert!(fx.cache.write(&list_key, mixed).await.is_err());
    }

    #[tokio::test]
    async fn corrupt_record_reads_as_miss() {
        let fx = fixture(true);
        let key = CacheKey::collection(EntityType::Course);
        fx.kv.put(&format!("cache/{key}"), "{not json".into()).await.unwrap();

        assert!(fx.cache.read(&key, TEN_MINUTES).await.unwrap().is_miss());
        assert!(fx.kv.is_empty());
    }
}
