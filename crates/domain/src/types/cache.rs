//! Cache keys, entries and read results.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::entity::EntityType;
use crate::errors::HavenError;

/// Structured cache key.
///
/// Rendered as `entity:<type>:<id>` or `list:<type>`; the rendered form is
/// the storage key suffix under the cache namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheKey {
    Entity { entity_type: EntityType, id: String },
    Collection { entity_type: EntityType },
}

impl CacheKey {
    pub fn entity(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self::Entity { entity_type, id: id.into() }
    }

    pub fn collection(entity_type: EntityType) -> Self {
        Self::Collection { entity_type }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Entity { entity_type, .. } | Self::Collection { entity_type } => *entity_type,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity { entity_type, id } => write!(f, "entity:{entity_type}:{id}"),
            Self::Collection { entity_type } => write!(f, "list:{entity_type}"),
        }
    }
}

impl FromStr for CacheKey {
    type Err = HavenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || HavenError::InvalidPayload(format!("invalid cache key: {s}"));
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("entity"), Some(kind), Some(id)) if !id.is_empty() => {
                let entity_type = kind.parse::<EntityType>().map_err(|_| invalid())?;
                Ok(Self::entity(entity_type, id))
            }
            (Some("list"), Some(kind), None) => {
                let entity_type = kind.parse::<EntityType>().map_err(|_| invalid())?;
                Ok(Self::collection(entity_type))
            }
            _ => Err(invalid()),
        }
    }
}

/// Cached payload plus freshness metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: CacheKey,
    pub payload: T,
    pub fetched_at: DateTime<Utc>,
    pub ttl_ms: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(key: CacheKey, payload: T, fetched_at: DateTime<Utc>, ttl_ms: u64) -> Self {
        Self { key, payload, fetched_at, ttl_ms }
    }

    /// Fresh iff `now - fetched_at < ttl`.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl_ms: u64) -> bool {
        let ttl = Duration::milliseconds(i64::try_from(ttl_ms).unwrap_or(i64::MAX));
        now.signed_duration_since(self.fetched_at) < ttl
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.fetched_at)
    }
}

/// Where the data in a read result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Network,
    Cache,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub is_stale: bool,
    pub fetched_at: DateTime<Utc>,
    pub source: DataSource,
}

impl<T> CachedData<T> {
    /// Banner text for stale cache reads.
    pub fn staleness_notice(&self) -> Option<String> {
        (self.is_stale && self.source == DataSource::Cache).then(|| {
            format!(
                "Offline, showing cached data from {}",
                self.fetched_at.format("%Y-%m-%d %H:%M UTC")
            )
        })
    }
}

/// Result of a cache or executor read. `Miss` is a normal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CacheRead<T> {
    Hit(CachedData<T>),
    Miss,
}

impl<T> CacheRead<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Self::Hit(hit) => Some(hit.data),
            Self::Miss => None,
        }
    }

    pub fn as_hit(&self) -> Option<&CachedData<T>> {
        match self {
            Self::Hit(hit) => Some(hit),
            Self::Miss => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display_and_parse() {
        let key = CacheKey::entity(EntityType::Course, "c:1");
        assert_eq!(key.to_string(), "entity:course:c:1");
        assert_eq!("entity:course:c:1".parse::<CacheKey>().unwrap(), key);

        let list = CacheKey::collection(EntityType::Job);
        assert_eq!(list.to_string(), "list:job");
        assert_eq!("list:job".parse::<CacheKey>().unwrap(), list);

        assert!("list:spaceship".parse::<CacheKey>().is_err());
        assert!("entity:course:".parse::<CacheKey>().is_err());
    }

    #[test]
    fn freshness_boundary() {
        let fetched = Utc::now();
        let entry = CacheEntry::new(CacheKey::collection(EntityType::Course), (), fetched, 1_000);

        assert!(entry.is_fresh(fetched + Duration::milliseconds(999), 1_000));
        assert!(!entry.is_fresh(fetched + Duration::milliseconds(1_000), 1_000));
    }

    #[test]
    fn stale_cache_hit_has_notice() {
        let hit = CachedData {
            data: 1,
            is_stale: true,
            fetched_at: Utc::now(),
            source: DataSource::Cache,
        };
        assert!(hit.staleness_notice().unwrap().starts_with("Offline, showing cached data from"));

        let fresh = CachedData { is_stale: false, ..hit };
        assert!(fresh.staleness_notice().is_none());
    }
}
