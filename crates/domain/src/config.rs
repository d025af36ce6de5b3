//! Configuration management

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::errors::{HavenError, Result};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub sync: SyncConfig,
    pub connectivity: ConnectivityConfig,
    pub auth: AuthConfig,
}

/// Local durable store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: u32,
    /// SQLCipher key. When absent the key is fetched from (or created in) the
    /// system keychain.
    #[serde(skip_serializing)]
    pub encryption_key: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "haven.db".to_string(), pool_size: 4, encryption_key: None }
    }
}

/// REST backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Bound on a single online attempt before degrading to the offline path.
    pub request_timeout_ms: u64,
    /// Transport-level attempts per call. The outbox does its own retries, so
    /// this stays at 1 unless reads should retry inline.
    pub max_attempts: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_attempts: DEFAULT_HTTP_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_ms: u64,
    pub refresh_queue_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { default_ttl_ms: DEFAULT_CACHE_TTL_MS, refresh_queue_capacity: REFRESH_QUEUE_CAPACITY }
    }
}

/// Outbox sync configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Fraction of the computed delay used as +/- jitter (0.0 to 1.0).
    pub jitter: f64,
    pub safety_net_interval_secs: u64,
    pub inflight_lease_secs: u64,
    pub synced_retention_hours: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            jitter: DEFAULT_BACKOFF_JITTER,
            safety_net_interval_secs: DEFAULT_SAFETY_NET_INTERVAL_SECS,
            inflight_lease_secs: DEFAULT_INFLIGHT_LEASE_SECS,
            synced_retention_hours: DEFAULT_SYNCED_RETENTION_HOURS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub debounce_ms: u64,
    pub probe_enabled: bool,
    pub probe_interval_secs: u64,
    /// Assumed state before the first probe or platform signal.
    pub initially_online: bool,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            probe_enabled: true,
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
            initially_online: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub offline_session_hours: i64,
    pub keychain_service: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            offline_session_hours: DEFAULT_OFFLINE_SESSION_HOURS,
            keychain_service: KEYCHAIN_SERVICE.to_string(),
        }
    }
}

impl Config {
    /// Reject settings that would make the sync layer misbehave.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api.base_url)
            .map_err(|e| HavenError::Config(format!("Invalid api.base_url: {e}")))?;

        if self.database.pool_size == 0 {
            return Err(HavenError::Config("database.pool_size must be at least 1".into()));
        }
        if self.api.request_timeout_ms == 0 {
            return Err(HavenError::Config("api.request_timeout_ms must be positive".into()));
        }
        if self.sync.max_attempts == 0 {
            return Err(HavenError::Config("sync.max_attempts must be at least 1".into()));
        }
        if self.sync.backoff_base_ms > self.sync.backoff_max_ms {
            return Err(HavenError::Config(
                "sync.backoff_base_ms must not exceed sync.backoff_max_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.sync.jitter) {
            return Err(HavenError::Config("sync.jitter must be within 0.0..=1.0".into()));
        }
        if self.auth.offline_session_hours <= 0 {
            return Err(HavenError::Config("auth.offline_session_hours must be positive".into()));
        }
        Ok(())
    }
}
