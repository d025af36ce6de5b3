//! Application constants
//!
//! Defaults for every tunable in [`crate::config`]; the config structs fall
//! back to these when a field is absent.

// Cache
pub const DEFAULT_CACHE_TTL_MS: u64 = 10 * 60 * 1000;
pub const REFRESH_QUEUE_CAPACITY: usize = 64;

// Online attempts
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 8_000;
pub const DEFAULT_HTTP_MAX_ATTEMPTS: u32 = 1;

// Outbox retry policy
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 2_000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;
pub const DEFAULT_BACKOFF_JITTER: f64 = 0.3;

// Sync triggers
pub const DEFAULT_SAFETY_NET_INTERVAL_SECS: u64 = 15 * 60;
pub const DEFAULT_INFLIGHT_LEASE_SECS: u64 = 120;
pub const DEFAULT_SYNCED_RETENTION_HOURS: u64 = 24 * 7;
pub const OUTBOX_EVENT_CAPACITY: usize = 256;

// Connectivity
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 30;
pub const HEALTH_PATH: &str = "/health";

// Offline auth
pub const DEFAULT_OFFLINE_SESSION_HOURS: i64 = 24;

// Keychain
pub const KEYCHAIN_SERVICE: &str = "com.haven.sync";
pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const DATABASE_KEY_NAME: &str = "database_encryption_key";

// Transport headers
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
pub const OUTBOX_ITEM_HEADER: &str = "X-Outbox-Item-Id";
