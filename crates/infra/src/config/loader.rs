//! Configuration loader
//!
//! Loads sync-layer configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. Reads a `.env` file if present (`dotenvy`)
//! 2. Uses environment variables when `HAVEN_API_BASE_URL` is set
//! 3. Otherwise falls back to the first config file found
//! 4. Supports JSON and TOML formats
//!
//! Unset values keep their defaults. Every loaded config is validated.
//!
//! ## Environment Variables
//! - `HAVEN_API_BASE_URL`: REST backend base URL (required for env loading)
//! - `HAVEN_API_TIMEOUT_MS`: Per-request timeout
//! - `HAVEN_DB_PATH`: Database file path
//! - `HAVEN_DB_POOL_SIZE`: Connection pool size
//! - `HAVEN_DB_ENCRYPTION_KEY`: SQLCipher key (keychain-managed when unset)
//! - `HAVEN_CACHE_TTL_MS`: Default cache TTL
//! - `HAVEN_SYNC_ENABLED`: Whether the background sync worker runs
//! - `HAVEN_SYNC_MAX_ATTEMPTS`: Outbox delivery attempts before dead-lettering
//! - `HAVEN_SYNC_BACKOFF_BASE_MS` / `HAVEN_SYNC_BACKOFF_MAX_MS`: Retry backoff
//! - `HAVEN_CONNECTIVITY_DEBOUNCE_MS`: Connectivity debounce window
//! - `HAVEN_CONNECTIVITY_PROBE_ENABLED`: Whether the reachability probe runs
//! - `HAVEN_OFFLINE_SESSION_HOURS`: Offline session lifetime
//!
//! ## File Locations
//! The loader probes, in order, `haven.{toml,json}` and `config.{toml,json}`
//! in the current directory, its two parents, and the executable directory.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use haven_domain::{Config, HavenError, Result};

const FILE_NAMES: [&str; 4] = ["haven.toml", "haven.json", "config.toml", "config.json"];

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `HavenError::Config` if no source is available, a value does not
/// parse, or the result fails validation.
pub fn load() -> Result<Config> {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            tracing::warn!(error = %err, "Ignoring unreadable .env file");
        }
    }

    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from `HAVEN_*` environment variables.
///
/// # Errors
/// Returns `HavenError::Config` if `HAVEN_API_BASE_URL` is missing or any
/// variable has an invalid value.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();
    config.api.base_url = env_var("HAVEN_API_BASE_URL")?;

    if let Some(timeout) = env_parse("HAVEN_API_TIMEOUT_MS")? {
        config.api.request_timeout_ms = timeout;
    }
    if let Ok(path) = std::env::var("HAVEN_DB_PATH") {
        config.database.path = path;
    }
    if let Some(pool_size) = env_parse("HAVEN_DB_POOL_SIZE")? {
        config.database.pool_size = pool_size;
    }
    config.database.encryption_key = std::env::var("HAVEN_DB_ENCRYPTION_KEY").ok();

    if let Some(ttl) = env_parse("HAVEN_CACHE_TTL_MS")? {
        config.cache.default_ttl_ms = ttl;
    }

    config.sync.enabled = env_bool("HAVEN_SYNC_ENABLED", config.sync.enabled);
    if let Some(attempts) = env_parse("HAVEN_SYNC_MAX_ATTEMPTS")? {
        config.sync.max_attempts = attempts;
    }
    if let Some(base) = env_parse("HAVEN_SYNC_BACKOFF_BASE_MS")? {
        config.sync.backoff_base_ms = base;
    }
    if let Some(max) = env_parse("HAVEN_SYNC_BACKOFF_MAX_MS")? {
        config.sync.backoff_max_ms = max;
    }

    if let Some(debounce) = env_parse("HAVEN_CONNECTIVITY_DEBOUNCE_MS")? {
        config.connectivity.debounce_ms = debounce;
    }
    config.connectivity.probe_enabled =
        env_bool("HAVEN_CONNECTIVITY_PROBE_ENABLED", config.connectivity.probe_enabled);

    if let Some(hours) = env_parse("HAVEN_OFFLINE_SESSION_HOURS")? {
        config.auth.offline_session_hours = hours;
    }

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations.
///
/// # Errors
/// Returns `HavenError::Config` if the file is missing, malformed, or fails
/// validation.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(HavenError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            HavenError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| HavenError::Config(format!("Failed to read config file: {}", e)))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| HavenError::Config(format!("Invalid TOML format: {}", e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| HavenError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(HavenError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// First existing config file among the standard locations.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.clone());
        dirs.push(cwd.join(".."));
        dirs.push(cwd.join("../.."));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.push(exe_dir.to_path_buf());
        }
    }

    dirs.iter()
        .flat_map(|dir| FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| HavenError::Config(format!("Missing required environment variable: {}", key)))
}

/// Parse an optional environment variable.
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| HavenError::Config(format!("Invalid value for {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
