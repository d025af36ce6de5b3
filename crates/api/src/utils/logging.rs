use std::time::Duration;

use haven_domain::HavenError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the tracing filter directive.
pub const LOG_ENV: &str = "HAVEN_LOG";

/// Install a global `fmt` subscriber.
///
/// `HAVEN_LOG` wins over `default_filter` when set. Returns an error when a
/// global subscriber is already installed, which hosts embedding the crate
/// may do themselves.
pub fn init_tracing(default_filter: &str) -> Result<(), String> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| format!("invalid log filter: {e}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| format!("failed to install tracing subscriber: {e}"))
}

/// Log the outcome of a context operation with structured fields.
///
/// `operation` is a stable identifier such as `"submit_mutation"`; callers
/// must not pass user data (emails, payloads) through it.
#[inline]
pub fn log_operation(operation: &str, elapsed: Duration, result: Result<(), &HavenError>) {
    let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(()) => info!(operation, duration_ms, "operation_success"),
        Err(error) => {
            warn!(operation, duration_ms, error_type = error_label(error), "operation_failure");
        }
    }
}

/// Convert a `HavenError` into a stable label suitable for logging.
#[inline]
pub fn error_label(error: &HavenError) -> &'static str {
    match error {
        HavenError::NetworkUnavailable(_) => "network_unavailable",
        HavenError::ServerRejected { .. } => "server_rejected",
        HavenError::ServerUnavailable { .. } => "server_unavailable",
        HavenError::NoOfflineRecord => "no_offline_record",
        HavenError::InvalidOfflineCredential => "invalid_offline_credential",
        HavenError::OnlineAuthRequired => "online_auth_required",
        HavenError::OutboxExhausted { .. } => "outbox_exhausted",
        HavenError::InvalidPayload(_) => "invalid_payload",
        HavenError::Storage(_) => "storage",
        HavenError::Serialization(_) => "serialization",
        HavenError::Config(_) => "config",
        HavenError::NotFound(_) => "not_found",
        HavenError::Internal(_) => "internal",
    }
}
