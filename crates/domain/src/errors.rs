//! Error types used throughout the sync layer

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Haven.
///
/// Variants split into three groups: transport failures that the executor
/// recovers from locally (`NetworkUnavailable`, `ServerUnavailable`),
/// permanent failures that propagate to the caller (`ServerRejected`,
/// `OutboxExhausted`, `InvalidPayload`), and offline-auth failures.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum HavenError {
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Server rejected request ({status}): {message}")]
    ServerRejected { status: u16, message: String },

    #[error("Server unavailable{}: {message}", status_suffix(.status))]
    ServerUnavailable { status: Option<u16>, message: String },

    #[error("No offline login record for this account")]
    NoOfflineRecord,

    #[error("Offline credential did not match")]
    InvalidOfflineCredential,

    #[error("Offline login is only available while offline")]
    OnlineAuthRequired,

    #[error("Outbox item {item_id} failed after {attempts} attempts: {last_error}")]
    OutboxExhausted { item_id: String, attempts: u32, last_error: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl HavenError {
    /// Transient failures are queued and retried rather than surfaced.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_) | Self::ServerUnavailable { .. })
    }

    /// 4xx responses: retrying cannot fix a client error.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::ServerRejected { .. })
    }

    /// Short, presentation-ready message.
    pub fn user_message(&self) -> String {
        match self {
            Self::NetworkUnavailable(_) | Self::ServerUnavailable { .. } => {
                "You appear to be offline. We'll keep trying in the background.".to_string()
            }
            Self::ServerRejected { message, .. } => format!("The request was rejected: {message}"),
            Self::NoOfflineRecord => {
                "Sign in online once on this device before using offline login.".to_string()
            }
            Self::InvalidOfflineCredential => "Incorrect email or password.".to_string(),
            Self::OnlineAuthRequired => "You're online, please sign in normally.".to_string(),
            Self::OutboxExhausted { attempts, .. } => format!(
                "A saved change could not be synced after {attempts} attempts. Please review and resubmit it."
            ),
            Self::InvalidPayload(msg) => format!("Some fields are invalid: {msg}"),
            other => format!("Something went wrong: {other}"),
        }
    }
}

impl From<serde_json::Error> for HavenError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for Haven operations
pub type Result<T> = std::result::Result<T, HavenError>;
