use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Online/offline flag plus the time of the last committed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub online: bool,
    pub changed_at: DateTime<Utc>,
}

impl ConnectivityState {
    pub fn new(online: bool, changed_at: DateTime<Utc>) -> Self {
        Self { online, changed_at }
    }
}
