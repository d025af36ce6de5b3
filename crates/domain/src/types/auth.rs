//! Offline authentication records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::UserProfile;

/// Last-known-good login for one account.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Normalized (trimmed, lowercase) email.
    pub email: String,
    /// Argon2id PHC string; never the raw password.
    pub derived_credential: String,
    pub last_validated_at: DateTime<Utc>,
    #[serde(default)]
    pub profile: Option<UserProfile>,
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("email", &self.email)
            .field("last_validated_at", &self.last_validated_at)
            .finish_non_exhaustive()
    }
}

/// Session opened by an offline login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineSession {
    pub id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub profile: Option<UserProfile>,
}

impl OfflineSession {
    pub fn new(
        email: impl Into<String>,
        profile: Option<UserProfile>,
        now: DateTime<Utc>,
        lifetime: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.into(),
            created_at: now,
            expires_at: now + lifetime,
            profile,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// How `authenticate` succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthOutcome {
    Online { profile: Option<UserProfile> },
    Offline { session: OfflineSession },
}

/// Server response to a successful login.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginGrant {
    #[serde(alias = "token", alias = "accessToken")]
    pub access_token: String,
    #[serde(default, alias = "user")]
    pub profile: Option<UserProfile>,
}

impl std::fmt::Debug for LoginGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginGrant").field("profile", &self.profile).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_expiry() {
        let now = Utc::now();
        let session = OfflineSession::new("a@b.io", None, now, Duration::hours(24));
        assert!(!session.is_expired(now + Duration::hours(23)));
        assert!(session.is_expired(now + Duration::hours(24)));
    }

    #[test]
    fn debug_does_not_leak_credential() {
        let record = CredentialRecord {
            email: "a@b.io".into(),
            derived_credential: "$argon2id$v=19$secret".into(),
            last_validated_at: Utc::now(),
            profile: None,
        };
        assert!(!format!("{record:?}").contains("argon2"));
    }
}
