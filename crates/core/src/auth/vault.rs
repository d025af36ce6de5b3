//! Offline credential vault.
//!
//! After every successful online login the password is stretched with
//! Argon2id and the PHC string is stored per account. While offline, a login
//! is checked against that record and opens a time-limited offline session.

use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::Duration;
use haven_domain::validation::normalize_email;
use haven_domain::{CredentialRecord, HavenError, OfflineSession, Result, UserProfile};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::connectivity::ConnectivityMonitor;
use crate::store::LocalStore;

/// Local credential records and the offline session derived from them.
pub struct CredentialVault {
    store: LocalStore,
    monitor: ConnectivityMonitor,
    clock: Arc<dyn Clock>,
    session_lifetime: Duration,
    params: Params,
}

impl CredentialVault {
    /// Sessions created offline expire `session_lifetime` after creation.
    pub fn new(
        store: LocalStore,
        monitor: ConnectivityMonitor,
        clock: Arc<dyn Clock>,
        session_lifetime: Duration,
    ) -> Self {
        Self { store, monitor, clock, session_lifetime, params: Params::default() }
    }

    /// Override the Argon2 cost parameters for newly derived credentials.
    pub fn with_kdf_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Remember a login the server just accepted.
    pub async fn remember(
        &self,
        email: &str,
        password: &str,
        profile: Option<UserProfile>,
    ) -> Result<()> {
        let derived = self.derive_credential(password).await?;
        self.store_validated(email, derived, profile).await
    }

    /// Argon2id PHC string for `password`, with a fresh random salt.
    pub async fn derive_credential(&self, password: &str) -> Result<String> {
        derive_phc(password.to_owned(), self.params.clone()).await
    }

    /// Store a credential derived from a password the server accepted,
    /// replacing any earlier record for the account.
    pub async fn store_validated(
        &self,
        email: &str,
        derived_credential: String,
        profile: Option<UserProfile>,
    ) -> Result<()> {
        PasswordHash::new(&derived_credential)
            .map_err(|e| HavenError::InvalidPayload(format!("not a PHC credential: {e}")))?;
        let email = normalize_email(email);
        let record = CredentialRecord {
            email: email.clone(),
            derived_credential,
            last_validated_at: self.clock.now(),
            profile,
        };
        self.store.credential_put(&record).await?;
        debug!(email = %email, "offline credential stored");
        Ok(())
    }

    /// Log in without the server.
    ///
    /// Only permitted while offline, and only for an account that has
    /// logged in online on this device before.
    pub async fn offline_authenticate(&self, email: &str, password: &str) -> Result<OfflineSession> {
        if self.monitor.is_online() {
            return Err(HavenError::OnlineAuthRequired);
        }
        let email = normalize_email(email);
        let record = self.store.credential_get(&email).await?.ok_or(HavenError::NoOfflineRecord)?;

        if !verify_credential(password.to_owned(), record.derived_credential.clone()).await? {
            warn!(email = %email, "offline login rejected");
            return Err(HavenError::InvalidOfflineCredential);
        }

        let session =
            OfflineSession::new(email, record.profile, self.clock.now(), self.session_lifetime);
        self.store.session_put(&session).await?;
        info!(email = %session.email, expires_at = %session.expires_at, "offline session opened");
        Ok(session)
    }

    /// The active offline session, if any. Expired sessions are removed.
    pub async fn current_session(&self) -> Result<Option<OfflineSession>> {
        match self.store.session_get().await? {
            Some(session) if session.is_expired(self.clock.now()) => {
                self.store.session_delete().await?;
                debug!(email = %session.email, "offline session expired");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// End the offline session. Stored credentials are kept.
    pub async fn logout(&self) -> Result<()> {
        self.store.session_delete().await?;
        Ok(())
    }

    /// Drop the stored credential for `email`.
    pub async fn forget(&self, email: &str) -> Result<bool> {
        self.store.credential_delete(&normalize_email(email)).await
    }

    pub async fn has_record(&self, email: &str) -> Result<bool> {
        Ok(self.store.credential_get(&normalize_email(email)).await?.is_some())
    }
}

/// Argon2id PHC string for `password`.
async fn derive_phc(password: String, params: Params) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt_bytes: [u8; 16] = rand::thread_rng().gen();
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| HavenError::Internal(format!("salt encoding failed: {e}")))?;
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| HavenError::Internal(format!("credential derivation failed: {e}")))
    })
    .await
    .map_err(|e| HavenError::Internal(format!("credential task failed: {e}")))?
}

/// An unparsable stored hash counts as a mismatch.
async fn verify_credential(password: String, derived: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || match PasswordHash::new(&derived) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(err) => {
            warn!(error = %err, "stored credential is not a valid PHC string");
            false
        }
    })
    .await
    .map_err(|e| HavenError::Internal(format!("credential task failed: {e}")))
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryKeyValueStore;

    struct Fixture {
        vault: CredentialVault,
        store: LocalStore,
        monitor: ConnectivityMonitor,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let store = LocalStore::new(Arc::new(MemoryKeyValueStore::new()));
        let monitor = ConnectivityMonitor::new(true, StdDuration::ZERO, clock.clone());
        let vault =
            CredentialVault::new(store.clone(), monitor.clone(), clock.clone(), Duration::hours(24))
                .with_kdf_params(Params::new(1024, 1, 1, None).unwrap());
        Fixture { vault, store, monitor, clock }
    }

    #[tokio::test]
    async fn offline_login_after_online_login() {
        let fx = fixture();
        fx.vault.remember("Ada@Example.com", "correct horse", None).await.unwrap();
        fx.monitor.set_online(false);

        let session = fx.vault.offline_authenticate(" ada@example.com", "correct horse").await.unwrap();
        assert_eq!(session.email, "ada@example.com");
        assert_eq!(session.expires_at, fx.clock.now() + Duration::hours(24));
        assert_eq!(fx.vault.current_session().await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn stored_record_is_not_the_password() {
        let fx = fixture();
        fx.vault.remember("ada@example.com", "correct horse", None).await.unwrap();
        let record = fx.store.credential_get("ada@example.com").await.unwrap().unwrap();
        assert!(record.derived_credential.starts_with("$argon2id$"));
        assert!(!record.derived_credential.contains("correct horse"));
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let fx = fixture();
        fx.vault.remember("ada@example.com", "correct horse", None).await.unwrap();
        fx.monitor.set_online(false);

        let err = fx.vault.offline_authenticate("ada@example.com", "battery staple").await.unwrap_err();
        assert_eq!(err, HavenError::InvalidOfflineCredential);
        assert!(fx.vault.current_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_account_has_no_record() {
        let fx = fixture();
        fx.monitor.set_online(false);
        let err = fx.vault.offline_authenticate("bob@example.com", "whatever").await.unwrap_err();
        assert_eq!(err, HavenError::NoOfflineRecord);
    }

    #[tokio::test]
    async fn online_requires_server_login() {
        let fx = fixture();
        fx.vault.remember("ada@example.com", "correct horse", None).await.unwrap();
        let err = fx.vault.offline_authenticate("ada@example.com", "correct horse").await.unwrap_err();
        assert_eq!(err, HavenError::OnlineAuthRequired);
    }

    #[tokio::test]
    async fn expired_session_is_dropped() {
        let fx = fixture();
        fx.vault.remember("ada@example.com", "correct horse", None).await.unwrap();
        fx.monitor.set_online(false);
        fx.vault.offline_authenticate("ada@example.com", "correct horse").await.unwrap();

        fx.clock.advance(Duration::hours(25));
        assert!(fx.vault.current_session().await.unwrap().is_none());
        assert!(fx.store.session_get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_record_is_a_mismatch() {
        let fx = fixture();
        fx.store
            .credential_put(&CredentialRecord {
                email: "ada@example.com".into(),
                derived_credential: "not-a-phc-string".into(),
                last_validated_at: fx.clock.now(),
                profile: None,
            })
            .await
            .unwrap();
        fx.monitor.set_online(false);

        let err = fx.vault.offline_authenticate("ada@example.com", "anything").await.unwrap_err();
        assert_eq!(err, HavenError::InvalidOfflineCredential);
    }

    #[tokio::test]
    async fn store_validated_overwrites_and_checks_format() {
        let fx = fixture();
        fx.vault.remember("ada@example.com", "old password", None).await.unwrap();
        let derived = fx.vault.derive_credential("new password").await.unwrap();
        fx.vault.store_validated("ada@example.com", derived, None).await.unwrap();
        fx.monitor.set_online(false);

        assert_eq!(
            fx.vault.offline_authenticate("ada@example.com", "old password").await.unwrap_err(),
            HavenError::InvalidOfflineCredential
        );
        fx.vault.offline_authenticate("ada@example.com", "new password").await.unwrap();

        let err = fx.vault.store_validated("ada@example.com", "plain".into(), None).await;
        assert!(matches!(err, Err(HavenError::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn forget_removes_record() {
        let fx = fixture();
        fx.vault.remember("ada@example.com", "correct horse", None).await.unwrap();
        assert!(fx.vault.forget("ADA@example.com").await.unwrap());
        assert!(!fx.vault.has_record("ada@example.com").await.unwrap());
    }
}
