//! Access token storage

use async_trait::async_trait;
use haven_core::auth::TokenStore;
use haven_domain::{HavenError, Result, ACCESS_TOKEN_KEY};
use keyring::Entry;
use parking_lot::RwLock;
use tokio::task;
use tracing::debug;

use crate::errors::InfraError;

/// Keeps the access token in the platform keychain.
#[derive(Debug, Clone)]
pub struct KeychainTokenStore {
    service: String,
}

impl KeychainTokenStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }

    async fn with_entry<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> std::result::Result<T, keyring::Error> + Send + 'static,
    {
        let service = self.service.clone();
        task::spawn_blocking(move || {
            let entry = Entry::new(&service, ACCESS_TOKEN_KEY)
                .map_err(|e| HavenError::Storage(format!("Failed to access keyring: {e}")))?;
            f(entry).map_err(|e| HavenError::from(InfraError::from(e)))
        })
        .await
        .map_err(|e| HavenError::Internal(format!("keychain task failed: {e}")))?
    }
}

#[async_trait]
impl TokenStore for KeychainTokenStore {
    async fn save_token(&self, token: &str) -> Result<()> {
        let token = token.to_owned();
        self.with_entry(move |entry| entry.set_password(&token)).await?;
        debug!(service = %self.service, "access token stored");
        Ok(())
    }

    async fn load_token(&self) -> Result<Option<String>> {
        match self.with_entry(|entry| entry.get_password()).await {
            Ok(token) => Ok(Some(token)),
            Err(HavenError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn clear_token(&self) -> Result<()> {
        match self.with_entry(|entry| entry.delete_credential()).await {
            Ok(()) | Err(HavenError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Process-local token store for tests and hosts without a keychain.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn save_token(&self, token: &str) -> Result<()> {
        *self.token.write() = Some(token.to_owned());
        Ok(())
    }

    async fn load_token(&self) -> Result<Option<String>> {
        Ok(self.token.read().clone())
    }

    async fn clear_token(&self) -> Result<()> {
        self.token.write().take();
        Ok(())
    }
}
