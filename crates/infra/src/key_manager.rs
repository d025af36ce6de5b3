//! Database encryption key management using the system keyring
use haven_domain::{HavenError, Result, DATABASE_KEY_NAME};
use keyring::Entry;
use rand::Rng;
use tracing::info;

use crate::errors::InfraError;

/// Manages the SQLCipher key for one keychain service.
#[derive(Debug, Clone)]
pub struct KeyManager {
    service: String,
}

impl KeyManager {
    pub fn new(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }

    /// Return the stored key, generating and storing one on first use.
    pub fn get_or_create_key(&self) -> Result<String> {
        let entry = self.entry()?;

        match entry.get_password() {
            Ok(key) => Ok(key),
            Err(keyring::Error::NoEntry) => {
                let key = generate_key();
                entry.set_password(&key).map_err(|e| HavenError::from(InfraError::from(e)))?;
                info!(service = %self.service, "generated database encryption key");
                Ok(key)
            }
            Err(e) => Err(InfraError::from(e).into()),
        }
    }

    /// Delete the stored key. The database becomes unreadable.
    pub fn delete_key(&self) -> Result<()> {
        self.entry()?.delete_credential().map_err(|e| HavenError::from(InfraError::from(e)))
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, DATABASE_KEY_NAME)
            .map_err(|e| HavenError::Storage(format!("Failed to access keyring: {}", e)))
    }
}

/// 32 random bytes, hex encoded.
fn generate_key() -> String {
    let key: [u8; 32] = rand::thread_rng().gen();
    hex::encode(key)
}
