//! Credential storage backed by the platform keychain

pub mod token_store;

pub use token_store::{KeychainTokenStore, MemoryTokenStore};
