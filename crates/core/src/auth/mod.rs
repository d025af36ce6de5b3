//! Offline authentication

pub mod ports;
pub mod vault;

pub use ports::TokenStore;
pub use vault::CredentialVault;
