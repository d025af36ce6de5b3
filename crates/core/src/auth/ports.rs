//! Port interfaces for authentication

use async_trait::async_trait;
use haven_domain::Result;

/// Secure storage for the server access token.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn save_token(&self, token: &str) -> Result<()>;

    async fn load_token(&self) -> Result<Option<String>>;

    async fn clear_token(&self) -> Result<()>;
}
