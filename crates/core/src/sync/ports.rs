//! Port interfaces for sync operations

use std::sync::Arc;

use async_trait::async_trait;
use haven_domain::{
    EntityPayload, EntityType, LoginGrant, MutationKind, MutationPayload, MutationReceipt,
    OutboxItem, Result,
};

/// One mutation delivery attempt, carrying the identifiers the server uses to
/// deduplicate retries.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub item_id: String,
    pub idempotency_key: String,
    pub kind: MutationKind,
    pub target_entity_id: String,
    pub payload: MutationPayload,
}

impl From<&OutboxItem> for MutationRequest {
    fn from(item: &OutboxItem) -> Self {
        Self {
            item_id: item.id.clone(),
            idempotency_key: item.idempotency_key.clone(),
            kind: item.kind,
            target_entity_id: item.target_entity_id.clone(),
            payload: item.payload.clone(),
        }
    }
}

/// The authenticated REST backend.
///
/// Implementations classify failures as `NetworkUnavailable`,
/// `ServerRejected` (4xx) or `ServerUnavailable` (5xx and timeouts).
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn fetch_entity(&self, entity_type: EntityType, id: &str) -> Result<EntityPayload>;

    async fn list_entities(&self, entity_type: EntityType) -> Result<Vec<EntityPayload>>;

    async fn submit_mutation(&self, request: &MutationRequest) -> Result<MutationReceipt>;

    async fn login(&self, email: &str, password: &str) -> Result<LoginGrant>;

    /// Cheap reachability check.
    async fn check_health(&self) -> Result<()>;
}

pub type WakeCallback = Arc<dyn Fn() + Send + Sync>;

/// Host-provided primitive that invokes registered callbacks when the
/// platform judges connectivity may have returned. Wakes may be speculative.
pub trait BackgroundWake: Send + Sync {
    fn register(&self, callback: WakeCallback);
}
