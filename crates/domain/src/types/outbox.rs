//! Outbox records for mutations awaiting delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::mutation::{MutationKind, MutationPayload};

/// Outbox item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    InFlight,
    Synced,
    Failed,
}

crate::impl_domain_status_conversions!(OutboxStatus {
    Pending => "pending",
    InFlight => "in_flight",
    Synced => "synced",
    Failed => "failed",
});

impl OutboxStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Synced | Self::Failed)
    }

    /// `Pending -> InFlight -> {Synced | Pending | Failed}`; terminal states
    /// have no outgoing edges.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight)
                | (Self::InFlight, Self::Synced)
                | (Self::InFlight, Self::Pending)
                | (Self::InFlight, Self::Failed)
        )
    }
}

/// Derive the idempotency key for a mutation.
///
/// SHA-256 over `kind:target:created_at_ms`, hex encoded.
pub fn idempotency_key(kind: MutationKind, target: &str, created_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(target.as_bytes());
    hasher.update(b":");
    hasher.update(created_at.timestamp_millis().to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// A queued mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxItem {
    pub id: String,
    pub idempotency_key: String,
    /// Monotonic enqueue order; FIFO within a kind follows this.
    pub sequence: u64,
    pub kind: MutationKind,
    pub target_entity_id: String,
    pub payload: MutationPayload,
    pub created_at: DateTime<Utc>,
    /// Failed delivery attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub status: OutboxStatus,
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Set while `InFlight`; a lease older than the configured window is
    /// treated as abandoned.
    pub claimed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxItem {
    pub fn new(
        kind: MutationKind,
        target_entity_id: impl Into<String>,
        payload: MutationPayload,
        created_at: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        let target_entity_id = target_entity_id.into();
        Self {
            id: Uuid::now_v7().to_string(),
            idempotency_key: idempotency_key(kind, &target_entity_id, created_at),
            sequence,
            kind,
            target_entity_id,
            payload,
            created_at,
            attempts: 0,
            last_error: None,
            status: OutboxStatus::Pending,
            next_attempt_at: None,
            claimed_at: None,
            updated_at: created_at,
        }
    }

    /// Move the item to a new creation instant and re-derive its key.
    pub fn reissue_at(&mut self, created_at: DateTime<Utc>) {
        self.idempotency_key = idempotency_key(self.kind, &self.target_entity_id, created_at);
        self.created_at = created_at;
        self.updated_at = created_at;
    }

    /// Same kind, target and payload: a replay of one user action.
    pub fn same_mutation(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.target_entity_id == other.target_entity_id
            && self.payload == other.payload
    }

    /// Ready to be claimed at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Pending && self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::mutation::CourseEnrollment;

    #[test]
    fn transitions_follow_state_machine() {
        use OutboxStatus::*;
        assert!(Pending.can_transition_to(InFlight));
        assert!(InFlight.can_transition_to(Synced));
        assert!(InFlight.can_transition_to(Pending));
        assert!(InFlight.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Synced));
        assert!(!Pending.can_transition_to(Failed));
        for next in [Pending, InFlight, Synced, Failed] {
            assert!(!Synced.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn idempotency_key_is_deterministic() {
        let at = Utc::now();
        let a = idempotency_key(MutationKind::JobApplication, "j1", at);
        let b = idempotency_key(MutationKind::JobApplication, "j1", at);
        let c = idempotency_key(MutationKind::ScholarshipApplication, "j1", at);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn new_item_is_pending_and_due() {
        let now = Utc::now();
        let item = OutboxItem::new(
            MutationKind::CourseEnrollment,
            "c1",
            MutationPayload::CourseEnrollment(CourseEnrollment {}),
            now,
            7,
        );
        assert_eq!(item.status, OutboxStatus::Pending);
        assert_eq!(item.attempts, 0);
        assert_eq!(item.sequence, 7);
        assert!(item.is_due(now));
        assert_eq!(OutboxStatus::InFlight.to_string(), "in_flight");
    }

    #[test]
    fn reissue_changes_key_but_not_mutation() {
        let now = Utc::now();
        let original = OutboxItem::new(
            MutationKind::CourseEnrollment,
            "c1",
            MutationPayload::CourseEnrollment(CourseEnrollment {}),
            now,
            0,
        );
        let mut moved = original.clone();
        moved.reissue_at(now + chrono::Duration::milliseconds(1));

        assert_ne!(moved.idempotency_key, original.idempotency_key);
        assert_eq!(moved.id, original.id);
        assert!(moved.same_mutation(&original));
    }
}
