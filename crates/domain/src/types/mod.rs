//! Domain types and models

pub mod auth;
pub mod cache;
pub mod connectivity;
pub mod entity;
pub mod mutation;
pub mod outbox;

pub use auth::{AuthOutcome, CredentialRecord, LoginGrant, OfflineSession};
pub use cache::{CacheEntry, CacheKey, CacheRead, CachedData, DataSource};
pub use connectivity::ConnectivityState;
pub use entity::{
    Certificate, Course, EntityData, EntityPayload, EntityType, Job, Scholarship, UserProfile,
};
pub use mutation::{
    AssessmentAnswer, AssessmentSubmission, CourseEnrollment, CourseProgress, CredentialUpdate,
    DiscussionLike, DiscussionReply, HttpMethod, JobApplication, MutationKind, MutationPayload,
    MutationReceipt, ProfileUpdate, Registration, ScholarshipApplication, WriteOutcome,
};
pub use outbox::{idempotency_key, OutboxItem, OutboxStatus};
