//! Mutation kinds, their per-kind payload schemas, and write outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::cache::CacheKey;
use super::entity::EntityType;
use crate::errors::{HavenError, Result};
use crate::validation::{require_non_empty, validate_email};

/// Kinds of user actions that can be queued while offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    JobApplication,
    ScholarshipApplication,
    Registration,
    CredentialUpdate,
    ProfileUpdate,
    CourseEnrollment,
    CourseProgress,
    AssessmentSubmission,
    DiscussionReply,
    DiscussionLike,
}

crate::impl_domain_status_conversions!(MutationKind {
    JobApplication => "job_application",
    ScholarshipApplication => "scholarship_application",
    Registration => "registration",
    CredentialUpdate => "credential_update",
    ProfileUpdate => "profile_update",
    CourseEnrollment => "course_enrollment",
    CourseProgress => "course_progress",
    AssessmentSubmission => "assessment_submission",
    DiscussionReply => "discussion_reply",
    DiscussionLike => "discussion_like",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Post,
    Patch,
}

impl MutationKind {
    pub fn method(self) -> HttpMethod {
        match self {
            Self::ProfileUpdate => HttpMethod::Patch,
            _ => HttpMethod::Post,
        }
    }

    /// Server path for this mutation against `target`.
    ///
    /// Likes on a reply use a different route; see [`MutationPayload::path`].
    pub fn path(self, target: &str) -> String {
        match self {
            Self::JobApplication => format!("/jobs/{target}/apply"),
            Self::ScholarshipApplication => format!("/scholarships/{target}/apply"),
            Self::Registration => "/auth/register".to_string(),
            Self::CredentialUpdate => "/auth/change-password".to_string(),
            Self::ProfileUpdate => "/auth/profile".to_string(),
            Self::CourseEnrollment => format!("/courses/{target}/enroll"),
            Self::CourseProgress => format!("/courses/{target}/progress"),
            Self::AssessmentSubmission => format!("/courses/assessments/{target}/submit"),
            Self::DiscussionReply => format!("/courses/discussions/{target}/replies"),
            Self::DiscussionLike => format!("/discussions/{target}/like"),
        }
    }

    /// Cache keys whose contents a successful mutation makes obsolete.
    pub fn affected_keys(self, target: &str) -> Vec<CacheKey> {
        match self {
            Self::JobApplication => vec![
                CacheKey::entity(EntityType::Job, target),
                CacheKey::collection(EntityType::Job),
            ],
            Self::ScholarshipApplication => vec![
                CacheKey::entity(EntityType::Scholarship, target),
                CacheKey::collection(EntityType::Scholarship),
            ],
            Self::CourseEnrollment => vec![
                CacheKey::entity(EntityType::Course, target),
                CacheKey::collection(EntityType::Course),
            ],
            Self::CourseProgress => vec![
                CacheKey::entity(EntityType::Course, target),
                CacheKey::collection(EntityType::Certificate),
            ],
            // Grades feed course progress and may issue a certificate.
            Self::AssessmentSubmission => vec![
                CacheKey::collection(EntityType::Course),
                CacheKey::collection(EntityType::Certificate),
            ],
            Self::ProfileUpdate => vec![CacheKey::entity(EntityType::Profile, target)],
            // Discussion threads are never cached.
            Self::Registration
            | Self::CredentialUpdate
            | Self::DiscussionReply
            | Self::DiscussionLike => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobApplication {
    #[serde(default)]
    pub cover_letter: Option<String>,
    #[serde(default)]
    pub resume_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScholarshipApplication {
    #[serde(default)]
    pub statement: Option<String>,
    #[serde(default)]
    pub documents: Vec<String>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub role: Option<String>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("role", &self.role)
            .finish()
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialUpdate {
    pub current_password: String,
    pub new_password: String,
}

impl fmt::Debug for CredentialUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialUpdate").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseEnrollment {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseProgress {
    #[serde(default)]
    pub module_id: Option<String>,
    pub progress_percentage: f64,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentAnswer {
    pub question_id: String,
    pub answer: Value,
}

/// Answers to one assessment; the target is the assessment id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentSubmission {
    pub answers: Vec<AssessmentAnswer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_spent_secs: Option<u64>,
}

/// A reply posted to a course discussion; the target is the discussion id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscussionReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    pub content: String,
}

/// Like on a discussion thread, or on one of its replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscussionLike {
    #[serde(default)]
    pub is_reply: bool,
}

const MAX_REPLY_CHARS: usize = 10_000;

/// Mutation body, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum MutationPayload {
    JobApplication(JobApplication),
    ScholarshipApplication(ScholarshipApplication),
    Registration(Registration),
    CredentialUpdate(CredentialUpdate),
    ProfileUpdate(ProfileUpdate),
    CourseEnrollment(CourseEnrollment),
    CourseProgress(CourseProgress),
    AssessmentSubmission(AssessmentSubmission),
    DiscussionReply(DiscussionReply),
    DiscussionLike(DiscussionLike),
}

impl MutationPayload {
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::JobApplication(_) => MutationKind::JobApplication,
            Self::ScholarshipApplication(_) => MutationKind::ScholarshipApplication,
            Self::Registration(_) => MutationKind::Registration,
            Self::CredentialUpdate(_) => MutationKind::CredentialUpdate,
            Self::ProfileUpdate(_) => MutationKind::ProfileUpdate,
            Self::CourseEnrollment(_) => MutationKind::CourseEnrollment,
            Self::CourseProgress(_) => MutationKind::CourseProgress,
            Self::AssessmentSubmission(_) => MutationKind::AssessmentSubmission,
            Self::DiscussionReply(_) => MutationKind::DiscussionReply,
            Self::DiscussionLike(_) => MutationKind::DiscussionLike,
        }
    }

    /// Server path for this payload against `target`.
    pub fn path(&self, target: &str) -> String {
        match self {
            Self::DiscussionLike(DiscussionLike { is_reply: true }) => {
                format!("/discussions/replies/{target}/like")
            }
            other => other.kind().path(target),
        }
    }

    /// Check the payload against its schema and against the declared kind.
    pub fn validate_for(&self, kind: MutationKind, target: &str) -> Result<()> {
        if self.kind() != kind {
            return Err(HavenError::InvalidPayload(format!(
                "payload of kind {} submitted as {kind}",
                self.kind()
            )));
        }
        match self {
            Self::Registration(_) | Self::CredentialUpdate(_) | Self::ProfileUpdate(_) => {}
            _ => require_non_empty("target entity id", target)?,
        }

        match self {
            Self::JobApplication(_) | Self::CourseEnrollment(_) | Self::DiscussionLike(_) => Ok(()),
            Self::ScholarshipApplication(app) => {
                if app.documents.iter().any(|d| d.trim().is_empty()) {
                    return Err(HavenError::InvalidPayload(
                        "scholarship documents must not be blank".into(),
                    ));
                }
                Ok(())
            }
            Self::Registration(reg) => {
                validate_email(&reg.email)?;
                require_non_empty("first_name", &reg.first_name)?;
                require_non_empty("last_name", &reg.last_name)?;
                if reg.password.len() < 8 {
                    return Err(HavenError::InvalidPayload(
                        "password must be at least 8 characters".into(),
                    ));
                }
                Ok(())
            }
            Self::CredentialUpdate(update) => {
                require_non_empty("current_password", &update.current_password)?;
                if update.new_password.len() < 8 {
                    return Err(HavenError::InvalidPayload(
                        "new password must be at least 8 characters".into(),
                    ));
                }
                if update.new_password == update.current_password {
                    return Err(HavenError::InvalidPayload(
                        "new password must differ from the current one".into(),
                    ));
                }
                Ok(())
            }
            Self::ProfileUpdate(update) => {
                let fields = [&update.first_name, &update.last_name, &update.phone, &update.bio];
                if fields.iter().all(|f| f.is_none()) {
                    return Err(HavenError::InvalidPayload("profile update has no fields".into()));
                }
                Ok(())
            }
            Self::CourseProgress(progress) => {
                if !(0.0..=100.0).contains(&progress.progress_percentage) {
                    return Err(HavenError::InvalidPayload(format!(
                        "progress {} is outside 0..=100",
                        progress.progress_percentage
                    )));
                }
                Ok(())
            }
            Self::AssessmentSubmission(submission) => {
                if submission.answers.is_empty() {
                    return Err(HavenError::InvalidPayload("assessment has no answers".into()));
                }
                let mut seen = std::collections::HashSet::new();
                for answer in &submission.answers {
                    require_non_empty("question_id", &answer.question_id)?;
                    if !seen.insert(answer.question_id.as_str()) {
                        return Err(HavenError::InvalidPayload(format!(
                            "question {} answered twice",
                            answer.question_id
                        )));
                    }
                }
                Ok(())
            }
            Self::DiscussionReply(reply) => {
                require_non_empty("content", &reply.content)?;
                if reply.content.chars().count() > MAX_REPLY_CHARS {
                    return Err(HavenError::InvalidPayload(format!(
                        "reply is longer than {MAX_REPLY_CHARS} characters"
                    )));
                }
                Ok(())
            }
        }
    }

    /// JSON body sent to the server.
    pub fn body(&self) -> Result<Value> {
        let value = match self {
            Self::JobApplication(p) => serde_json::to_value(p)?,
            Self::ScholarshipApplication(p) => serde_json::to_value(p)?,
            Self::Registration(p) => serde_json::to_value(p)?,
            Self::CredentialUpdate(p) => serde_json::to_value(p)?,
            Self::ProfileUpdate(p) => serde_json::to_value(p)?,
            Self::CourseEnrollment(p) => serde_json::to_value(p)?,
            Self::CourseProgress(p) => serde_json::to_value(p)?,
            Self::AssessmentSubmission(p) => serde_json::to_value(p)?,
            Self::DiscussionReply(p) => serde_json::to_value(p)?,
            Self::DiscussionLike(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }
}

/// Server acknowledgement of a delivered mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationReceipt {
    pub status: u16,
    #[serde(default)]
    pub body: Value,
}

/// Outcome of `submit_mutation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WriteOutcome {
    Synced { receipt: MutationReceipt },
    AcceptedOffline { item_id: String, idempotency_key: String },
}

impl WriteOutcome {
    pub fn is_accepted_offline(&self) -> bool {
        matches!(self, Self::AcceptedOffline { .. })
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Synced { .. } => "Saved.",
            Self::AcceptedOffline { .. } => "Saved. Will sync when you're back online.",
        }
    }
}
