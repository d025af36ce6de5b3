//! Server entities that can be read and cached.
//!
//! Each entity type has an explicit schema. Fields the client does not use are
//! kept in `extra` so a cached record round-trips without loss.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::errors::{HavenError, Result};

/// Readable entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Course,
    Job,
    Scholarship,
    Certificate,
    Profile,
}

crate::impl_domain_status_conversions!(EntityType {
    Course => "course",
    Job => "job",
    Scholarship => "scholarship",
    Certificate => "certificate",
    Profile => "profile",
});

impl EntityType {
    pub const ALL: [Self; 5] =
        [Self::Course, Self::Job, Self::Scholarship, Self::Certificate, Self::Profile];

    /// REST path of the collection.
    pub fn collection_path(self) -> &'static str {
        match self {
            Self::Course => "/courses",
            Self::Job => "/jobs",
            Self::Scholarship => "/scholarships",
            Self::Certificate => "/certificates",
            Self::Profile => "/users/profile",
        }
    }

    /// REST path of a single entity. The profile is a singleton resource.
    pub fn entity_path(self, id: &str) -> String {
        match self {
            Self::Profile => self.collection_path().to_string(),
            _ => format!("{}/{}", self.collection_path(), id),
        }
    }

    pub fn supports_listing(self) -> bool {
        !matches!(self, Self::Profile)
    }
}

/// Backend ids arrive either as strings (`_id`) or as numbers (`id`).
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number id, got {other}"))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    #[serde(alias = "_id", deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default, alias = "difficult_level")]
    pub difficulty_level: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(alias = "_id", deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub salary_range: Option<String>,
    #[serde(default)]
    pub application_deadline: Option<String>,
    #[serde(default)]
    pub remote_work: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scholarship {
    #[serde(alias = "_id", deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    #[serde(alias = "_id", deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub certificate_type: Option<String>,
    #[serde(default)]
    pub issued_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(alias = "_id", deserialize_with = "string_or_number")]
    pub id: String,
    pub email: String,
    #[serde(default, alias = "firstName")]
    pub first_name: Option<String>,
    #[serde(default, alias = "lastName")]
    pub last_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

/// A server entity tagged with its type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum EntityPayload {
    Course(Course),
    Job(Job),
    Scholarship(Scholarship),
    Certificate(Certificate),
    Profile(UserProfile),
}

impl EntityPayload {
    /// Parse an untyped server body as the given entity type and validate it.
    pub fn from_json(entity_type: EntityType, value: Value) -> Result<Self> {
        let payload = match entity_type {
            EntityType::Course => Self::Course(serde_json::from_value(value)?),
            EntityType::Job => Self::Job(serde_json::from_value(value)?),
            EntityType::Scholarship => Self::Scholarship(serde_json::from_value(value)?),
            EntityType::Certificate => Self::Certificate(serde_json::from_value(value)?),
            EntityType::Profile => Self::Profile(serde_json::from_value(value)?),
        };
        payload.validate()?;
        Ok(payload)
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Course(_) => EntityType::Course,
            Self::Job(_) => EntityType::Job,
            Self::Scholarship(_) => EntityType::Scholarship,
            Self::Certificate(_) => EntityType::Certificate,
            Self::Profile(_) => EntityType::Profile,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Course(c) => &c.id,
            Self::Job(j) => &j.id,
            Self::Scholarship(s) => &s.id,
            Self::Certificate(c) => &c.id,
            Self::Profile(p) => &p.id,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id().trim().is_empty() {
            return Err(HavenError::InvalidPayload(format!("{} id is empty", self.entity_type())));
        }
        let title = match self {
            Self::Course(c) => Some(&c.title),
            Self::Job(j) => Some(&j.title),
            Self::Scholarship(s) => Some(&s.title),
            Self::Certificate(c) => Some(&c.title),
            Self::Profile(_) => None,
        };
        if title.is_some_and(|t| t.trim().is_empty()) {
            return Err(HavenError::InvalidPayload(format!(
                "{} {} has an empty title",
                self.entity_type(),
                self.id()
            )));
        }
        if let Self::Profile(profile) = self {
            crate::validation::validate_email(&profile.email)?;
        }
        Ok(())
    }
}

/// What a cache slot holds: one entity, or a whole collection listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum EntityData {
    Single { item: EntityPayload },
    List { entity_type: EntityType, items: Vec<EntityPayload> },
}

impl EntityData {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Single { item } => item.entity_type(),
            Self::List { entity_type, .. } => *entity_type,
        }
    }

    /// Every element must belong to the declared type.
    pub fn is_consistent(&self) -> bool {
        match self {
            Self::Single { .. } => true,
            Self::List { entity_type, items } => {
                items.iter().all(|item| item.entity_type() == *entity_type)
            }
        }
    }
}
