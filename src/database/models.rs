use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConsentError, Result};

/// Canonical timestamp representation used for persistence and hashing.
///
/// Microsecond precision with a `Z` suffix. Parsing a stored value and
/// re-formatting it reproduces the stored string exactly, which is what makes
/// entry and receipt hashes recomputable from persisted fields.
pub fn canonical_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ConsentError::Database(format!("bad timestamp '{}': {}", raw, e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudyStatus {
    Draft,
    Public,
    Invite,
}

impl StudyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Public => "public",
            Self::Invite => "invite",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "draft" => Ok(Self::Draft),
            "public" => Ok(Self::Public),
            "invite" => Ok(Self::Invite),
            other => Err(ConsentError::Database(format!(
                "unknown study status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Researcher,
    Participant,
    System,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Researcher => "researcher",
            Self::Participant => "participant",
            Self::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "researcher" => Ok(Self::Researcher),
            "participant" => Ok(Self::Participant),
            "system" => Ok(Self::System),
            other => Err(ConsentError::InvalidInput(format!(
                "unknown actor role '{}'",
                other
            ))),
        }
    }
}

/// Authenticated identity supplied by the external identity layer.
/// The core trusts it completely and performs no authentication itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
}

/// Enumerated audit actions. Stored as their SCREAMING_SNAKE string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    StudyCreated,
    StudyUpdated,
    JoinCodeRegenerated,
    Enrolled,
    Unenrolled,
    ConsentGiven,
    ConsentEdited,
    Withdrawn,
    FileUploaded,
    ReceiptDownloaded,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StudyCreated => "STUDY_CREATED",
            Self::StudyUpdated => "STUDY_UPDATED",
            Self::JoinCodeRegenerated => "JOIN_CODE_REGENERATED",
            Self::Enrolled => "ENROLLED",
            Self::Unenrolled => "UNENROLLED",
            Self::ConsentGiven => "CONSENT_GIVEN",
            Self::ConsentEdited => "CONSENT_EDITED",
            Self::Withdrawn => "WITHDRAWN",
            Self::FileUploaded => "FILE_UPLOADED",
            Self::ReceiptDownloaded => "RECEIPT_DOWNLOADED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub summary: String,
    pub purpose: String,
    pub contact: String,
    pub status: StudyStatus,
    pub join_code: Option<String>,
    pub retention_default_days: i64,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCategory {
    pub id: i64,
    pub study_id: i64,
    pub name: String,
    pub description: String,
    pub required: bool,
    pub retention_days: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: i64,
    pub study_id: i64,
    pub participant_id: String,
    pub created_at: DateTime<Utc>,
}

/// One immutable consent version. Never updated or deleted by normal
/// operation; the current consent is the row with the maximum version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consent {
    pub id: i64,
    pub study_id: i64,
    pub participant_id: String,
    pub version: i64,
    pub granted: bool,
    pub withdrawn_at: Option<DateTime<Utc>>,
    pub receipt_hash: String,
    pub receipt_json: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentChoice {
    pub id: i64,
    pub consent_id: i64,
    pub category_id: i64,
    pub allowed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: i64,
    pub study_id: i64,
    pub participant_id: String,
    pub category_id: i64,
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

/// Hash-chained audit entry. `entry_hash` is the hex SHA-256 of
/// `prev_hash + action + details JSON + created_at`, with `prev_hash`
/// treated as the empty string for the first entry of a study.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub study_id: i64,
    pub actor_role: String,
    pub actor_id: Option<String>,
    pub action: String,
    pub details: serde_json::Value,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
    pub created_at: DateTime<Utc>,
}
