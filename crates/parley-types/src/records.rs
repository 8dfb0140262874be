//! Durable records exchanged with the datastore.

use crate::{Direction, TranscriptEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a durable call record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    InProgress,
    Completed,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields for a call record the worker creates itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCallRecord {
    pub tenant_id: String,
    pub config_id: Option<String>,
    pub direction: Direction,
    pub room_name: String,
    pub service_number: Option<String>,
    pub counterpart_number: Option<String>,
    pub provider_call_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// A call record found by one of the resolution strategies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecordMatch {
    pub id: String,
    pub direction: Direction,
    pub created_at: DateTime<Utc>,
}

/// A partial update to a call record. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallRecordUpdate {
    pub status: Option<CallStatus>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub transcript: Option<Vec<TranscriptEntry>>,
    pub summary: Option<String>,
    pub extracted_data: Option<serde_json::Value>,
}

impl CallRecordUpdate {
    /// Metadata-only completion.
    pub fn completed(ended_at: DateTime<Utc>, duration_seconds: i64) -> Self {
        Self {
            status: Some(CallStatus::Completed),
            ended_at: Some(ended_at),
            duration_seconds: Some(duration_seconds),
            ..Self::default()
        }
    }

    /// Whether this update writes any content derived from the conversation.
    pub fn carries_content(&self) -> bool {
        self.transcript.is_some() || self.summary.is_some() || self.extracted_data.is_some()
    }
}

/// Long-term memory of one counterpart for one tenant configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMemory {
    pub tenant_id: String,
    /// Normalised `+<digits>` phone number.
    pub contact_phone: String,
    pub config_id: String,
    pub contact_name: Option<String>,
    pub summary: Option<String>,
    pub topics: Vec<String>,
    pub interaction_count: u32,
    pub embedding: Option<Vec<f32>>,
    pub updated_at: DateTime<Utc>,
}

/// Another counterpart's memory that is similar to the current one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarMemory {
    pub contact_name: Option<String>,
    pub contact_phone: String,
    pub summary: Option<String>,
    pub topics: Vec<String>,
    /// Cosine similarity in `[0, 1]`.
    pub similarity: f32,
}

/// Phone admin credentials for a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminAccess {
    pub id: String,
    pub tenant_id: String,
    pub phone_number: String,
    pub display_name: String,
    /// `salt$sha256hex` of the spoken access code.
    pub code_hash: String,
    pub failed_attempts: u32,
    pub first_failure_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl AdminAccess {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

/// A value the caller volunteered during the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedData {
    pub tenant_id: String,
    pub call_record_id: Option<String>,
    pub room_name: String,
    pub data_type: String,
    pub data_value: String,
    pub context: String,
}
