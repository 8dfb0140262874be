//! Collaborator contracts the session controller depends on.
//!
//! Each trait is implemented once per process by an adapter crate and shared
//! across calls behind an `Arc`. Implementations must be safe to call
//! concurrently; the controller holds no locks while awaiting them.

use crate::billing::{BillingReceipt, BillingRequest};
use crate::records::{
    AdminAccess, CallRecordMatch, CallRecordUpdate, CollectedData, ConversationMemory,
    NewCallRecord, SimilarMemory,
};
use crate::tenant::{CustomFunction, TenantConfig};
use crate::TranscriptEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Failure reported by a collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("datastore error: {0}")]
    Store(String),

    #[error("vendor error: {0}")]
    Vendor(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("invalid request: {0}")]
    Invalid(String),
}

/// A remote party currently connected to a room.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteParticipant {
    pub identity: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl RemoteParticipant {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// A callable operation exposed to the conversation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments.
    pub parameters: serde_json::Value,
}

/// Everything the engine needs to run one interactive session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSession {
    pub room_name: String,
    pub instructions: String,
    pub capabilities: Vec<CapabilitySpec>,
    pub voice_id: String,
    pub llm_model: String,
    pub language: Option<String>,
    /// When false the engine transcribes but does not answer until re-enabled.
    pub auto_reply: bool,
}

/// Realtime room operations.
#[async_trait]
pub trait RoomProvider: Send + Sync {
    /// Joins the room as the agent participant.
    async fn connect(&self, room: &str) -> Result<(), PortError>;

    /// Lists the remote parties currently in the room.
    async fn remote_participants(&self, room: &str) -> Result<Vec<RemoteParticipant>, PortError>;

    /// Synthesises and plays `text` into the room.
    async fn say(&self, room: &str, text: &str, allow_interruptions: bool)
        -> Result<(), PortError>;

    /// Terminates the room, disconnecting every party.
    async fn delete_room(&self, room: &str) -> Result<(), PortError>;
}

/// Speech-to-text, language model and text-to-speech, as one capability.
#[async_trait]
pub trait ConversationEngine: Send + Sync {
    async fn start_session(&self, session: &EngineSession) -> Result<(), PortError>;

    async fn update_instructions(&self, room: &str, instructions: &str) -> Result<(), PortError>;

    async fn set_auto_reply(&self, room: &str, enabled: bool) -> Result<(), PortError>;

    /// Stops the session. No transcript events are emitted afterwards.
    async fn stop_session(&self, room: &str) -> Result<(), PortError>;

    /// Opens vendor connections ahead of the first turn.
    async fn prewarm(&self) -> Result<(), PortError>;

    async fn generate_text(&self, prompt: &str) -> Result<String, PortError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PortError>;
}

/// Durable configuration, call, memory and billing storage.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Tenant owning an active service number.
    async fn tenant_for_service_number(&self, number: &str) -> Result<Option<String>, PortError>;

    /// Tenant owning an externally ported number.
    async fn tenant_for_external_number(&self, number: &str)
        -> Result<Option<String>, PortError>;

    /// Loads a tenant configuration; `config_id` selects one when the tenant has several.
    async fn tenant_config(
        &self,
        tenant_id: &str,
        config_id: Option<&str>,
    ) -> Result<Option<TenantConfig>, PortError>;

    async fn call_record_by_provider_id(
        &self,
        provider_call_id: &str,
    ) -> Result<Option<CallRecordMatch>, PortError>;

    /// Newest call record for a tenant created at or after `since`,
    /// restricted to `service_number` when given.
    async fn recent_call_record(
        &self,
        tenant_id: &str,
        service_number: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Option<CallRecordMatch>, PortError>;

    async fn create_call_record(&self, record: &NewCallRecord) -> Result<String, PortError>;

    async fn update_call_record(
        &self,
        id: &str,
        update: &CallRecordUpdate,
    ) -> Result<(), PortError>;

    async fn save_partial_transcript(
        &self,
        id: &str,
        transcript: &[TranscriptEntry],
    ) -> Result<(), PortError>;

    async fn conversation_memory(
        &self,
        tenant_id: &str,
        contact_phone: &str,
        config_id: &str,
    ) -> Result<Option<ConversationMemory>, PortError>;

    async fn similar_memories(
        &self,
        tenant_id: &str,
        config_id: &str,
        embedding: &[f32],
        exclude_phone: &str,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarMemory>, PortError>;

    async fn save_conversation_memory(&self, memory: &ConversationMemory)
        -> Result<(), PortError>;

    async fn admin_access(
        &self,
        tenant_id: &str,
        phone: &str,
    ) -> Result<Option<AdminAccess>, PortError>;

    /// Persists the failure counters and lock of an admin record.
    async fn save_admin_lockout(&self, access: &AdminAccess) -> Result<(), PortError>;

    async fn record_collected_data(&self, data: &CollectedData) -> Result<(), PortError>;

    /// Credential of the tenant's connected calendar, if any.
    async fn calendar_credential(&self, tenant_id: &str) -> Result<Option<String>, PortError>;

    /// Deducts call usage from the tenant balance. Idempotent per `reference_id`.
    async fn deduct(&self, request: &BillingRequest) -> Result<BillingReceipt, PortError>;
}

/// A call leg to move to another number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub room_name: String,
    pub participant_identity: Option<String>,
    pub provider_call_id: Option<String>,
    pub target_label: String,
    pub destination: String,
    pub caller_id: Option<String>,
    /// Number the counterpart reached; routes legs back into the room.
    pub service_number: Option<String>,
}

/// Telephony provider operations.
#[async_trait]
pub trait TelephonyGateway: Send + Sync {
    /// Blind transfer of the counterpart to `request.destination`.
    async fn transfer_call(&self, request: &TransferRequest) -> Result<(), PortError>;

    /// Holds the counterpart and dials the destination into the room.
    async fn start_warm_transfer(&self, request: &TransferRequest) -> Result<(), PortError>;

    /// Bridges the held counterpart with the destination.
    async fn complete_warm_transfer(&self, room: &str) -> Result<(), PortError>;

    /// Hangs up the destination and takes the counterpart off hold.
    async fn cancel_warm_transfer(&self, room: &str) -> Result<(), PortError>;

    async fn send_sms(&self, from: &str, to: &str, body: &str) -> Result<(), PortError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub event_type_id: Option<i64>,
    /// ISO-8601 start time.
    pub start_time: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConfirmation {
    pub booking_id: String,
    pub start_time: String,
}

/// Who a webhook invocation is made for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookContext {
    pub tenant_id: String,
    pub room_name: String,
    pub counterpart_phone: Option<String>,
    pub call_record_id: Option<String>,
}

/// Calendar and tenant webhook operations.
#[async_trait]
pub trait IntegrationGateway: Send + Sync {
    async fn available_slots(
        &self,
        credential: &str,
        event_type_id: Option<i64>,
        date: &str,
    ) -> Result<Vec<String>, PortError>;

    async fn book_appointment(
        &self,
        credential: &str,
        request: &BookingRequest,
    ) -> Result<BookingConfirmation, PortError>;

    /// Calls a tenant webhook and returns its response body.
    async fn invoke_webhook(
        &self,
        function: &CustomFunction,
        arguments: &serde_json::Value,
        context: &WebhookContext,
    ) -> Result<String, PortError>;
}
