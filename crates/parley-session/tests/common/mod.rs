//! Recording in-memory collaborators for controller tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_session::{Bootstrap, CallController, Services, SessionEvent, SessionSettings};
use parley_types::{
    AdminAccess, BillingReceipt, BillingRequest, BookingConfirmation, BookingRequest,
    CallRecordMatch, CallRecordUpdate, CollectedData, ConversationEngine, ConversationMemory,
    CustomFunction, Datastore, Direction, EngineSession, IntegrationGateway, NewCallRecord,
    PortError, RemoteParticipant, RoomProvider, SimilarMemory, TelephonyGateway, TenantConfig,
    TranscriptEntry, TransferRequest, WebhookContext, ATTR_CALL_ID, ATTR_PHONE_NUMBER,
    ATTR_TRUNK_PHONE_NUMBER,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

pub const ROOM: &str = "room-1";
pub const TENANT: &str = "tenant-1";
pub const SERVICE_NUMBER: &str = "+15550001000";
pub const CALLER: &str = "+15550102000";
pub const CALLER_IDENTITY: &str = "sip_caller";

#[derive(Default)]
pub struct FakeRooms {
    pub participants: Mutex<Vec<RemoteParticipant>>,
    pub list_calls: AtomicUsize,
    pub connected: Mutex<Vec<String>>,
    pub said: Mutex<Vec<(String, bool)>>,
    pub deleted: Mutex<Vec<String>>,
}

impl FakeRooms {
    pub fn said_texts(&self) -> Vec<String> {
        self.said.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }
}

#[async_trait]
impl RoomProvider for FakeRooms {
    async fn connect(&self, room: &str) -> Result<(), PortError> {
        self.connected.lock().unwrap().push(room.to_string());
        Ok(())
    }

    async fn remote_participants(&self, _room: &str) -> Result<Vec<RemoteParticipant>, PortError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.participants.lock().unwrap().clone())
    }

    async fn say(&self, _room: &str, text: &str, allow_interruptions: bool) -> Result<(), PortError> {
        self.said
            .lock()
            .unwrap()
            .push((text.to_string(), allow_interruptions));
        Ok(())
    }

    async fn delete_room(&self, room: &str) -> Result<(), PortError> {
        self.deleted.lock().unwrap().push(room.to_string());
        Ok(())
    }
}

/// Engine whose text generation is keyed on the prompt's opening words.
#[derive(Default)]
pub struct FakeEngine {
    pub started: Mutex<Vec<EngineSession>>,
    pub stopped: Mutex<Vec<String>>,
    pub instruction_updates: Mutex<Vec<String>>,
    pub auto_reply: Mutex<Vec<bool>>,
    pub prompts: Mutex<Vec<String>>,
    /// Tokens the redaction task replaces with `[REDACTED]`.
    pub pii_tokens: Vec<String>,
    pub fail_redaction: AtomicBool,
    pub fail_start: AtomicBool,
}

impl FakeEngine {
    pub fn with_pii(tokens: &[&str]) -> Self {
        Self {
            pii_tokens: tokens.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn generation_prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

fn transcript_part(prompt: &str) -> &str {
    prompt.split_once("Transcript:\n").map_or("", |(_, t)| t)
}

#[async_trait]
impl ConversationEngine for FakeEngine {
    async fn start_session(&self, session: &EngineSession) -> Result<(), PortError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(PortError::Vendor("engine down".into()));
        }
        self.started.lock().unwrap().push(session.clone());
        Ok(())
    }

    async fn update_instructions(&self, _room: &str, instructions: &str) -> Result<(), PortError> {
        self.instruction_updates
            .lock()
            .unwrap()
            .push(instructions.to_string());
        Ok(())
    }

    async fn set_auto_reply(&self, _room: &str, enabled: bool) -> Result<(), PortError> {
        self.auto_reply.lock().unwrap().push(enabled);
        Ok(())
    }

    async fn stop_session(&self, room: &str) -> Result<(), PortError> {
        self.stopped.lock().unwrap().push(room.to_string());
        Ok(())
    }

    async fn prewarm(&self) -> Result<(), PortError> {
        Ok(())
    }

    async fn generate_text(&self, prompt: &str) -> Result<String, PortError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.starts_with("Remove all personally identifiable information") {
            if self.fail_redaction.load(Ordering::SeqCst) {
                return Err(PortError::Vendor("redaction unavailable".into()));
            }
            let mut text = transcript_part(prompt).to_string();
            for token in &self.pii_tokens {
                text = text.replace(token.as_str(), "[REDACTED]");
            }
            return Ok(text);
        }
        if prompt.starts_with("Summarize this phone call") {
            let transcript = transcript_part(prompt);
            return Ok(format!("Summary of: {}", transcript.replace('\n', " | ")));
        }
        if prompt.starts_with("Extract the following fields") {
            return Ok(r#"{"reason": "order status"}"#.to_string());
        }
        if prompt.starts_with("List the main topics") {
            return Ok(r#"["orders", "delivery"]"#.to_string());
        }
        if prompt.starts_with("Merge these two summaries") {
            return Ok("Merged summary.".to_string());
        }
        Err(PortError::Invalid("unexpected prompt".into()))
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, PortError> {
        Ok(vec![1.0, 0.0, 0.0])
    }
}

/// A call record the fake store already holds.
#[derive(Debug, Clone)]
pub struct SeededRecord {
    pub id: String,
    pub tenant_id: String,
    pub service_number: Option<String>,
    pub provider_call_id: Option<String>,
    pub direction: Direction,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct FakeStore {
    pub service_numbers: HashMap<String, String>,
    pub external_numbers: HashMap<String, String>,
    pub configs: HashMap<String, TenantConfig>,
    pub records: Vec<SeededRecord>,
    pub memories: Mutex<Vec<ConversationMemory>>,
    pub similar: Vec<SimilarMemory>,
    pub admin: Mutex<Option<AdminAccess>>,
    pub calendar_credential: Option<String>,
    pub fail_lookups: AtomicBool,

    pub created: Mutex<Vec<NewCallRecord>>,
    pub updates: Mutex<Vec<(String, CallRecordUpdate)>>,
    pub partials: Mutex<Vec<(String, Vec<TranscriptEntry>)>>,
    pub saved_memories: Mutex<Vec<ConversationMemory>>,
    pub lockouts: Mutex<Vec<AdminAccess>>,
    pub collected: Mutex<Vec<CollectedData>>,
    pub deductions: Mutex<Vec<BillingRequest>>,
}

impl FakeStore {
    /// A store that routes `SERVICE_NUMBER` to `TENANT` with `config`.
    pub fn with_tenant(config: TenantConfig) -> Self {
        let mut store = Self::default();
        store
            .service_numbers
            .insert(SERVICE_NUMBER.to_string(), TENANT.to_string());
        store.configs.insert(TENANT.to_string(), config);
        store
    }

    fn check(&self) -> Result<(), PortError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(PortError::Store("database unavailable".into()));
        }
        Ok(())
    }

    fn to_match(record: &SeededRecord) -> CallRecordMatch {
        CallRecordMatch {
            id: record.id.clone(),
            direction: record.direction,
            created_at: record.created_at,
        }
    }
}

#[async_trait]
impl Datastore for FakeStore {
    async fn tenant_for_service_number(&self, number: &str) -> Result<Option<String>, PortError> {
        self.check()?;
        Ok(self.service_numbers.get(number).cloned())
    }

    async fn tenant_for_external_number(&self, number: &str) -> Result<Option<String>, PortError> {
        self.check()?;
        Ok(self.external_numbers.get(number).cloned())
    }

    async fn tenant_config(
        &self,
        tenant_id: &str,
        _config_id: Option<&str>,
    ) -> Result<Option<TenantConfig>, PortError> {
        Ok(self.configs.get(tenant_id).cloned())
    }

    async fn call_record_by_provider_id(
        &self,
        provider_call_id: &str,
    ) -> Result<Option<CallRecordMatch>, PortError> {
        self.check()?;
        Ok(self
            .records
            .iter()
            .find(|r| r.provider_call_id.as_deref() == Some(provider_call_id))
            .map(Self::to_match))
    }

    async fn recent_call_record(
        &self,
        tenant_id: &str,
        service_number: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Option<CallRecordMatch>, PortError> {
        self.check()?;
        Ok(self
            .records
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.created_at >= since)
            .filter(|r| service_number.is_none() || r.service_number.as_deref() == service_number)
            .max_by_key(|r| r.created_at)
            .map(Self::to_match))
    }

    async fn create_call_record(&self, record: &NewCallRecord) -> Result<String, PortError> {
        let mut created = self.created.lock().unwrap();
        created.push(record.clone());
        Ok(format!("created-{}", created.len()))
    }

    async fn update_call_record(&self, id: &str, update: &CallRecordUpdate) -> Result<(), PortError> {
        self.updates
            .lock()
            .unwrap()
            .push((id.to_string(), update.clone()));
        Ok(())
    }

    async fn save_partial_transcript(
        &self,
        id: &str,
        transcript: &[TranscriptEntry],
    ) -> Result<(), PortError> {
        self.partials
            .lock()
            .unwrap()
            .push((id.to_string(), transcript.to_vec()));
        Ok(())
    }

    async fn conversation_memory(
        &self,
        tenant_id: &str,
        contact_phone: &str,
        config_id: &str,
    ) -> Result<Option<ConversationMemory>, PortError> {
        Ok(self
            .memories
            .lock()
            .unwrap()
            .iter()
            .find(|m| {
                m.tenant_id == tenant_id
                    && m.contact_phone == contact_phone
                    && m.config_id == config_id
            })
            .cloned())
    }

    async fn similar_memories(
        &self,
        _tenant_id: &str,
        _config_id: &str,
        _embedding: &[f32],
        _exclude_phone: &str,
        _threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarMemory>, PortError> {
        Ok(self.similar.iter().take(limit).cloned().collect())
    }

    async fn save_conversation_memory(&self, memory: &ConversationMemory) -> Result<(), PortError> {
        self.saved_memories.lock().unwrap().push(memory.clone());
        Ok(())
    }

    async fn admin_access(&self, tenant_id: &str, phone: &str) -> Result<Option<AdminAccess>, PortError> {
        Ok(self
            .admin
            .lock()
            .unwrap()
            .clone()
            .filter(|a| a.tenant_id == tenant_id && a.phone_number == phone))
    }

    async fn save_admin_lockout(&self, access: &AdminAccess) -> Result<(), PortError> {
        self.lockouts.lock().unwrap().push(access.clone());
        Ok(())
    }

    async fn record_collected_data(&self, data: &CollectedData) -> Result<(), PortError> {
        self.collected.lock().unwrap().push(data.clone());
        Ok(())
    }

    async fn calendar_credential(&self, _tenant_id: &str) -> Result<Option<String>, PortError> {
        Ok(self.calendar_credential.clone())
    }

    async fn deduct(&self, request: &BillingRequest) -> Result<BillingReceipt, PortError> {
        self.deductions.lock().unwrap().push(request.clone());
        Ok(BillingReceipt {
            success: true,
            cost: 0.01,
        })
    }
}

#[derive(Default)]
pub struct FakeTelephony {
    pub calls: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl FakeTelephony {
    fn record(&self, call: String) -> Result<(), PortError> {
        self.calls.lock().unwrap().push(call);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Vendor("carrier rejected request".into()));
        }
        Ok(())
    }

    pub fn recorded(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelephonyGateway for FakeTelephony {
    async fn transfer_call(&self, request: &TransferRequest) -> Result<(), PortError> {
        self.record(format!("transfer:{}", request.destination))
    }

    async fn start_warm_transfer(&self, request: &TransferRequest) -> Result<(), PortError> {
        self.record(format!("warm_start:{}", request.target_label))
    }

    async fn complete_warm_transfer(&self, _room: &str) -> Result<(), PortError> {
        self.record("warm_complete".to_string())
    }

    async fn cancel_warm_transfer(&self, _room: &str) -> Result<(), PortError> {
        self.record("warm_cancel".to_string())
    }

    async fn send_sms(&self, from: &str, to: &str, body: &str) -> Result<(), PortError> {
        self.record(format!("sms:{from}->{to}:{body}"))
    }
}

#[derive(Default)]
pub struct FakeIntegrations {
    pub slots: Vec<String>,
    pub webhook_response: String,
    pub webhook_calls: Mutex<Vec<(String, serde_json::Value, WebhookContext)>>,
}

#[async_trait]
impl IntegrationGateway for FakeIntegrations {
    async fn available_slots(
        &self,
        _credential: &str,
        _event_type_id: Option<i64>,
        _date: &str,
    ) -> Result<Vec<String>, PortError> {
        Ok(self.slots.clone())
    }

    async fn book_appointment(
        &self,
        _credential: &str,
        request: &BookingRequest,
    ) -> Result<BookingConfirmation, PortError> {
        Ok(BookingConfirmation {
            booking_id: "bk-1".to_string(),
            start_time: request.start_time.clone(),
        })
    }

    async fn invoke_webhook(
        &self,
        function: &CustomFunction,
        arguments: &serde_json::Value,
        context: &WebhookContext,
    ) -> Result<String, PortError> {
        self.webhook_calls.lock().unwrap().push((
            function.name.clone(),
            arguments.clone(),
            context.clone(),
        ));
        Ok(self.webhook_response.clone())
    }
}

pub struct Harness {
    pub rooms: Arc<FakeRooms>,
    pub engine: Arc<FakeEngine>,
    pub store: Arc<FakeStore>,
    pub telephony: Arc<FakeTelephony>,
    pub integrations: Arc<FakeIntegrations>,
}

impl Harness {
    pub fn new(store: FakeStore) -> Self {
        Self::with_parts(store, FakeEngine::default(), FakeIntegrations::default())
    }

    pub fn with_parts(store: FakeStore, engine: FakeEngine, integrations: FakeIntegrations) -> Self {
        Self {
            rooms: Arc::new(FakeRooms::default()),
            engine: Arc::new(engine),
            store: Arc::new(store),
            telephony: Arc::new(FakeTelephony::default()),
            integrations: Arc::new(integrations),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            rooms: self.rooms.clone(),
            engine: self.engine.clone(),
            store: self.store.clone(),
            telephony: self.telephony.clone(),
            integrations: self.integrations.clone(),
        }
    }

    /// A controller for an inbound call whose counterpart is already known.
    pub async fn controller(
        &self,
        direction: Direction,
        call_record_id: Option<&str>,
        started_at: DateTime<Utc>,
    ) -> CallController {
        let config = self
            .store
            .configs
            .get(TENANT)
            .cloned()
            .unwrap_or_else(|| TenantConfig::new("cfg-1", TENANT));
        let boot = Bootstrap {
            tenant_id: TENANT.to_string(),
            direction,
            counterpart_phone: Some(CALLER.to_string()),
            counterpart_identity: Some(CALLER_IDENTITY.to_string()),
            service_number: Some(SERVICE_NUMBER.to_string()),
            call_record_id: call_record_id.map(str::to_string),
            ..Bootstrap::default()
        };
        CallController::prepare(self.services(), settings(), ROOM.to_string(), config, boot, started_at)
            .await
    }
}

pub fn settings() -> Arc<SessionSettings> {
    Arc::new(SessionSettings::default())
}

pub fn config() -> TenantConfig {
    TenantConfig::new("cfg-1", TENANT)
}

pub fn sip_participant(trunk: &str, phone: &str, call_id: &str) -> RemoteParticipant {
    let mut attributes = HashMap::new();
    attributes.insert(ATTR_TRUNK_PHONE_NUMBER.to_string(), trunk.to_string());
    attributes.insert(ATTR_PHONE_NUMBER.to_string(), phone.to_string());
    attributes.insert(ATTR_CALL_ID.to_string(), call_id.to_string());
    RemoteParticipant {
        identity: CALLER_IDENTITY.to_string(),
        attributes,
    }
}

pub fn content(role: &str, text: &str) -> SessionEvent {
    SessionEvent::ContentAdded {
        role: role.to_string(),
        text: Some(text.to_string()),
    }
}

/// Dispatches a capability call and returns its reply.
pub async fn invoke(
    controller: &mut CallController,
    name: &str,
    arguments: serde_json::Value,
) -> String {
    let (reply, rx) = oneshot::channel();
    controller
        .dispatch(SessionEvent::Capability {
            call: parley_session::CapabilityCall::new(name, arguments),
            reply,
        })
        .await;
    rx.await.unwrap()
}
