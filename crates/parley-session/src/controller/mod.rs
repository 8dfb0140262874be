//! The per-call event loop.
//!
//! [`run_call`] drives one call from bootstrap to settlement. After
//! bootstrap, every room event, engine event, capability invocation and
//! timer expiry is handled by [`CallController`] on a single task, so the
//! session state needs no locking and each handler runs to its first await
//! before the next event is looked at.

mod admin;
mod capabilities;

use crate::admin_auth::{AdminChallenge, ChallengePhase};
use crate::bootstrap::{self, Bootstrap, RoomMetadata};
use crate::capability::{self, CapabilitySet, Preconditions};
use crate::event::{EndReason, SessionEvent};
use crate::memory;
use crate::prompt::{self, PromptContext};
use crate::settings::SessionSettings;
use crate::settlement::{self, SettlementReport};
use crate::state::{CallSession, CleanupState, TransferState};
use crate::transcript::PartialSaveThrottle;
use crate::{Services, SessionError};
use chrono::{DateTime, Utc};
use parley_types::{
    normalize_phone, AdminAccess, Direction, EngineSession, PiiMode, Speaker, TenantConfig,
    ATTR_PHONE_NUMBER, ATTR_TRUNK_PHONE_NUMBER,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

/// Recorded in place of a spoken access code.
const WITHHELD_CODE: &str = "[access code withheld]";

const ENGINE_FAILURE_MESSAGE: &str =
    "Sorry, we're having technical difficulties. Please call back later.";

/// How a call's handling ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// No tenant or configuration could be found; the caller was told and
    /// the room deleted.
    Rejected,
    /// The call ended while bootstrap was still waiting for the caller. The
    /// engine never started and nothing was recorded or billed.
    Abandoned(EndReason),
    Settled(SettlementReport),
}

/// Handles one call. Never panics on collaborator failures.
pub async fn run_call(
    services: Services,
    settings: Arc<SessionSettings>,
    room_name: String,
    metadata: &str,
    mut events: mpsc::Receiver<SessionEvent>,
) -> CallOutcome {
    let metadata = RoomMetadata::parse(metadata);
    let started_at = Utc::now();

    let mut boot =
        match bootstrap::bootstrap(&services, &settings, &room_name, &metadata, &mut events, started_at)
            .await
        {
            Ok(boot) => boot,
            Err(SessionError::EndedDuringBootstrap { reason, .. }) => {
                tracing::info!(room = %room_name, ?reason, "call ended during bootstrap");
                abandon(&services, &room_name, reason).await;
                return CallOutcome::Abandoned(reason);
            }
            Err(e) => {
                tracing::warn!(room = %room_name, error = %e, "rejecting call");
                reject(&services, &settings, &room_name).await;
                return CallOutcome::Rejected;
            }
        };

    let config = match services
        .store
        .tenant_config(&boot.tenant_id, boot.config_id.as_deref())
        .await
    {
        Ok(Some(config)) => config,
        Ok(None) => {
            tracing::warn!(room = %room_name, tenant_id = %boot.tenant_id, "tenant has no configuration");
            reject(&services, &settings, &room_name).await;
            return CallOutcome::Rejected;
        }
        Err(e) => {
            tracing::error!(room = %room_name, tenant_id = %boot.tenant_id, error = %e, "configuration lookup failed");
            reject(&services, &settings, &room_name).await;
            return CallOutcome::Rejected;
        }
    };

    let deferred = std::mem::take(&mut boot.deferred);
    let mut controller =
        CallController::prepare(services, settings, room_name, config, boot, started_at).await;
    controller.start().await;
    for event in deferred {
        controller.dispatch(event).await;
    }
    controller.run(events).await
}

async fn reject(services: &Services, settings: &SessionSettings, room: &str) {
    if let Err(e) = services
        .rooms
        .say(room, &settings.unassigned_message, false)
        .await
    {
        tracing::warn!(room, error = %e, "failed to speak rejection");
    }
    if let Err(e) = services.rooms.delete_room(room).await {
        tracing::warn!(room, error = %e, "failed to delete rejected room");
    }
}

async fn abandon(services: &Services, room: &str, reason: EndReason) {
    if !reason.deletes_room() {
        return;
    }
    if let Err(e) = services.rooms.delete_room(room).await {
        tracing::warn!(room, error = %e, "failed to delete abandoned room");
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// State and collaborators of one running call.
pub struct CallController {
    services: Services,
    settings: Arc<SessionSettings>,
    config: TenantConfig,
    session: CallSession,
    capabilities: CapabilitySet,
    preconditions: Preconditions,
    transfer: TransferState,
    admin: Option<AdminChallenge>,
    throttle: PartialSaveThrottle,
    base_instructions: String,
    instructions: String,
    report: Option<SettlementReport>,
}

impl CallController {
    /// Builds the session, instructions and capability set for a resolved call.
    pub async fn prepare(
        services: Services,
        settings: Arc<SessionSettings>,
        room_name: String,
        config: TenantConfig,
        boot: Bootstrap,
        started_at: DateTime<Utc>,
    ) -> Self {
        let mut session = CallSession::new(room_name, boot.tenant_id, boot.direction, started_at)
            .with_config_id(boot.config_id.or_else(|| Some(config.id.clone())))
            .with_counterpart(boot.counterpart_phone, boot.counterpart_identity)
            .with_service_number(boot.service_number)
            .with_provider_call_id(boot.provider_call_id);
        if let Some(id) = boot.call_record_id {
            session.bind_call_record(id);
        }

        let mut preconditions = Preconditions::default();
        if config.booking.enabled {
            match services.store.calendar_credential(session.tenant_id()).await {
                Ok(credential) => preconditions.calendar_credential = credential,
                Err(e) => tracing::warn!(tenant_id = %session.tenant_id(), error = %e, "calendar credential lookup failed"),
            }
        }
        let capabilities = capability::assemble(&config, &preconditions);

        let memory = memory::load_context(&services, &config, session.counterpart_phone()).await;
        let instructions = prompt::build_instructions(&PromptContext {
            config: &config,
            direction: session.direction(),
            memory: memory.memory.as_ref(),
            similar: &memory.similar,
        });

        let throttle = PartialSaveThrottle::new(settings.partial_save_interval());
        Self {
            services,
            settings,
            config,
            session,
            capabilities,
            preconditions,
            transfer: TransferState::default(),
            admin: None,
            throttle,
            base_instructions: instructions.clone(),
            instructions,
            report: None,
        }
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn transfer_state(&self) -> &TransferState {
        &self.transfer
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn admin_phase(&self) -> Option<ChallengePhase> {
        self.admin.as_ref().map(AdminChallenge::phase)
    }

    pub fn report(&self) -> Option<&SettlementReport> {
        self.report.as_ref()
    }

    /// Starts the engine session and applies the greeting policy.
    pub async fn start(&mut self) {
        let admin = self.lookup_admin().await;
        let engine_session = EngineSession {
            room_name: self.session.room_name().to_string(),
            instructions: self.instructions.clone(),
            capabilities: self.capabilities.specs(),
            voice_id: self.config.voice_id.clone(),
            llm_model: self.config.llm_model.clone(),
            language: self.config.language.clone(),
            auto_reply: admin.is_none(),
        };
        if let Err(e) = self.services.engine.start_session(&engine_session).await {
            tracing::error!(room = %self.session.room_name(), error = %e, "engine failed to start");
            self.say(ENGINE_FAILURE_MESSAGE, false).await;
            self.terminate(EndReason::EngineUnavailable).await;
            return;
        }

        match (self.session.direction(), admin) {
            (Direction::Inbound, Some(access)) => {
                let challenge = AdminChallenge::begin(access, Instant::now(), &self.settings);
                tracing::info!(room = %self.session.room_name(), "starting admin identity check");
                self.say(&challenge.identity_question(), false).await;
                self.admin = Some(challenge);
            }
            (Direction::Inbound, None) => {
                self.say(&prompt::greeting(&self.config), true).await;
            }
            (Direction::Outbound, _) => {
                let engine = Arc::clone(&self.services.engine);
                tokio::spawn(async move {
                    if let Err(e) = engine.prewarm().await {
                        tracing::debug!(error = %e, "engine prewarm failed");
                    }
                });
            }
        }
    }

    async fn lookup_admin(&self) -> Option<AdminAccess> {
        if self.session.direction() != Direction::Inbound {
            return None;
        }
        let phone = self.session.counterpart_phone()?;
        match self
            .services
            .store
            .admin_access(self.session.tenant_id(), phone)
            .await
        {
            Ok(Some(access)) if access.is_locked(Utc::now()) => {
                tracing::info!(room = %self.session.room_name(), "admin access locked, treating as regular call");
                None
            }
            Ok(access) => access,
            Err(e) => {
                tracing::warn!(room = %self.session.room_name(), error = %e, "admin access lookup failed");
                None
            }
        }
    }

    /// Processes events until settlement has run.
    pub async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) -> CallOutcome {
        while self.session.cleanup_state() == CleanupState::Pending {
            let deadline = self.next_deadline();
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => self.terminate(EndReason::EventsClosed).await,
                },
                _ = sleep_until_some(deadline) => self.on_timer(Instant::now()).await,
            }
        }
        CallOutcome::Settled(self.report.take().unwrap_or_default())
    }

    fn next_deadline(&self) -> Option<Instant> {
        let admin = self.admin.as_ref().map(AdminChallenge::deadline);
        let save = self.throttle.due_at();
        match (admin, save) {
            (Some(a), Some(s)) => Some(a.min(s)),
            (a, s) => a.or(s),
        }
    }

    async fn on_timer(&mut self, now: Instant) {
        if self.admin.as_ref().is_some_and(|c| c.deadline() <= now) {
            self.on_admin_timeout().await;
        }
        if self.throttle.take_due(now) {
            self.spawn_partial_save();
        }
    }

    /// Handles one event.
    pub async fn dispatch(&mut self, event: SessionEvent) {
        tracing::trace!(room = %self.session.room_name(), kind = event.kind(), "event");
        match event {
            SessionEvent::ParticipantConnected(participant) => {
                let phone = participant.attribute(ATTR_PHONE_NUMBER).map(normalize_phone);
                if phone.is_some() || participant.attribute(ATTR_TRUNK_PHONE_NUMBER).is_some() {
                    self.session
                        .adopt_counterpart(&participant.identity, phone.as_deref());
                }
            }
            SessionEvent::ParticipantDisconnected { identity } => {
                if self.session.is_counterpart(&identity) {
                    self.terminate(EndReason::ParticipantDisconnected).await;
                } else {
                    tracing::debug!(room = %self.session.room_name(), identity = %identity, "non-counterpart left");
                }
            }
            SessionEvent::RoomDisconnected => self.terminate(EndReason::RoomDisconnected).await,
            SessionEvent::ContentAdded { role, text } => {
                self.on_content(&role, text.as_deref()).await;
            }
            SessionEvent::SpeechStarted { role } | SessionEvent::SpeechStopped { role } => {
                tracing::debug!(room = %self.session.room_name(), role = %role, "speech activity");
            }
            SessionEvent::Capability { call, reply } => {
                let (result, end_call) = if self.session.cleanup_state() == CleanupState::Pending {
                    self.invoke(&call).await
                } else {
                    ("The call has already ended.".to_string(), false)
                };
                if reply.send(result).is_err() {
                    tracing::debug!(room = %self.session.room_name(), capability = %call.name, "capability caller went away");
                }
                if end_call {
                    self.terminate(EndReason::EndCallRequested).await;
                }
            }
        }
    }

    async fn on_content(&mut self, role: &str, text: Option<&str>) {
        let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
            tracing::debug!(room = %self.session.room_name(), role, "content event without text");
            return;
        };
        let speaker = Speaker::from_role(role);
        let withhold = speaker == Speaker::Caller
            && self.admin.as_ref().is_some_and(AdminChallenge::expects_code);
        let recorded = if withhold { WITHHELD_CODE } else { text };

        if self.session.append_transcript(speaker, recorded)
            && self.partial_saves_enabled()
            && self.throttle.on_append(Instant::now())
        {
            self.spawn_partial_save();
        }

        if speaker == Speaker::Caller && self.admin.is_some() {
            self.on_admin_text(text).await;
        }
    }

    fn partial_saves_enabled(&self) -> bool {
        self.config.pii_mode == PiiMode::Enabled && self.session.call_record_id().is_some()
    }

    fn spawn_partial_save(&self) {
        let Some(id) = self.session.call_record_id().map(str::to_string) else {
            return;
        };
        let store = Arc::clone(&self.services.store);
        let snapshot = self.session.transcript().to_vec();
        tokio::spawn(async move {
            if let Err(e) = store.save_partial_transcript(&id, &snapshot).await {
                tracing::warn!(call_record_id = %id, error = %e, "partial transcript save failed");
            }
        });
    }

    /// Ends the call. Only the first call has any effect.
    pub async fn terminate(&mut self, reason: EndReason) {
        let Some(report) = settlement::settle(
            &self.services,
            &self.settings,
            &self.config,
            &mut self.session,
            Utc::now(),
        )
        .await
        else {
            return;
        };
        tracing::info!(room = %self.session.room_name(), reason = reason.as_str(), "call ended");
        self.throttle.cancel();
        self.admin = None;
        if reason.deletes_room() {
            if let Err(e) = self.services.rooms.delete_room(self.session.room_name()).await {
                tracing::warn!(room = %self.session.room_name(), error = %e, "failed to delete room");
            }
        }
        self.report = Some(report);
    }

    async fn say(&self, text: &str, allow_interruptions: bool) {
        if let Err(e) = self
            .services
            .rooms
            .say(self.session.room_name(), text, allow_interruptions)
            .await
        {
            tracing::warn!(room = %self.session.room_name(), error = %e, "failed to speak");
        }
    }
}
