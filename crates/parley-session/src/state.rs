//! Per-call mutable state.
//!
//! A [`CallSession`] is owned by exactly one controller and only touched from
//! that controller's task, so none of it needs a lock.

use chrono::{DateTime, Utc};
use parley_types::{Direction, Speaker, TranscriptEntry};

/// Progress of the once-only settlement sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupState {
    #[default]
    Pending,
    InProgress,
    Done,
}

/// State of an attended transfer, shared by the start/complete/cancel operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferState {
    pub active: bool,
    pub target_label: Option<String>,
}

/// Everything the controller knows about one call.
#[derive(Debug, Clone)]
pub struct CallSession {
    room_name: String,
    direction: Direction,
    tenant_id: String,
    config_id: Option<String>,
    counterpart_phone: Option<String>,
    counterpart_identity: Option<String>,
    service_number: Option<String>,
    provider_call_id: Option<String>,
    call_record_id: Option<String>,
    transcript: Vec<TranscriptEntry>,
    cleanup: CleanupState,
    billing_started_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new(
        room_name: impl Into<String>,
        tenant_id: impl Into<String>,
        direction: Direction,
        billing_started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            room_name: room_name.into(),
            direction,
            tenant_id: tenant_id.into(),
            config_id: None,
            counterpart_phone: None,
            counterpart_identity: None,
            service_number: None,
            provider_call_id: None,
            call_record_id: None,
            transcript: Vec::new(),
            cleanup: CleanupState::Pending,
            billing_started_at,
        }
    }

    pub fn with_config_id(mut self, config_id: Option<String>) -> Self {
        self.config_id = config_id;
        self
    }

    pub fn with_counterpart(mut self, phone: Option<String>, identity: Option<String>) -> Self {
        self.counterpart_phone = phone;
        self.counterpart_identity = identity;
        self
    }

    pub fn with_service_number(mut self, number: Option<String>) -> Self {
        self.service_number = number;
        self
    }

    pub fn with_provider_call_id(mut self, id: Option<String>) -> Self {
        self.provider_call_id = id;
        self
    }

    pub fn room_name(&self) -> &str {
        &self.room_name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn config_id(&self) -> Option<&str> {
        self.config_id.as_deref()
    }

    pub fn counterpart_phone(&self) -> Option<&str> {
        self.counterpart_phone.as_deref()
    }

    pub fn counterpart_identity(&self) -> Option<&str> {
        self.counterpart_identity.as_deref()
    }

    pub fn service_number(&self) -> Option<&str> {
        self.service_number.as_deref()
    }

    pub fn provider_call_id(&self) -> Option<&str> {
        self.provider_call_id.as_deref()
    }

    pub fn billing_started_at(&self) -> DateTime<Utc> {
        self.billing_started_at
    }

    /// Adopts a counterpart that joined after bootstrap. Known values are kept.
    pub fn adopt_counterpart(&mut self, identity: &str, phone: Option<&str>) {
        if self.counterpart_identity.is_none() {
            self.counterpart_identity = Some(identity.to_string());
        }
        if self.counterpart_phone.is_none() {
            self.counterpart_phone = phone.map(str::to_string);
        }
    }

    /// Whether a departing participant ends the call.
    ///
    /// Before the counterpart is known any departure counts.
    pub fn is_counterpart(&self, identity: &str) -> bool {
        self.counterpart_identity
            .as_deref()
            .map_or(true, |known| known == identity)
    }

    pub fn call_record_id(&self) -> Option<&str> {
        self.call_record_id.as_deref()
    }

    /// Binds the durable call record. The first binding wins; later attempts
    /// are ignored and return `false`.
    pub fn bind_call_record(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        match &self.call_record_id {
            Some(existing) => {
                if *existing != id {
                    tracing::debug!(
                        room = %self.room_name,
                        bound = %existing,
                        ignored = %id,
                        "call record already bound"
                    );
                }
                false
            }
            None => {
                self.call_record_id = Some(id);
                true
            }
        }
    }

    /// Appends an utterance. Empty text and anything arriving after cleanup
    /// has started are dropped.
    pub fn append_transcript(&mut self, speaker: Speaker, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() || self.cleanup != CleanupState::Pending {
            return false;
        }
        self.transcript.push(TranscriptEntry::new(speaker, text));
        true
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Characters of agent speech, the billable usage unit.
    pub fn agent_characters(&self) -> u64 {
        self.transcript
            .iter()
            .filter(|e| e.speaker == Speaker::Agent)
            .map(|e| e.text.chars().count() as u64)
            .sum()
    }

    pub fn cleanup_state(&self) -> CleanupState {
        self.cleanup
    }

    /// Moves `Pending` to `InProgress`. Returns `false` if cleanup had
    /// already begun, in which case the caller must do nothing.
    pub fn begin_cleanup(&mut self) -> bool {
        if self.cleanup != CleanupState::Pending {
            return false;
        }
        self.cleanup = CleanupState::InProgress;
        true
    }

    pub fn finish_cleanup(&mut self) {
        self.cleanup = CleanupState::Done;
    }
}
