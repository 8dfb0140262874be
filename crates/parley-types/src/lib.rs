//! Shared types and collaborator contracts for the Parley call worker.
//!
//! This crate provides the foundational types used across all Parley crates:
//! call direction and transcript entries, tenant configuration, durable
//! call and memory records, billing requests, and the traits through which
//! the session controller reaches rooms, the conversation engine, the
//! datastore, and telephony/integration vendors.
//!
//! No crate in the workspace depends on anything *except* `parley-types` for
//! cross-cutting type definitions. Adapters (`parley-db`, `parley-voice`)
//! implement the traits in [`ports`]; the controller (`parley-session`)
//! consumes them. Neither side depends on the other.

pub mod billing;
pub mod ports;
pub mod records;
pub mod tenant;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use billing::{BillingReceipt, BillingRequest};
pub use ports::{
    BookingConfirmation, BookingRequest, CapabilitySpec, ConversationEngine, Datastore,
    EngineSession, IntegrationGateway, PortError, RemoteParticipant, RoomProvider,
    TelephonyGateway, TransferRequest, WebhookContext,
};
pub use records::{
    AdminAccess, CallRecordMatch, CallRecordUpdate, CallStatus, CollectedData, ConversationMemory,
    NewCallRecord, SimilarMemory,
};
pub use tenant::{
    BookingSettings, CustomFunction, ExtractionVariable, MemorySettings, PiiMode,
    SemanticMemorySettings, SmsSettings, TenantConfig, TransferDestination, TransferSettings,
};

/// Participant attribute carrying the service number the counterpart dialled.
pub const ATTR_TRUNK_PHONE_NUMBER: &str = "sip.trunkPhoneNumber";

/// Participant attribute carrying the counterpart's own phone number.
pub const ATTR_PHONE_NUMBER: &str = "sip.phoneNumber";

/// Participant attribute carrying the telephony provider's call identifier.
pub const ATTR_CALL_ID: &str = "sip.callID";

/// Which side placed the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The counterpart called one of the tenant's service numbers.
    #[default]
    Inbound,
    /// The system dialled the counterpart on the tenant's behalf.
    Outbound,
}

impl Direction {
    /// Returns the lowercase wire/database label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            other => Err(format!("unknown call direction: {other}")),
        }
    }
}

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Agent,
    Caller,
}

impl Speaker {
    /// Maps a conversation-engine role to a speaker.
    ///
    /// Only `assistant` is the agent; every other role is the counterpart.
    pub fn from_role(role: &str) -> Self {
        if role.eq_ignore_ascii_case("assistant") {
            Self::Agent
        } else {
            Self::Caller
        }
    }

    /// Label used in plain-text transcripts.
    pub fn label(self) -> &'static str {
        match self {
            Self::Agent => "Agent",
            Self::Caller => "Caller",
        }
    }
}

/// A single utterance captured during the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

impl TranscriptEntry {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
        }
    }
}

/// Renders a transcript as `Label: text` lines.
pub fn format_transcript(entries: &[TranscriptEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}: {}", e.speaker.label(), e.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses `Label: text` lines back into entries.
///
/// Lines without a recognised label are appended to the previous entry, so a
/// rewritten transcript that wraps a long utterance keeps its structure.
/// Leading unlabeled lines are dropped.
pub fn parse_labeled_transcript(text: &str) -> Vec<TranscriptEntry> {
    let mut entries: Vec<TranscriptEntry> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let labeled = [Speaker::Agent, Speaker::Caller].into_iter().find_map(|s| {
            trimmed
                .strip_prefix(s.label())
                .and_then(|rest| rest.strip_prefix(':'))
                .map(|rest| (s, rest.trim()))
        });

        match (labeled, entries.last_mut()) {
            (Some((speaker, rest)), _) => entries.push(TranscriptEntry::new(speaker, rest)),
            (None, Some(last)) => {
                last.text.push(' ');
                last.text.push_str(trimmed);
            }
            (None, None) => {}
        }
    }

    entries
}

/// Normalises a phone number to `+<digits>`, dropping every other character.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    format!("+{digits}")
}
