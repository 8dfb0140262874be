//! Events delivered to a running call.
//!
//! Room callbacks, engine callbacks and capability invocations all arrive as
//! one [`SessionEvent`] stream and are handled by a single dispatch function,
//! one at a time.

use parley_types::RemoteParticipant;
use tokio::sync::oneshot;

/// An invocation of an exposed capability by the conversation engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

impl CapabilityCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// A non-empty string argument.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug)]
pub enum SessionEvent {
    ParticipantConnected(RemoteParticipant),
    ParticipantDisconnected {
        identity: String,
    },
    RoomDisconnected,
    /// The engine committed an utterance to its conversation history.
    ContentAdded {
        role: String,
        text: Option<String>,
    },
    SpeechStarted {
        role: String,
    },
    SpeechStopped {
        role: String,
    },
    /// The reply channel receives the capability's text result.
    Capability {
        call: CapabilityCall,
        reply: oneshot::Sender<String>,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ParticipantConnected(_) => "participant_connected",
            Self::ParticipantDisconnected { .. } => "participant_disconnected",
            Self::RoomDisconnected => "room_disconnected",
            Self::ContentAdded { .. } => "content_added",
            Self::SpeechStarted { .. } => "speech_started",
            Self::SpeechStopped { .. } => "speech_stopped",
            Self::Capability { .. } => "capability",
        }
    }
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    ParticipantDisconnected,
    RoomDisconnected,
    EndCallRequested,
    /// Every event sender was dropped.
    EventsClosed,
    EngineUnavailable,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParticipantDisconnected => "participant_disconnected",
            Self::RoomDisconnected => "room_disconnected",
            Self::EndCallRequested => "end_call",
            Self::EventsClosed => "events_closed",
            Self::EngineUnavailable => "engine_unavailable",
        }
    }

    /// Whether the worker should tear the room down itself.
    pub fn deletes_room(self) -> bool {
        !matches!(self, Self::RoomDisconnected)
    }
}
