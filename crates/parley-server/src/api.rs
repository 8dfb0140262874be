//! HTTP handlers for dispatch and session events.

use crate::registry::DeliveryError;
use crate::{spawn_call, AppState};
use axum::{
    body::Bytes,
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use parley_session::{CapabilityCall, SessionEvent};
use parley_types::RemoteParticipant;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("gone: {0}")]
    Gone(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("gateway timeout: {0}")]
    Timeout(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Gone(msg) => (StatusCode::GONE, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<DeliveryError> for ApiError {
    fn from(e: DeliveryError) -> Self {
        match e {
            DeliveryError::NotRunning(_) => ApiError::NotFound(e.to_string()),
            DeliveryError::Closed(_) => ApiError::Gone(e.to_string()),
        }
    }
}

/// Request body for `POST /api/dispatch`.
#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub room_name: String,
    /// Raw room metadata JSON, as set by whoever created the room.
    #[serde(default)]
    pub metadata: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub room_name: String,
}

/// Handler for `POST /api/dispatch`.
pub async fn dispatch_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<DispatchRequest>,
) -> Result<(StatusCode, Json<DispatchResponse>), ApiError> {
    let room_name = payload.room_name.trim().to_string();
    if room_name.is_empty() {
        return Err(ApiError::BadRequest("room_name is required".to_string()));
    }

    if !spawn_call(&state, room_name.clone(), payload.metadata.unwrap_or_default()) {
        return Err(ApiError::Conflict(format!(
            "a session is already running for {room_name}"
        )));
    }

    tracing::info!(room = %room_name, "session dispatched");
    Ok((StatusCode::ACCEPTED, Json(DispatchResponse { room_name })))
}

/// Handler for `GET /api/sessions`.
pub async fn list_sessions_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "rooms": state.registry.rooms() }))
}

/// An event reported for a running session.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    ParticipantConnected {
        identity: String,
        #[serde(default)]
        attributes: HashMap<String, String>,
    },
    ParticipantDisconnected {
        identity: String,
    },
    RoomDisconnected,
    ContentAdded {
        role: String,
        #[serde(default)]
        text: Option<String>,
    },
    SpeechStarted {
        role: String,
    },
    SpeechStopped {
        role: String,
    },
}

impl From<EventPayload> for SessionEvent {
    fn from(payload: EventPayload) -> Self {
        match payload {
            EventPayload::ParticipantConnected {
                identity,
                attributes,
            } => SessionEvent::ParticipantConnected(RemoteParticipant {
                identity,
                attributes,
            }),
            EventPayload::ParticipantDisconnected { identity } => {
                SessionEvent::ParticipantDisconnected { identity }
            }
            EventPayload::RoomDisconnected => SessionEvent::RoomDisconnected,
            EventPayload::ContentAdded { role, text } => SessionEvent::ContentAdded { role, text },
            EventPayload::SpeechStarted { role } => SessionEvent::SpeechStarted { role },
            EventPayload::SpeechStopped { role } => SessionEvent::SpeechStopped { role },
        }
    }
}

/// Handler for `POST /api/sessions/{room}/events`.
pub async fn session_event_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(room): Path<String>,
    Json(payload): Json<EventPayload>,
) -> Result<StatusCode, ApiError> {
    let event = SessionEvent::from(payload);
    tracing::debug!(room = %room, kind = event.kind(), "session event received");
    state.registry.deliver(&room, event).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CapabilityResponse {
    pub result: String,
}

/// Handler for `POST /api/sessions/{room}/capabilities/{name}`.
///
/// The body is the capability's JSON arguments. Responds once the session
/// has handled the invocation, with the text to hand back to the engine.
pub async fn capability_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((room, name)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<CapabilityResponse>, ApiError> {
    let arguments = if body.iter().all(u8::is_ascii_whitespace) {
        json!({})
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("arguments must be JSON: {e}")))?
    };
    let (reply, answer) = oneshot::channel();
    let event = SessionEvent::Capability {
        call: CapabilityCall::new(name.clone(), arguments),
        reply,
    };
    state.registry.deliver(&room, event).await?;

    // Transfers may chain several vendor calls.
    let wait = state.settings.vendor_timeout() * 2;
    match tokio::time::timeout(wait, answer).await {
        Ok(Ok(result)) => Ok(Json(CapabilityResponse { result })),
        Ok(Err(_)) => Err(ApiError::Gone(format!(
            "session for {room} ended before {name} completed"
        ))),
        Err(_) => {
            tracing::warn!(room = %room, capability = %name, "capability reply timed out");
            Err(ApiError::Timeout(format!("{name} did not complete in time")))
        }
    }
}
