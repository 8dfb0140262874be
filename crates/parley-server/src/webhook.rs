//! LiveKit webhook ingestion.
//!
//! LiveKit signs each delivery with a JWT in the `Authorization` header
//! whose `sha256` claim covers the body. Verified events are mapped onto the
//! running session for the room:
//!
//! | LiveKit event        | effect                                   |
//! |----------------------|------------------------------------------|
//! | `room_started`       | dispatches a session when enabled        |
//! | `participant_joined` | `SessionEvent::ParticipantConnected`     |
//! | `participant_left`   | `SessionEvent::ParticipantDisconnected`  |
//! | `room_finished`      | `SessionEvent::RoomDisconnected`         |
//!
//! Events for the agent's own participant and for rooms without a session
//! are acknowledged and dropped.

use crate::api::ApiError;
use crate::{spawn_call, AppState};
use axum::{
    body::Bytes,
    extract::{Extension, Json},
    http::HeaderMap,
};
use livekit_api::access_token::TokenVerifier;
use livekit_api::webhooks::{WebhookError, WebhookReceiver};
use livekit_protocol as proto;
use parley_session::SessionEvent;
use parley_types::RemoteParticipant;
use serde_json::{json, Value};
use std::sync::Arc;

fn webhook_error(error: &WebhookError) -> ApiError {
    match error {
        WebhookError::InvalidData(_) => ApiError::BadRequest(error.to_string()),
        WebhookError::InvalidAuth(_)
        | WebhookError::InvalidSignature
        | WebhookError::InvalidBase64(_) => ApiError::Unauthorized(error.to_string()),
    }
}

fn is_agent(state: &AppState, participant: &proto::ParticipantInfo) -> bool {
    participant.identity == state.livekit.agent_identity
        || participant.kind == proto::participant_info::Kind::Agent as i32
}

/// What a verified webhook asks of the worker.
#[derive(Debug)]
enum Action {
    Dispatch { room: String, metadata: String },
    Deliver { room: String, event: SessionEvent },
    Ignore(&'static str),
}

fn classify(state: &AppState, event: proto::WebhookEvent) -> Action {
    let Some(room) = event.room else {
        return Action::Ignore("no room");
    };

    match event.event.as_str() {
        "room_started" if state.auto_dispatch => Action::Dispatch {
            room: room.name,
            metadata: room.metadata,
        },
        "room_finished" => Action::Deliver {
            room: room.name,
            event: SessionEvent::RoomDisconnected,
        },
        "participant_joined" | "participant_left" => {
            let Some(participant) = event.participant else {
                return Action::Ignore("no participant");
            };
            if is_agent(state, &participant) {
                return Action::Ignore("agent participant");
            }
            let event = if event.event == "participant_joined" {
                SessionEvent::ParticipantConnected(RemoteParticipant {
                    identity: participant.identity,
                    attributes: participant.attributes,
                })
            } else {
                SessionEvent::ParticipantDisconnected {
                    identity: participant.identity,
                }
            };
            Action::Deliver {
                room: room.name,
                event,
            }
        }
        _ => Action::Ignore("unhandled event"),
    }
}

/// Handler for `POST /livekit/webhook`.
pub async fn livekit_webhook_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    if !state.livekit.is_configured() {
        return Err(ApiError::Unavailable(
            "LiveKit credentials are not configured".to_string(),
        ));
    }

    let token = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .map(|t| t.strip_prefix("Bearer ").unwrap_or(t))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("missing Authorization header".to_string()))?;

    let body = std::str::from_utf8(&body)
        .map_err(|e| ApiError::BadRequest(format!("body is not UTF-8: {e}")))?;

    let verifier = TokenVerifier::with_api_key(&state.livekit.api_key, &state.livekit.api_secret);
    let event = WebhookReceiver::new(verifier)
        .receive(body, token)
        .map_err(|e| {
            tracing::warn!(error = %e, "webhook verification failed");
            webhook_error(&e)
        })?;

    let kind = event.event.clone();
    match classify(&state, event) {
        Action::Dispatch { room, metadata } => {
            if spawn_call(&state, room.clone(), metadata) {
                tracing::info!(room = %room, "session dispatched from webhook");
            } else {
                tracing::debug!(room = %room, "session already running");
            }
        }
        Action::Deliver { room, event } => match state.registry.deliver(&room, event).await {
            Ok(()) => tracing::debug!(room = %room, event = %kind, "webhook delivered"),
            Err(e) => {
                tracing::debug!(room = %room, event = %kind, reason = %e, "webhook dropped");
            }
        },
        Action::Ignore(reason) => {
            tracing::debug!(event = %kind, reason, "webhook ignored");
        }
    }

    Ok(Json(json!({ "ok": true })))
}
