//! LiveKit room adapter.

use crate::config::LiveKitConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use livekit_api::access_token::{AccessToken, VideoGrants};
use livekit_api::services::room::{RoomClient, SendDataOptions};
use livekit_protocol as proto;
use parley_types::{PortError, RemoteParticipant, RoomProvider};
use serde::Serialize;
use std::time::Duration;

/// Data topic the media pipeline listens on for scripted speech.
pub const SAY_TOPIC: &str = "parley.say";

/// Mints a join token for the agent participant of `room`.
pub fn agent_token(config: &LiveKitConfig, room: &str) -> Result<String, VoiceError> {
    let token = AccessToken::with_api_key(&config.api_key, &config.api_secret)
        .with_identity(&config.agent_identity)
        .with_name(&config.agent_identity)
        .with_grants(VideoGrants {
            room_join: true,
            room: room.to_string(),
            can_publish: Some(true),
            can_subscribe: Some(true),
            can_publish_data: Some(true),
            ..Default::default()
        })
        .with_ttl(Duration::from_secs(config.token_ttl_seconds));

    token.to_jwt().map_err(VoiceError::LiveKit)
}

#[derive(Serialize)]
struct SayPayload<'a> {
    text: &'a str,
    allow_interruptions: bool,
}

#[derive(Debug)]
pub struct LiveKitRooms {
    config: LiveKitConfig,
    room_client: RoomClient,
}

impl LiveKitRooms {
    pub fn new(config: LiveKitConfig) -> Self {
        let room_client =
            RoomClient::with_api_key(&config.url, &config.api_key, &config.api_secret);
        Self {
            config,
            room_client,
        }
    }

    fn is_remote(&self, info: &proto::ParticipantInfo) -> bool {
        info.identity != self.config.agent_identity
            && info.kind != proto::participant_info::Kind::Agent as i32
    }
}

fn room_error(action: &str, e: impl std::fmt::Display) -> VoiceError {
    VoiceError::RoomService(format!("failed to {action}: {e}"))
}

#[async_trait]
impl RoomProvider for LiveKitRooms {
    async fn connect(&self, room: &str) -> Result<(), PortError> {
        let rooms = self
            .room_client
            .list_rooms(vec![room.to_string()])
            .await
            .map_err(|e| room_error("list rooms", e))?;
        if !rooms.iter().any(|r| r.name == room) {
            return Err(VoiceError::RoomService(format!("room not found: {room}")).into());
        }
        tracing::debug!(room, "agent attached to room");
        Ok(())
    }

    async fn remote_participants(&self, room: &str) -> Result<Vec<RemoteParticipant>, PortError> {
        let participants = self
            .room_client
            .list_participants(room)
            .await
            .map_err(|e| room_error("list participants", e))?;

        Ok(participants
            .into_iter()
            .filter(|p| self.is_remote(p))
            .map(|p| RemoteParticipant {
                identity: p.identity,
                attributes: p.attributes,
            })
            .collect())
    }

    async fn say(
        &self,
        room: &str,
        text: &str,
        allow_interruptions: bool,
    ) -> Result<(), PortError> {
        let payload = serde_json::to_vec(&SayPayload {
            text,
            allow_interruptions,
        })
        .map_err(|e| VoiceError::InvalidRequest(e.to_string()))?;

        let options = SendDataOptions {
            kind: proto::data_packet::Kind::Reliable,
            destination_identities: vec![self.config.agent_identity.clone()],
            topic: Some(SAY_TOPIC.to_string()),
            ..Default::default()
        };

        self.room_client
            .send_data(room, payload, options)
            .await
            .map_err(|e| room_error("send speech", e))?;
        Ok(())
    }

    async fn delete_room(&self, room: &str) -> Result<(), PortError> {
        self.room_client
            .delete_room(room)
            .await
            .map_err(|e| room_error("delete room", e))?;
        tracing::info!(room, "room deleted");
        Ok(())
    }
}
