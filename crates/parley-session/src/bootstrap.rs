//! Resolves who owns a call before the conversation starts.

use crate::event::{EndReason, SessionEvent};
use crate::resolve::{self, RecordKey};
use crate::settings::SessionSettings;
use crate::{Services, SessionError};
use chrono::{DateTime, Utc};
use parley_types::{
    normalize_phone, Direction, NewCallRecord, RemoteParticipant, ATTR_CALL_ID, ATTR_PHONE_NUMBER,
    ATTR_TRUNK_PHONE_NUMBER,
};
use serde::Deserialize;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

/// JSON metadata attached to a room by whoever created it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RoomMetadata {
    #[serde(default, alias = "user_id")]
    pub tenant_id: Option<String>,
    #[serde(default, alias = "agent_id")]
    pub config_id: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default, alias = "contact_phone")]
    pub counterpart_phone: Option<String>,
    #[serde(default)]
    pub service_number: Option<String>,
    #[serde(default)]
    pub call_record_id: Option<String>,
    #[serde(default)]
    pub provider_call_id: Option<String>,
}

impl RoomMetadata {
    /// Parses room metadata. Empty or malformed input yields empty metadata.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str::<Self>(raw) {
            Ok(meta) => meta.without_blanks(),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed room metadata");
                Self::default()
            }
        }
    }

    fn without_blanks(self) -> Self {
        fn keep(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }
        Self {
            tenant_id: keep(self.tenant_id),
            config_id: keep(self.config_id),
            direction: keep(self.direction),
            counterpart_phone: keep(self.counterpart_phone),
            service_number: keep(self.service_number),
            call_record_id: keep(self.call_record_id),
            provider_call_id: keep(self.provider_call_id),
        }
    }

    /// Parsed direction. Unrecognised labels count as unknown.
    pub fn direction(&self) -> Option<Direction> {
        self.direction.as_deref().and_then(|d| d.parse().ok())
    }
}

/// How the tenant was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TenantSource {
    #[default]
    Metadata,
    ServiceNumber,
    ExternalNumber,
}

/// Result of a successful bootstrap.
#[derive(Debug, Default)]
pub struct Bootstrap {
    pub tenant_id: String,
    pub tenant_source: TenantSource,
    pub config_id: Option<String>,
    pub direction: Direction,
    pub counterpart_phone: Option<String>,
    pub counterpart_identity: Option<String>,
    pub service_number: Option<String>,
    pub provider_call_id: Option<String>,
    pub call_record_id: Option<String>,
    /// Whether the outbound metadata shortcut was taken.
    pub fast_path: bool,
    /// Events that arrived while waiting for the counterpart, in order.
    pub deferred: Vec<SessionEvent>,
}

/// Runs bootstrap for `room`.
///
/// Fails with [`SessionError::UnresolvedTenant`] when nobody owns the call,
/// and with [`SessionError::EndedDuringBootstrap`] when the room closes or
/// the caller leaves before the provider participant shows up. Every lookup
/// failure on the way is logged and treated as a miss.
pub async fn bootstrap(
    services: &Services,
    settings: &SessionSettings,
    room: &str,
    metadata: &RoomMetadata,
    events: &mut mpsc::Receiver<SessionEvent>,
    now: DateTime<Utc>,
) -> Result<Bootstrap, SessionError> {
    connect(services, room).await;

    if let (Some(tenant_id), Some(Direction::Outbound)) = (&metadata.tenant_id, metadata.direction())
    {
        tracing::info!(room, tenant_id = %tenant_id, "outbound fast path");
        let mut boot = Bootstrap {
            tenant_id: tenant_id.clone(),
            tenant_source: TenantSource::Metadata,
            config_id: metadata.config_id.clone(),
            direction: Direction::Outbound,
            counterpart_phone: metadata.counterpart_phone.as_deref().map(normalize_phone),
            counterpart_identity: None,
            service_number: metadata.service_number.as_deref().map(normalize_phone),
            provider_call_id: metadata.provider_call_id.clone(),
            call_record_id: metadata.call_record_id.clone(),
            fast_path: true,
            deferred: Vec::new(),
        };
        resolve_record_early(services, settings, &mut boot, now).await;
        return Ok(boot);
    }

    let mut deferred = Vec::new();
    let participant = await_trunk_participant(services, settings, room, events, &mut deferred)
        .await
        .map_err(|reason| SessionError::EndedDuringBootstrap {
            room: room.to_string(),
            reason,
        })?;
    let trunk_number = participant
        .as_ref()
        .and_then(|p| p.attribute(ATTR_TRUNK_PHONE_NUMBER))
        .or(metadata.service_number.as_deref())
        .map(normalize_phone);

    let (tenant_id, tenant_source) = match &metadata.tenant_id {
        Some(id) => (id.clone(), TenantSource::Metadata),
        None => match lookup_tenant(services, trunk_number.as_deref()).await {
            Some(found) => found,
            None => {
                tracing::warn!(room, trunk_number = ?trunk_number, "no tenant owns this call");
                return Err(SessionError::UnresolvedTenant {
                    room: room.to_string(),
                });
            }
        },
    };

    let counterpart_phone = participant
        .as_ref()
        .and_then(|p| p.attribute(ATTR_PHONE_NUMBER))
        .or(metadata.counterpart_phone.as_deref())
        .map(normalize_phone);
    let provider_call_id = participant
        .as_ref()
        .and_then(|p| p.attribute(ATTR_CALL_ID))
        .map(str::to_string)
        .or_else(|| metadata.provider_call_id.clone());

    let direction = match metadata.direction() {
        Some(direction) => direction,
        None => {
            let key = RecordKey {
                tenant_id: &tenant_id,
                service_number: trunk_number.as_deref(),
                provider_call_id: None,
                since: now - settings.recent_call_window(),
            };
            resolve::resolve_direction(services.store.as_ref(), &key).await
        }
    };

    let mut boot = Bootstrap {
        tenant_id,
        tenant_source,
        config_id: metadata.config_id.clone(),
        direction,
        counterpart_phone,
        counterpart_identity: participant.map(|p| p.identity),
        service_number: trunk_number,
        provider_call_id,
        call_record_id: metadata.call_record_id.clone(),
        fast_path: false,
        deferred,
    };

    if boot.tenant_source == TenantSource::ExternalNumber
        && boot.direction == Direction::Inbound
        && boot.call_record_id.is_none()
    {
        create_external_record(services, room, &mut boot, now).await;
    }

    resolve_record_early(services, settings, &mut boot, now).await;
    tracing::info!(
        room,
        tenant_id = %boot.tenant_id,
        direction = %boot.direction,
        call_record_id = ?boot.call_record_id,
        "bootstrap complete"
    );
    Ok(boot)
}

async fn connect(services: &Services, room: &str) {
    if let Err(e) = services.rooms.connect(room).await {
        tracing::error!(room, error = %e, "failed to join room");
    }
}

/// Finds the provider-side participant, first among those already present,
/// then among those joining before the wait expires.
///
/// Returns the end reason instead when the room goes away, or when someone
/// already known to be in the room leaves, before the participant appears.
async fn await_trunk_participant(
    services: &Services,
    settings: &SessionSettings,
    room: &str,
    events: &mut mpsc::Receiver<SessionEvent>,
    deferred: &mut Vec<SessionEvent>,
) -> Result<Option<RemoteParticipant>, EndReason> {
    let mut present = HashSet::new();
    match services.rooms.remote_participants(room).await {
        Ok(participants) => {
            for p in participants {
                if p.attribute(ATTR_TRUNK_PHONE_NUMBER).is_some() {
                    return Ok(Some(p));
                }
                present.insert(p.identity);
            }
        }
        Err(e) => tracing::warn!(room, error = %e, "listing participants failed"),
    }

    let deadline = Instant::now() + settings.participant_wait();
    loop {
        match timeout_at(deadline, events.recv()).await {
            Ok(Some(SessionEvent::ParticipantConnected(p))) => {
                if p.attribute(ATTR_TRUNK_PHONE_NUMBER).is_some() {
                    return Ok(Some(p));
                }
                present.insert(p.identity.clone());
                deferred.push(SessionEvent::ParticipantConnected(p));
            }
            Ok(Some(SessionEvent::RoomDisconnected)) => {
                tracing::info!(room, "room closed while waiting for participant");
                return Err(EndReason::RoomDisconnected);
            }
            Ok(Some(SessionEvent::ParticipantDisconnected { identity }))
                if present.contains(&identity) =>
            {
                tracing::info!(room, identity = %identity, "caller left while waiting for participant");
                return Err(EndReason::ParticipantDisconnected);
            }
            Ok(Some(other)) => deferred.push(other),
            Ok(None) => {
                tracing::debug!(room, "event stream closed while waiting for participant");
                return Ok(None);
            }
            Err(_) => {
                tracing::info!(room, "no provider participant joined in time");
                return Ok(None);
            }
        }
    }
}

async fn lookup_tenant(services: &Services, trunk_number: Option<&str>) -> Option<(String, TenantSource)> {
    let number = trunk_number?;
    match services.store.tenant_for_service_number(number).await {
        Ok(Some(id)) => return Some((id, TenantSource::ServiceNumber)),
        Ok(None) => {}
        Err(e) => tracing::warn!(number, error = %e, "service number lookup failed"),
    }
    match services.store.tenant_for_external_number(number).await {
        Ok(Some(id)) => Some((id, TenantSource::ExternalNumber)),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(number, error = %e, "external number lookup failed");
            None
        }
    }
}

/// Externally routed numbers never get a record from the originating side.
async fn create_external_record(
    services: &Services,
    room: &str,
    boot: &mut Bootstrap,
    now: DateTime<Utc>,
) {
    let record = NewCallRecord {
        tenant_id: boot.tenant_id.clone(),
        config_id: boot.config_id.clone(),
        direction: boot.direction,
        room_name: room.to_string(),
        service_number: boot.service_number.clone(),
        counterpart_number: boot.counterpart_phone.clone(),
        provider_call_id: boot.provider_call_id.clone(),
        started_at: now,
    };
    match services.store.create_call_record(&record).await {
        Ok(id) => {
            tracing::info!(room, call_record_id = %id, "created record for external number");
            boot.call_record_id = Some(id);
        }
        Err(e) => tracing::warn!(room, error = %e, "failed to create call record"),
    }
}

async fn resolve_record_early(
    services: &Services,
    settings: &SessionSettings,
    boot: &mut Bootstrap,
    now: DateTime<Utc>,
) {
    if boot.call_record_id.is_some() {
        return;
    }
    let key = RecordKey {
        tenant_id: &boot.tenant_id,
        service_number: boot.service_number.as_deref(),
        provider_call_id: boot.provider_call_id.as_deref(),
        since: now - settings.recent_call_window(),
    };
    if let Some(found) = resolve::resolve_call_record(services.store.as_ref(), &key).await {
        boot.call_record_id = Some(found.id);
    }
}
