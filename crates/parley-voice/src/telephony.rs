//! SignalWire telephony adapter.
//!
//! Uses the LaML compatibility REST API. Calls are redirected by posting
//! inline TwiML to the live call resource.
//!
//! An attended transfer moves through three call legs:
//!
//! 1. the counterpart's leg is redirected to hold music,
//! 2. a new leg dials the destination into the room over SIP so the agent
//!    can brief them,
//! 3. on completion both legs join one conference; on cancellation the
//!    destination leg is hung up and the counterpart is dialled back into
//!    the room.

use crate::config::TelephonyConfig;
use crate::error::VoiceError;
use crate::check_status;
use async_trait::async_trait;
use parley_types::{normalize_phone, PortError, TelephonyGateway, TransferRequest};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// Legs of an attended transfer in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
struct WarmLegs {
    caller_sid: String,
    destination_sid: String,
    service_number: Option<String>,
}

#[derive(Deserialize)]
struct CallResource {
    sid: String,
}

/// Escapes text for use inside TwiML element bodies and attributes.
fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn twiml(body: &str) -> String {
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>{body}</Response>")
}

fn dial_number_twiml(destination: &str, caller_id: Option<&str>) -> String {
    let caller_id = caller_id
        .map(|c| format!(" callerId=\"{}\"", xml_escape(c)))
        .unwrap_or_default();
    twiml(&format!(
        "<Dial{caller_id}><Number>{}</Number></Dial>",
        xml_escape(destination)
    ))
}

fn hold_twiml(hold_music_url: &str) -> String {
    twiml(&format!("<Play loop=\"0\">{}</Play>", xml_escape(hold_music_url)))
}

fn dial_room_twiml(sip_uri: &str, announcement: Option<&str>) -> String {
    let say = announcement
        .map(|a| format!("<Say>{}</Say>", xml_escape(a)))
        .unwrap_or_default();
    twiml(&format!("{say}<Dial><Sip>{}</Sip></Dial>", xml_escape(sip_uri)))
}

fn conference_twiml(name: &str) -> String {
    twiml(&format!(
        "<Dial><Conference beep=\"false\" startConferenceOnEnter=\"true\" \
         endConferenceOnExit=\"true\">{}</Conference></Dial>",
        xml_escape(name)
    ))
}

#[derive(Debug)]
pub struct SignalWireGateway {
    config: TelephonyConfig,
    client: Client,
    warm: Mutex<HashMap<String, WarmLegs>>,
}

impl SignalWireGateway {
    pub fn new(config: TelephonyConfig) -> Result<Self, VoiceError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            config,
            client,
            warm: Mutex::new(HashMap::new()),
        })
    }

    /// SIP URI that routes a leg back into the room for `service_number`.
    fn room_sip_uri(&self, service_number: Option<&str>) -> Result<String, VoiceError> {
        if self.config.sip_domain.is_empty() {
            return Err(VoiceError::Config("telephony.sip_domain is not set".to_string()));
        }
        let user = service_number.map(normalize_phone).ok_or_else(|| {
            VoiceError::InvalidRequest("a service number is required to reach the room".to_string())
        })?;
        Ok(format!("sip:{user}@{};transport=tls", self.config.sip_domain))
    }

    async fn post_form(
        &self,
        resource: &str,
        form: &[(&str, &str)],
    ) -> Result<reqwest::Response, VoiceError> {
        let url = format!("{}/{resource}", self.config.api_base());
        let response = self
            .client
            .post(url)
            .basic_auth(&self.config.project_id, Some(&self.config.api_token))
            .form(form)
            .send()
            .await?;
        check_status("telephony", response).await
    }

    async fn redirect(&self, call_sid: &str, twiml: &str) -> Result<(), VoiceError> {
        self.post_form(&format!("Calls/{call_sid}.json"), &[("Twiml", twiml)])
            .await?;
        Ok(())
    }

    async fn hang_up(&self, call_sid: &str) -> Result<(), VoiceError> {
        self.post_form(&format!("Calls/{call_sid}.json"), &[("Status", "completed")])
            .await?;
        Ok(())
    }

    fn take_legs(&self, room: &str) -> Option<WarmLegs> {
        self.warm
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(room)
    }
}

fn caller_sid(request: &TransferRequest) -> Result<&str, VoiceError> {
    request
        .provider_call_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            VoiceError::InvalidRequest("the caller's provider call id is unknown".to_string())
        })
}

#[async_trait]
impl TelephonyGateway for SignalWireGateway {
    async fn transfer_call(&self, request: &TransferRequest) -> Result<(), PortError> {
        let sid = caller_sid(request)?;
        let destination = normalize_phone(&request.destination);
        let twiml = dial_number_twiml(&destination, request.caller_id.as_deref());
        self.redirect(sid, &twiml).await?;
        tracing::info!(
            room = %request.room_name,
            target = %request.target_label,
            "call transferred"
        );
        Ok(())
    }

    async fn start_warm_transfer(&self, request: &TransferRequest) -> Result<(), PortError> {
        let caller = caller_sid(request)?.to_string();
        let room_uri = self.room_sip_uri(request.service_number.as_deref())?;

        self.redirect(&caller, &hold_twiml(&self.config.hold_music_url))
            .await?;

        let destination = normalize_phone(&request.destination);
        let from = request.caller_id.as_deref().unwrap_or_default();
        let consult = dial_room_twiml(&room_uri, Some("Please hold while we connect you."));
        let dialled = self
            .post_form(
                "Calls.json",
                &[("To", destination.as_str()), ("From", from), ("Twiml", consult.as_str())],
            )
            .await;

        let dialled = match dialled {
            Ok(response) => response,
            Err(e) => {
                // Bring the counterpart back before reporting the failure.
                let back = dial_room_twiml(&room_uri, None);
                if let Err(unhold) = self.redirect(&caller, &back).await {
                    tracing::warn!(error = %unhold, "failed to take caller off hold");
                }
                return Err(e.into());
            }
        };

        let resource: CallResource = dialled.json().await.map_err(VoiceError::from)?;
        self.warm
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                request.room_name.clone(),
                WarmLegs {
                    caller_sid: caller,
                    destination_sid: resource.sid,
                    service_number: request.service_number.clone(),
                },
            );
        tracing::info!(room = %request.room_name, target = %request.target_label, "warm transfer started");
        Ok(())
    }

    async fn complete_warm_transfer(&self, room: &str) -> Result<(), PortError> {
        let legs = self
            .take_legs(room)
            .ok_or_else(|| VoiceError::InvalidRequest(format!("no warm transfer for {room}")))?;
        let conference = conference_twiml(&format!("parley-{room}"));
        self.redirect(&legs.caller_sid, &conference).await?;
        self.redirect(&legs.destination_sid, &conference).await?;
        tracing::info!(room, "warm transfer bridged");
        Ok(())
    }

    async fn cancel_warm_transfer(&self, room: &str) -> Result<(), PortError> {
        let legs = self
            .take_legs(room)
            .ok_or_else(|| VoiceError::InvalidRequest(format!("no warm transfer for {room}")))?;
        if let Err(e) = self.hang_up(&legs.destination_sid).await {
            tracing::debug!(room, error = %e, "destination leg already gone");
        }
        let back = dial_room_twiml(&self.room_sip_uri(legs.service_number.as_deref())?, None);
        self.redirect(&legs.caller_sid, &back).await?;
        tracing::info!(room, "warm transfer cancelled");
        Ok(())
    }

    async fn send_sms(&self, from: &str, to: &str, body: &str) -> Result<(), PortError> {
        let (from, to) = (normalize_phone(from), normalize_phone(to));
        self.post_form(
            "Messages.json",
            &[("From", from.as_str()), ("To", to.as_str()), ("Body", body)],
        )
        .await?;
        tracing::info!(to = %to, "sms sent");
        Ok(())
    }
}
