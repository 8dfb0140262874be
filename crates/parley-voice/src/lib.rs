//! Vendor adapters for the Parley call worker.
//!
//! Each adapter implements one collaborator trait from
//! [`parley_types::ports`] against a concrete service:
//!
//! - [`LiveKitRooms`]: rooms, participants and spoken prompts over the
//!   LiveKit server API.
//! - [`PipelineEngine`]: the media pipeline that runs speech recognition,
//!   the language model and speech synthesis for a room, plus one-shot text
//!   generation and embeddings over an OpenAI-compatible API.
//! - [`SignalWireGateway`]: blind and attended transfers and SMS over the
//!   SignalWire compatibility API.
//! - [`HttpIntegrations`]: calendar availability and booking, and
//!   tenant-defined webhooks.
//!
//! Every adapter reports failures as [`VoiceError`], which converts into the
//! [`parley_types::PortError`] the session controller classifies.

pub mod config;
pub mod engine;
pub mod error;
pub mod integrations;
pub mod room;
pub mod telephony;

pub use config::{EngineConfig, IntegrationsConfig, LiveKitConfig, TelephonyConfig};
pub use engine::PipelineEngine;
pub use error::VoiceError;
pub use integrations::HttpIntegrations;
pub use room::{agent_token, LiveKitRooms};
pub use telephony::SignalWireGateway;

/// Reads a non-2xx response into [`VoiceError::Status`].
pub(crate) async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, VoiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(VoiceError::Status {
        service,
        status: status.as_u16(),
        body: body.chars().take(500).collect(),
    })
}
