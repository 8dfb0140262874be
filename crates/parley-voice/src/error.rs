use parley_types::PortError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("LiveKit token error: {0}")]
    LiveKit(#[from] livekit_api::access_token::AccessTokenError),

    #[error("Room service error: {0}")]
    RoomService(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Unexpected response from {service}: {detail}")]
    Decode {
        service: &'static str,
        detail: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<VoiceError> for PortError {
    fn from(e: VoiceError) -> Self {
        match e {
            VoiceError::Config(_) | VoiceError::InvalidRequest(_) => {
                PortError::Invalid(e.to_string())
            }
            other => PortError::Vendor(other.to_string()),
        }
    }
}
