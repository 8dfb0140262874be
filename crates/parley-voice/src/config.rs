use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

fn default_token_ttl_seconds() -> u64 {
    3600
}

fn default_agent_identity() -> String {
    "parley-agent".to_string()
}

/// LiveKit server credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct LiveKitConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing)]
    pub api_secret: String,
    /// Identity the agent joins rooms with.
    #[serde(default = "default_agent_identity")]
    pub agent_identity: String,
    /// JWT token TTL in seconds for agent join tokens. Default: 3600 (1 hour).
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: u64,
}

impl Default for LiveKitConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            agent_identity: default_agent_identity(),
            token_ttl_seconds: default_token_ttl_seconds(),
        }
    }
}

impl fmt::Debug for LiveKitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveKitConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("agent_identity", &self.agent_identity)
            .field("token_ttl_seconds", &self.token_ttl_seconds)
            .finish()
    }
}

impl LiveKitConfig {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            ..Self::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_text_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_control_url() -> String {
    "http://127.0.0.1:8081".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

/// Conversation engine endpoints.
#[derive(Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the OpenAI-compatible API used for one-shot generation.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Control endpoint of the media pipeline that runs live sessions.
    #[serde(default = "default_control_url")]
    pub control_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: String::new(),
            text_model: default_text_model(),
            embedding_model: default_embedding_model(),
            control_url: default_control_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &"[REDACTED]")
            .field("text_model", &self.text_model)
            .field("embedding_model", &self.embedding_model)
            .field("control_url", &self.control_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_hold_music_url() -> String {
    "http://com.twilio.sounds.music.s3.amazonaws.com/MARKOVICHAMP-B4.mp3".to_string()
}

/// SignalWire project credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    /// Space host, e.g. `example.signalwire.com`.
    #[serde(default)]
    pub space_url: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default, skip_serializing)]
    pub api_token: String,
    /// SIP domain that routes calls into LiveKit rooms.
    #[serde(default)]
    pub sip_domain: String,
    #[serde(default = "default_hold_music_url")]
    pub hold_music_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            space_url: String::new(),
            project_id: String::new(),
            api_token: String::new(),
            sip_domain: String::new(),
            hold_music_url: default_hold_music_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl fmt::Debug for TelephonyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelephonyConfig")
            .field("space_url", &self.space_url)
            .field("project_id", &self.project_id)
            .field("api_token", &"[REDACTED]")
            .field("sip_domain", &self.sip_domain)
            .field("hold_music_url", &self.hold_music_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl TelephonyConfig {
    pub fn api_base(&self) -> String {
        let host = self.space_url.trim_end_matches('/');
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        };
        format!("{host}/api/laml/2010-04-01/Accounts/{}", self.project_id)
    }
}

fn default_calendar_api_base() -> String {
    "https://api.cal.com/v2".to_string()
}

fn default_calendar_api_version() -> String {
    "2024-08-13".to_string()
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

fn default_booking_duration_minutes() -> u32 {
    30
}

fn default_time_zone() -> String {
    "America/Los_Angeles".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationsConfig {
    #[serde(default = "default_calendar_api_base")]
    pub calendar_api_base: String,
    #[serde(default = "default_calendar_api_version")]
    pub calendar_api_version: String,
    #[serde(default = "default_booking_duration_minutes")]
    pub booking_duration_minutes: u32,
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self {
            calendar_api_base: default_calendar_api_base(),
            calendar_api_version: default_calendar_api_version(),
            booking_duration_minutes: default_booking_duration_minutes(),
            time_zone: default_time_zone(),
            webhook_timeout_secs: default_webhook_timeout_secs(),
        }
    }
}
