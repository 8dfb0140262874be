//! Tenant behavioural configuration.
//!
//! A `TenantConfig` is loaded once per call and is read-only for the rest of
//! it. It is persisted as a JSON document, so every optional section carries
//! serde defaults and older documents keep deserialising as fields are added.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How much call content a tenant allows to be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiMode {
    /// Transcript, summary and extracted data are stored verbatim.
    #[default]
    Enabled,
    /// Content is stripped of personal information before it is stored.
    Redacted,
    /// Only call metadata (status, timestamps) may be stored.
    Disabled,
}

impl PiiMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Redacted => "redacted",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for PiiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PiiMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(Self::Enabled),
            "redacted" => Ok(Self::Redacted),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!("unknown pii mode: {other}")),
        }
    }
}

/// A named destination the agent may transfer a call to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDestination {
    /// Spoken label, e.g. "Sales" or "Rick".
    pub label: String,
    pub phone_number: String,
    /// Caller ID presented to the destination. Falls back to the service number.
    #[serde(default)]
    pub caller_id: Option<String>,
}

/// Transfer behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransferSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Expose the attended start/complete/cancel operations.
    #[serde(default)]
    pub warm_enabled: bool,
    #[serde(default)]
    pub destinations: Vec<TransferDestination>,
}

/// Outbound SMS behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SmsSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Number messages are sent from.
    #[serde(default)]
    pub sender_number: Option<String>,
    /// Whether `sender_number` is provisioned for messaging.
    #[serde(default)]
    pub sender_sms_capable: bool,
}

/// Appointment booking behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BookingSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Calendar event type appointments are booked against.
    #[serde(default)]
    pub event_type_id: Option<i64>,
}

/// A structured field extracted from the transcript at call end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionVariable {
    pub name: String,
    pub description: String,
    /// Expected value type ("string", "number", "boolean").
    #[serde(default = "default_variable_kind")]
    pub kind: String,
}

fn default_variable_kind() -> String {
    "string".to_string()
}

/// Per-caller memory behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub include_summary: bool,
    #[serde(default = "default_true")]
    pub include_topics: bool,
    #[serde(default = "default_true")]
    pub include_interaction_count: bool,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            include_summary: true,
            include_topics: true,
            include_interaction_count: true,
        }
    }
}

/// Cross-caller similarity search behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticMemorySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

impl Default for SemanticMemorySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_results: default_max_results(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_max_results() -> usize {
    3
}

fn default_similarity_threshold() -> f32 {
    0.75
}

/// A tenant-defined function backed by an HTTP webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFunction {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// JSON schema of the arguments the engine should supply.
    #[serde(default = "empty_object_schema")]
    pub parameters: serde_json::Value,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_method() -> String {
    "POST".to_string()
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

fn default_true() -> bool {
    true
}

fn default_agent_name() -> String {
    "Pat".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful, concise phone assistant.".to_string()
}

fn default_greeting() -> String {
    "Hello! How can I help you today?".to_string()
}

fn default_voice_id() -> String {
    "11labs-Rachel".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Behavioural configuration for one tenant agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Identifier of this configuration (one tenant may own several).
    pub id: String,
    pub tenant_id: String,
    #[serde(default = "default_agent_name")]
    pub agent_name: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    /// BCP-47 language the agent must answer in. `None` means English.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub pii_mode: PiiMode,
    #[serde(default)]
    pub transfer: TransferSettings,
    #[serde(default)]
    pub sms: SmsSettings,
    #[serde(default)]
    pub booking: BookingSettings,
    #[serde(default)]
    pub collect_data_enabled: bool,
    #[serde(default = "default_true")]
    pub summary_enabled: bool,
    #[serde(default)]
    pub extraction_variables: Vec<ExtractionVariable>,
    #[serde(default)]
    pub memory: MemorySettings,
    #[serde(default)]
    pub semantic_memory: SemanticMemorySettings,
    #[serde(default)]
    pub knowledge_base_enabled: bool,
    #[serde(default)]
    pub custom_functions: Vec<CustomFunction>,
    /// Instructions swapped in after a successful phone admin login.
    #[serde(default)]
    pub admin_prompt: Option<String>,
}

impl TenantConfig {
    /// A configuration with every optional feature off.
    pub fn new(id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            agent_name: default_agent_name(),
            system_prompt: default_system_prompt(),
            greeting: default_greeting(),
            voice_id: default_voice_id(),
            llm_model: default_llm_model(),
            language: None,
            pii_mode: PiiMode::default(),
            transfer: TransferSettings::default(),
            sms: SmsSettings::default(),
            booking: BookingSettings::default(),
            collect_data_enabled: false,
            summary_enabled: true,
            extraction_variables: Vec::new(),
            memory: MemorySettings::default(),
            semantic_memory: SemanticMemorySettings::default(),
            knowledge_base_enabled: false,
            custom_functions: Vec::new(),
            admin_prompt: None,
        }
    }

    /// Billable per-minute add-ons this configuration switches on.
    pub fn billing_addons(&self) -> Vec<String> {
        let mut addons = Vec::new();
        if self.knowledge_base_enabled {
            addons.push("knowledge_base".to_string());
        }
        if self.memory.enabled {
            addons.push("memory".to_string());
        }
        if self.semantic_memory.enabled {
            addons.push("semantic_memory".to_string());
        }
        if self.pii_mode == PiiMode::Redacted {
            addons.push("pii_removal".to_string());
        }
        addons
    }
}
