//! The set of capabilities exposed to the conversation engine.
//!
//! Each capability is gated by a tenant flag and, for some, a precondition.
//! A capability whose gate fails is left out silently.

use parley_types::{CapabilitySpec, PiiMode, TenantConfig};
use serde_json::json;

pub const END_CALL: &str = "end_call";
pub const TRANSFER_CALL: &str = "transfer_call";
pub const START_WARM_TRANSFER: &str = "start_warm_transfer";
pub const COMPLETE_WARM_TRANSFER: &str = "complete_warm_transfer";
pub const CANCEL_WARM_TRANSFER: &str = "cancel_warm_transfer";
pub const SEND_SMS: &str = "send_sms";
pub const CHECK_AVAILABILITY: &str = "check_availability";
pub const BOOK_APPOINTMENT: &str = "book_appointment";
pub const COLLECT_CALLER_DATA: &str = "collect_caller_data";

const BUILT_IN: &[&str] = &[
    END_CALL,
    TRANSFER_CALL,
    START_WARM_TRANSFER,
    COMPLETE_WARM_TRANSFER,
    CANCEL_WARM_TRANSFER,
    SEND_SMS,
    CHECK_AVAILABILITY,
    BOOK_APPOINTMENT,
    COLLECT_CALLER_DATA,
];

/// What a capability name dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    EndCall,
    TransferCall,
    StartWarmTransfer,
    CompleteWarmTransfer,
    CancelWarmTransfer,
    SendSms,
    CheckAvailability,
    BookAppointment,
    CollectCallerData,
    /// Index into `TenantConfig::custom_functions`.
    Custom(usize),
}

/// Facts beyond the tenant configuration that gate capabilities.
#[derive(Debug, Clone, Default)]
pub struct Preconditions {
    pub calendar_credential: Option<String>,
}

/// Capabilities exposed for one call.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    entries: Vec<(CapabilitySpec, CapabilityKind)>,
}

impl CapabilitySet {
    fn push(&mut self, kind: CapabilityKind, name: &str, description: &str, parameters: serde_json::Value) {
        self.entries.push((
            CapabilitySpec {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
            kind,
        ));
    }

    pub fn specs(&self) -> Vec<CapabilitySpec> {
        self.entries.iter().map(|(spec, _)| spec.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(spec, _)| spec.name.as_str()).collect()
    }

    pub fn lookup(&self, name: &str) -> Option<CapabilityKind> {
        self.entries
            .iter()
            .find(|(spec, _)| spec.name == name)
            .map(|(_, kind)| *kind)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }
}

fn no_arguments() -> serde_json::Value {
    json!({ "type": "object", "properties": {} })
}

fn target_argument() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "target": { "type": "string", "description": "Who or which department to transfer to" }
        },
        "required": ["target"]
    })
}

/// Builds the capability set for a call.
pub fn assemble(config: &TenantConfig, pre: &Preconditions) -> CapabilitySet {
    let mut set = CapabilitySet::default();

    set.push(
        CapabilityKind::EndCall,
        END_CALL,
        "End the call after saying goodbye, once the conversation is complete.",
        no_arguments(),
    );

    let transfer = &config.transfer;
    if transfer.enabled && !transfer.destinations.is_empty() {
        set.push(
            CapabilityKind::TransferCall,
            TRANSFER_CALL,
            "Transfer the caller to a person or department immediately.",
            target_argument(),
        );
        if transfer.warm_enabled {
            set.push(
                CapabilityKind::StartWarmTransfer,
                START_WARM_TRANSFER,
                "Place the caller on hold and call a person or department so you can brief \
                 them before connecting the caller.",
                target_argument(),
            );
            set.push(
                CapabilityKind::CompleteWarmTransfer,
                COMPLETE_WARM_TRANSFER,
                "Connect the held caller with the person you briefed.",
                no_arguments(),
            );
            set.push(
                CapabilityKind::CancelWarmTransfer,
                CANCEL_WARM_TRANSFER,
                "Abandon the transfer in progress and return to the caller.",
                no_arguments(),
            );
        }
    }

    let sms = &config.sms;
    if sms.enabled && sms.sender_sms_capable && sms.sender_number.is_some() {
        set.push(
            CapabilityKind::SendSms,
            SEND_SMS,
            "Send a text message to the caller.",
            json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string", "description": "Text to send" }
                },
                "required": ["message"]
            }),
        );
    }

    if config.booking.enabled && pre.calendar_credential.is_some() {
        set.push(
            CapabilityKind::CheckAvailability,
            CHECK_AVAILABILITY,
            "List open appointment times on a date.",
            json!({
                "type": "object",
                "properties": {
                    "date": { "type": "string", "description": "Date as YYYY-MM-DD" }
                },
                "required": ["date"]
            }),
        );
        set.push(
            CapabilityKind::BookAppointment,
            BOOK_APPOINTMENT,
            "Book an appointment at an available time.",
            json!({
                "type": "object",
                "properties": {
                    "start_time": { "type": "string", "description": "ISO-8601 start time" },
                    "name": { "type": "string" },
                    "email": { "type": "string" },
                    "notes": { "type": "string" }
                },
                "required": ["start_time", "name"]
            }),
        );
    }

    if config.collect_data_enabled && config.pii_mode != PiiMode::Disabled {
        set.push(
            CapabilityKind::CollectCallerData,
            COLLECT_CALLER_DATA,
            "Record a piece of information the caller provides, such as a name, email \
             address or reason for calling.",
            json!({
                "type": "object",
                "properties": {
                    "data_type": { "type": "string" },
                    "data_value": { "type": "string" },
                    "context": { "type": "string" }
                },
                "required": ["data_type", "data_value"]
            }),
        );
    }

    for (index, function) in config.custom_functions.iter().enumerate() {
        if !function.active {
            continue;
        }
        if BUILT_IN.contains(&function.name.as_str()) || set.contains(&function.name) {
            tracing::warn!(name = %function.name, "skipping custom function with a reserved or duplicate name");
            continue;
        }
        if !(function.url.starts_with("https://") || function.url.starts_with("http://")) {
            tracing::warn!(name = %function.name, "skipping custom function without an http url");
            continue;
        }
        set.push(
            CapabilityKind::Custom(index),
            &function.name,
            &function.description,
            function.parameters.clone(),
        );
    }

    set
}
