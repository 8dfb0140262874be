//! Calendar booking and tenant webhook adapter.

use crate::config::IntegrationsConfig;
use crate::error::VoiceError;
use crate::check_status;
use async_trait::async_trait;
use parley_types::{
    BookingConfirmation, BookingRequest, CustomFunction, IntegrationGateway, PortError,
    WebhookContext,
};
use reqwest::{Client, Method};
use serde_json::{json, Map, Value};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpIntegrations {
    config: IntegrationsConfig,
    client: Client,
}

impl HttpIntegrations {
    pub fn new(config: IntegrationsConfig) -> Result<Self, VoiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.webhook_timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn calendar(&self, method: Method, path: &str, credential: &str) -> reqwest::RequestBuilder {
        let base = self.config.calendar_api_base.trim_end_matches('/');
        self.client
            .request(method, format!("{base}/{path}"))
            .bearer_auth(credential)
            .header("cal-api-version", &self.config.calendar_api_version)
    }
}

/// Accepts `YYYY-MM-DD` only.
fn validate_date(date: &str) -> Result<(), VoiceError> {
    let bytes = date.as_bytes();
    let well_formed = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if well_formed {
        Ok(())
    } else {
        Err(VoiceError::InvalidRequest(format!(
            "expected a date like 2026-01-31, got '{date}'"
        )))
    }
}

/// Start times from a slots response, which lists slots either flat or
/// grouped by day.
fn slot_times(body: &Value) -> Vec<String> {
    let slots = &body["data"]["slots"];
    let entries: Vec<&Value> = match slots {
        Value::Array(items) => items.iter().collect(),
        Value::Object(days) => days.values().filter_map(Value::as_array).flatten().collect(),
        _ => Vec::new(),
    };
    entries
        .into_iter()
        .filter_map(|slot| {
            slot.get("time")
                .or_else(|| slot.get("start"))
                .and_then(Value::as_str)
                .or_else(|| slot.as_str())
                .map(str::to_string)
        })
        .collect()
}

fn placeholder_email(name: &str) -> String {
    let local: String = name
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(".");
    format!("{local}@placeholder.booking")
}

/// Webhook body: the engine's arguments plus a `call` object with context.
fn webhook_body(arguments: &Value, context: &WebhookContext) -> Value {
    let mut body = match arguments {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("input".to_string(), other.clone());
            map
        }
    };
    body.insert(
        "call".to_string(),
        json!({
            "tenant_id": context.tenant_id,
            "room_name": context.room_name,
            "caller_phone": context.counterpart_phone,
            "call_record_id": context.call_record_id,
        }),
    );
    Value::Object(body)
}

/// Scalar arguments rendered as query parameters for GET webhooks.
fn query_pairs(arguments: &Value) -> Vec<(String, String)> {
    let Some(map) = arguments.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(k, v)| {
            let rendered = match v {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((k.clone(), rendered))
        })
        .collect()
}

#[async_trait]
impl IntegrationGateway for HttpIntegrations {
    async fn available_slots(
        &self,
        credential: &str,
        event_type_id: Option<i64>,
        date: &str,
    ) -> Result<Vec<String>, PortError> {
        validate_date(date)?;
        let event_type_id = event_type_id.ok_or_else(|| {
            VoiceError::InvalidRequest("no calendar event type is configured".to_string())
        })?;

        let response = self
            .calendar(Method::GET, "slots/available", credential)
            .query(&[
                ("startTime", format!("{date}T00:00:00Z")),
                ("endTime", format!("{date}T23:59:59Z")),
                ("eventTypeId", event_type_id.to_string()),
                ("duration", self.config.booking_duration_minutes.to_string()),
            ])
            .send()
            .await
            .map_err(VoiceError::from)?;
        let body: Value = check_status("calendar", response)
            .await?
            .json()
            .await
            .map_err(VoiceError::from)?;
        Ok(slot_times(&body))
    }

    async fn book_appointment(
        &self,
        credential: &str,
        request: &BookingRequest,
    ) -> Result<BookingConfirmation, PortError> {
        let event_type_id = request.event_type_id.ok_or_else(|| {
            VoiceError::InvalidRequest("no calendar event type is configured".to_string())
        })?;

        let mut responses = Map::new();
        responses.insert("name".to_string(), json!(request.name));
        responses.insert(
            "email".to_string(),
            json!(request
                .email
                .clone()
                .unwrap_or_else(|| placeholder_email(&request.name))),
        );
        if let Some(phone) = &request.phone {
            responses.insert("phone".to_string(), json!(phone));
        }
        if let Some(notes) = &request.notes {
            responses.insert("notes".to_string(), json!(notes));
        }

        let payload = json!({
            "eventTypeId": event_type_id,
            "start": request.start_time,
            "lengthInMinutes": self.config.booking_duration_minutes,
            "responses": responses,
            "timeZone": self.config.time_zone,
            "language": "en",
            "metadata": { "source": "parley_voice_agent" },
        });

        let response = self
            .calendar(Method::POST, "bookings", credential)
            .json(&payload)
            .send()
            .await
            .map_err(VoiceError::from)?;
        let body: Value = check_status("calendar", response)
            .await?
            .json()
            .await
            .map_err(VoiceError::from)?;

        let data = &body["data"];
        let booking_id = data
            .get("uid")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| data.get("id").map(|id| id.to_string()))
            .ok_or_else(|| VoiceError::Decode {
                service: "calendar",
                detail: "booking response carries no id".to_string(),
            })?;
        let start_time = data
            .get("startTime")
            .or_else(|| data.get("start"))
            .and_then(Value::as_str)
            .unwrap_or(&request.start_time)
            .to_string();

        Ok(BookingConfirmation {
            booking_id,
            start_time,
        })
    }

    async fn invoke_webhook(
        &self,
        function: &CustomFunction,
        arguments: &Value,
        context: &WebhookContext,
    ) -> Result<String, PortError> {
        let method = Method::from_bytes(function.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| {
                VoiceError::InvalidRequest(format!("unsupported method {}", function.method))
            })?;

        let mut builder = self.client.request(method.clone(), &function.url);
        for (name, value) in &function.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = if method == Method::GET {
            builder.query(&query_pairs(arguments))
        } else {
            builder.json(&webhook_body(arguments, context))
        };

        let response = builder.send().await.map_err(VoiceError::from)?;
        let text = check_status("webhook", response)
            .await?
            .text()
            .await
            .map_err(VoiceError::from)?;
        tracing::debug!(function = %function.name, bytes = text.len(), "webhook answered");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_must_be_iso_days() {
        assert!(validate_date("2026-10-19").is_ok());
        assert!(validate_date("tomorrow").is_err());
        assert!(validate_date("2026/10/19").is_err());
    }

    #[test]
    fn slots_are_read_flat_or_grouped() {
        let flat = json!({ "data": { "slots": [{ "time": "2026-10-19T09:00:00Z" }] } });
        assert_eq!(slot_times(&flat), vec!["2026-10-19T09:00:00Z"]);

        let grouped = json!({
            "data": { "slots": { "2026-10-19": [
                { "start": "2026-10-19T09:00:00Z" },
                { "start": "2026-10-19T09:30:00Z" }
            ] } }
        });
        assert_eq!(slot_times(&grouped).len(), 2);
        assert!(slot_times(&json!({})).is_empty());
    }

    #[test]
    fn webhook_body_carries_call_context() {
        let context = WebhookContext {
            tenant_id: "t-1".to_string(),
            room_name: "room-1".to_string(),
            counterpart_phone: Some("+15550102000".to_string()),
            call_record_id: None,
        };
        let body = webhook_body(&json!({ "order_id": "A1" }), &context);
        assert_eq!(body["order_id"], "A1");
        assert_eq!(body["call"]["room_name"], "room-1");

        let wrapped = webhook_body(&json!("plain"), &context);
        assert_eq!(wrapped["input"], "plain");
    }

    #[test]
    fn get_webhooks_send_scalars_only() {
        let pairs = query_pairs(&json!({ "q": "x", "n": 2, "nested": { "a": 1 } }));
        assert_eq!(pairs.len(), 2);
        assert!(pairs.contains(&("n".to_string(), "2".to_string())));
    }

    #[test]
    fn placeholder_email_from_name() {
        assert_eq!(placeholder_email(" Ann  Lee "), "ann.lee@placeholder.booking");
    }
}
