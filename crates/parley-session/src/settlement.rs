//! Once-only work performed when a call ends.
//!
//! [`settle`] checks and sets the session's cleanup flag before anything
//! else, so concurrent end signals collapse into one settlement. Every step
//! after that is isolated: a failure is logged and the next step still runs.

use crate::resolve::{self, RecordKey};
use crate::settings::SessionSettings;
use crate::state::CallSession;
use crate::{memory, tasks, Services, SessionError};
use chrono::{DateTime, Utc};
use parley_types::{
    format_transcript, parse_labeled_transcript, BillingReceipt, BillingRequest, CallRecordUpdate,
    NewCallRecord, PiiMode, PortError, TenantConfig, TranscriptEntry,
};

/// What settlement did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettlementReport {
    pub call_record_id: Option<String>,
    pub duration_seconds: i64,
    /// Whether any conversation content was written to the call record.
    pub content_written: bool,
    pub summary: Option<String>,
    pub billing: Option<BillingReceipt>,
    pub memory_updated: bool,
    /// Names of the steps that failed.
    pub failed_steps: Vec<&'static str>,
}

impl SettlementReport {
    fn fail(&mut self, error: SessionError) {
        if let SessionError::Settlement { step, .. } = &error {
            self.failed_steps.push(*step);
        }
        tracing::warn!(error = %error, "settlement step failed");
    }
}

fn step_error(step: &'static str, source: PortError) -> SessionError {
    SessionError::Settlement { step, source }
}

/// Content derived from the transcript, already filtered by PII mode.
#[derive(Debug, Default)]
struct Content {
    transcript: Option<Vec<TranscriptEntry>>,
    summary: Option<String>,
    extracted: Option<serde_json::Value>,
}

/// Runs settlement for `session`. Returns `None` if settlement had already
/// begun.
pub async fn settle(
    services: &Services,
    settings: &SessionSettings,
    config: &TenantConfig,
    session: &mut CallSession,
    now: DateTime<Utc>,
) -> Option<SettlementReport> {
    if !session.begin_cleanup() {
        tracing::debug!(room = %session.room_name(), "settlement already started");
        return None;
    }

    let room = session.room_name().to_string();
    let mut report = SettlementReport {
        duration_seconds: (now - session.billing_started_at()).num_seconds().max(0),
        ..SettlementReport::default()
    };

    if let Err(e) = services.engine.stop_session(&room).await {
        tracing::warn!(room = %room, error = %e, "failed to stop engine session");
    }

    bind_call_record(services, settings, config, session, &mut report).await;
    report.call_record_id = session.call_record_id().map(str::to_string);

    let content = derive_content(services, config, session.transcript(), &mut report).await;
    report.summary = content.summary.clone();

    if let Some(id) = session.call_record_id() {
        let update = CallRecordUpdate {
            transcript: content.transcript,
            summary: content.summary,
            extracted_data: content.extracted,
            ..CallRecordUpdate::completed(now, report.duration_seconds)
        };
        match services.store.update_call_record(id, &update).await {
            Ok(()) => report.content_written = update.carries_content(),
            Err(e) => report.fail(step_error("save_call_record", e)),
        }
    }

    let billing = BillingRequest {
        tenant_id: session.tenant_id().to_string(),
        duration_seconds: report.duration_seconds,
        usage_units: session.agent_characters(),
        voice_id: config.voice_id.clone(),
        llm_model: config.llm_model.clone(),
        addons: config.billing_addons(),
        direction: session.direction(),
        reference_id: report.call_record_id.clone(),
    };
    match services.store.deduct(&billing).await {
        Ok(receipt) => {
            if !receipt.success {
                tracing::warn!(tenant_id = %billing.tenant_id, "billing deduction declined");
            }
            report.billing = Some(receipt);
        }
        Err(e) => report.fail(step_error("billing", e)),
    }

    if config.memory.enabled {
        if let (Some(summary), Some(phone)) = (report.summary.clone(), session.counterpart_phone()) {
            match memory::update(services, settings, config, phone, &summary, now).await {
                Ok(_) => report.memory_updated = true,
                Err(e) => report.fail(step_error("memory_update", e)),
            }
        }
    }

    session.finish_cleanup();
    tracing::info!(
        room = %room,
        call_record_id = ?report.call_record_id,
        duration_seconds = report.duration_seconds,
        failed_steps = ?report.failed_steps,
        "call settled"
    );
    Some(report)
}

async fn bind_call_record(
    services: &Services,
    settings: &SessionSettings,
    config: &TenantConfig,
    session: &mut CallSession,
    report: &mut SettlementReport,
) {
    if session.call_record_id().is_some() {
        return;
    }
    let key = RecordKey {
        tenant_id: session.tenant_id(),
        service_number: session.service_number(),
        provider_call_id: session.provider_call_id(),
        since: session.billing_started_at() - settings.recent_call_window(),
    };
    if let Some(found) = resolve::resolve_call_record(services.store.as_ref(), &key).await {
        session.bind_call_record(found.id);
        return;
    }

    let record = NewCallRecord {
        tenant_id: session.tenant_id().to_string(),
        config_id: Some(config.id.clone()),
        direction: session.direction(),
        room_name: session.room_name().to_string(),
        service_number: session.service_number().map(str::to_string),
        counterpart_number: session.counterpart_phone().map(str::to_string),
        provider_call_id: session.provider_call_id().map(str::to_string),
        started_at: session.billing_started_at(),
    };
    match services.store.create_call_record(&record).await {
        Ok(id) => {
            tracing::info!(room = %session.room_name(), call_record_id = %id, "created call record at settlement");
            session.bind_call_record(id);
        }
        Err(e) => report.fail(step_error("create_call_record", e)),
    }
}

async fn derive_content(
    services: &Services,
    config: &TenantConfig,
    transcript: &[TranscriptEntry],
    report: &mut SettlementReport,
) -> Content {
    let engine = services.engine.as_ref();
    let (entries, text) = match config.pii_mode {
        PiiMode::Disabled => return Content::default(),
        PiiMode::Enabled => (transcript.to_vec(), format_transcript(transcript)),
        PiiMode::Redacted => {
            if transcript.is_empty() {
                (Vec::new(), String::new())
            } else {
                match tasks::redact(engine, &format_transcript(transcript)).await {
                    Ok(redacted) => (parse_labeled_transcript(&redacted), redacted),
                    Err(e) => {
                        report.fail(step_error("redact", e));
                        return Content::default();
                    }
                }
            }
        }
    };

    let mut content = Content {
        transcript: Some(entries),
        ..Content::default()
    };
    if text.is_empty() {
        return content;
    }

    if config.summary_enabled {
        match tasks::summarize(engine, &text).await {
            Ok(summary) => content.summary = Some(summary),
            Err(e) => report.fail(step_error("summarize", e)),
        }
    }
    if !config.extraction_variables.is_empty() {
        match tasks::extract(engine, &config.extraction_variables, &text).await {
            Ok(value) => content.extracted = Some(value),
            Err(e) => report.fail(step_error("extract", e)),
        }
    }
    content
}
