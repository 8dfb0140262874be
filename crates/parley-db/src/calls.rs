//! Call records and the data collected during calls.

use crate::{format_ts, parse_ts, StoreError};
use chrono::{DateTime, Utc};
use parley_types::{
    CallRecordMatch, CallRecordUpdate, CallStatus, CollectedData, Direction, NewCallRecord,
    TranscriptEntry,
};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

/// A call record as stored, for inspection and export.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCallRecord {
    pub id: String,
    pub tenant_id: String,
    pub config_id: Option<String>,
    pub direction: Direction,
    pub status: CallStatus,
    pub room_name: String,
    pub service_number: Option<String>,
    pub counterpart_number: Option<String>,
    pub provider_call_id: Option<String>,
    pub transcript: Option<Vec<TranscriptEntry>>,
    pub summary: Option<String>,
    pub extracted_data: Option<Value>,
    pub duration_seconds: Option<i64>,
    pub ended_at: Option<DateTime<Utc>>,
}

fn parse_direction(raw: &str) -> Result<Direction, StoreError> {
    raw.parse().map_err(|_| StoreError::Corrupt {
        column: "call_records.direction",
        value: raw.to_string(),
    })
}

fn map_row_to_match(row: &Row) -> rusqlite::Result<(String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn into_match(raw: Option<(String, String, String)>) -> Result<Option<CallRecordMatch>, StoreError> {
    raw.map(|(id, direction, created_at)| -> Result<_, StoreError> {
        Ok(CallRecordMatch {
            id,
            direction: parse_direction(&direction)?,
            created_at: parse_ts("call_records.created_at", &created_at)?,
        })
    })
    .transpose()
}

pub fn call_record_by_provider_id(
    conn: &Connection,
    provider_call_id: &str,
) -> Result<Option<CallRecordMatch>, StoreError> {
    let raw = conn
        .query_row(
            "SELECT id, direction, created_at FROM call_records
             WHERE provider_call_id = ?1
             ORDER BY created_at DESC
             LIMIT 1",
            [provider_call_id],
            map_row_to_match,
        )
        .optional()?;
    into_match(raw)
}

/// Newest in-progress record of a tenant created at or after `since`.
pub fn recent_call_record(
    conn: &Connection,
    tenant_id: &str,
    service_number: Option<&str>,
    since: DateTime<Utc>,
) -> Result<Option<CallRecordMatch>, StoreError> {
    let raw = conn
        .query_row(
            "SELECT id, direction, created_at FROM call_records
             WHERE tenant_id = ?1
               AND (?2 IS NULL OR service_number = ?2)
               AND status = 'in_progress'
               AND created_at >= ?3
             ORDER BY created_at DESC
             LIMIT 1",
            params![tenant_id, service_number, format_ts(since)],
            map_row_to_match,
        )
        .optional()?;
    into_match(raw)
}

/// Inserts an in-progress record and returns its generated id.
pub fn create_call_record(conn: &Connection, record: &NewCallRecord) -> Result<String, StoreError> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO call_records (
            id, tenant_id, config_id, direction, status, room_name,
            service_number, counterpart_number, provider_call_id, started_at, created_at
        ) VALUES (?1, ?2, ?3, ?4, 'in_progress', ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            id,
            record.tenant_id,
            record.config_id,
            record.direction.as_str(),
            record.room_name,
            record.service_number,
            record.counterpart_number,
            record.provider_call_id,
            format_ts(record.started_at),
            format_ts(Utc::now()),
        ],
    )?;
    Ok(id)
}

/// Applies the `Some` fields of `update`.
///
/// # Errors
///
/// Returns `StoreError::NotFound` if no record has this id.
pub fn update_call_record(
    conn: &Connection,
    id: &str,
    update: &CallRecordUpdate,
) -> Result<(), StoreError> {
    let mut set_parts: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn ToSql>> = Vec::new();

    let mut push = |column: &str, value: Box<dyn ToSql>| {
        values.push(value);
        set_parts.push(format!("{column} = ?{}", values.len()));
    };

    if let Some(status) = update.status {
        push("status", Box::new(status.as_str()));
    }
    if let Some(ended_at) = update.ended_at {
        push("ended_at", Box::new(format_ts(ended_at)));
    }
    if let Some(duration) = update.duration_seconds {
        push("duration_seconds", Box::new(duration));
    }
    if let Some(transcript) = &update.transcript {
        push("transcript_json", Box::new(serde_json::to_string(transcript)?));
    }
    if let Some(summary) = &update.summary {
        push("summary", Box::new(summary.clone()));
    }
    if let Some(data) = &update.extracted_data {
        push("extracted_data_json", Box::new(serde_json::to_string(data)?));
    }

    if set_parts.is_empty() {
        return if record_exists(conn, id)? {
            Ok(())
        } else {
            Err(StoreError::NotFound(id.to_string()))
        };
    }

    let sql = format!(
        "UPDATE call_records SET {} WHERE id = ?{}",
        set_parts.join(", "),
        values.len() + 1
    );
    values.push(Box::new(id.to_string()));

    let params: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let count = conn.execute(&sql, params.as_slice())?;
    if count == 0 {
        return Err(StoreError::NotFound(id.to_string()));
    }
    Ok(())
}

/// Replaces the transcript of a record that is still in progress.
///
/// Returns whether a row was written. A completed record is left alone so a
/// late streaming save can never clobber the final transcript.
pub fn save_partial_transcript(
    conn: &Connection,
    id: &str,
    transcript: &[TranscriptEntry],
) -> Result<bool, StoreError> {
    let count = conn.execute(
        "UPDATE call_records SET transcript_json = ?2 WHERE id = ?1 AND status = 'in_progress'",
        params![id, serde_json::to_string(transcript)?],
    )?;
    Ok(count > 0)
}

fn record_exists(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM call_records WHERE id = ?1)",
        [id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn get_call_record(conn: &Connection, id: &str) -> Result<StoredCallRecord, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, tenant_id, config_id, direction, status, room_name, service_number,
                    counterpart_number, provider_call_id, transcript_json, summary,
                    extracted_data_json, duration_seconds, ended_at
             FROM call_records WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    (
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ),
                    (
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, Option<String>>(8)?,
                        row.get::<_, Option<String>>(9)?,
                        row.get::<_, Option<String>>(10)?,
                        row.get::<_, Option<String>>(11)?,
                        row.get::<_, Option<i64>>(12)?,
                        row.get::<_, Option<String>>(13)?,
                    ),
                ))
            },
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

    let (
        (id, tenant_id, config_id, direction, status, room_name, service_number),
        (counterpart_number, provider_call_id, transcript, summary, extracted, duration, ended_at),
    ) = row;

    let status = match status.as_str() {
        "in_progress" => CallStatus::InProgress,
        "completed" => CallStatus::Completed,
        other => {
            return Err(StoreError::Corrupt {
                column: "call_records.status",
                value: other.to_string(),
            })
        }
    };

    Ok(StoredCallRecord {
        id,
        tenant_id,
        config_id,
        direction: parse_direction(&direction)?,
        status,
        room_name,
        service_number,
        counterpart_number,
        provider_call_id,
        transcript: transcript.map(|t| serde_json::from_str(&t)).transpose()?,
        summary,
        extracted_data: extracted.map(|e| serde_json::from_str(&e)).transpose()?,
        duration_seconds: duration,
        ended_at: crate::parse_opt_ts("call_records.ended_at", ended_at)?,
    })
}

pub fn record_collected_data(conn: &Connection, data: &CollectedData) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO collected_call_data (
            tenant_id, call_record_id, room_name, data_type, data_value, context, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            data.tenant_id,
            data.call_record_id,
            data.room_name,
            data.data_type,
            data.data_value,
            data.context,
            format_ts(Utc::now()),
        ],
    )?;
    Ok(())
}

/// Collected values of a call, oldest first.
pub fn collected_data_for_call(
    conn: &Connection,
    call_record_id: &str,
) -> Result<Vec<CollectedData>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT tenant_id, call_record_id, room_name, data_type, data_value, context
         FROM collected_call_data WHERE call_record_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([call_record_id], |row| {
        Ok(CollectedData {
            tenant_id: row.get(0)?,
            call_record_id: row.get(1)?,
            room_name: row.get(2)?,
            data_type: row.get(3)?,
            data_value: row.get(4)?,
            context: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
