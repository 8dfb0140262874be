//! Tenant configuration, number routing and calendar credentials.

use crate::{format_ts, StoreError};
use chrono::Utc;
use parley_types::{normalize_phone, TenantConfig};
use rusqlite::{params, Connection, OptionalExtension};

/// Tenant owning an active platform number.
pub fn tenant_for_service_number(
    conn: &Connection,
    number: &str,
) -> Result<Option<String>, StoreError> {
    let tenant = conn
        .query_row(
            "SELECT tenant_id FROM service_numbers WHERE phone_number = ?1 AND active = 1",
            [normalize_phone(number)],
            |row| row.get(0),
        )
        .optional()?;
    Ok(tenant)
}

pub fn tenant_for_external_number(
    conn: &Connection,
    number: &str,
) -> Result<Option<String>, StoreError> {
    let tenant = conn
        .query_row(
            "SELECT tenant_id FROM external_numbers WHERE phone_number = ?1",
            [normalize_phone(number)],
            |row| row.get(0),
        )
        .optional()?;
    Ok(tenant)
}

/// Loads one configuration of a tenant.
///
/// With `config_id` the configuration must belong to the tenant. Without it
/// the tenant's default wins, then the oldest.
pub fn tenant_config(
    conn: &Connection,
    tenant_id: &str,
    config_id: Option<&str>,
) -> Result<Option<TenantConfig>, StoreError> {
    let row: Option<(String, String)> = match config_id {
        Some(config_id) => conn
            .query_row(
                "SELECT id, config_json FROM tenant_configs WHERE id = ?1 AND tenant_id = ?2",
                params![config_id, tenant_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT id, config_json FROM tenant_configs
                 WHERE tenant_id = ?1
                 ORDER BY is_default DESC, created_at ASC
                 LIMIT 1",
                [tenant_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?,
    };

    let Some((id, json)) = row else {
        return Ok(None);
    };

    // The row owns identity; the document only carries behaviour.
    let mut doc: serde_json::Value = serde_json::from_str(&json)?;
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("id".to_string(), serde_json::Value::String(id));
        obj.insert(
            "tenant_id".to_string(),
            serde_json::Value::String(tenant_id.to_string()),
        );
    }
    Ok(Some(serde_json::from_value(doc)?))
}

/// Inserts or replaces a configuration document.
pub fn upsert_tenant_config(
    conn: &Connection,
    config: &TenantConfig,
    is_default: bool,
) -> Result<(), StoreError> {
    let now = format_ts(Utc::now());
    conn.execute(
        "INSERT INTO tenant_configs (id, tenant_id, is_default, config_json, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(id) DO UPDATE SET
            tenant_id = excluded.tenant_id,
            is_default = excluded.is_default,
            config_json = excluded.config_json,
            updated_at = excluded.updated_at",
        params![
            config.id,
            config.tenant_id,
            is_default,
            serde_json::to_string(config)?,
            now,
        ],
    )?;
    Ok(())
}

pub fn add_service_number(
    conn: &Connection,
    number: &str,
    tenant_id: &str,
    active: bool,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO service_numbers (phone_number, tenant_id, active) VALUES (?1, ?2, ?3)
         ON CONFLICT(phone_number) DO UPDATE SET tenant_id = excluded.tenant_id, active = excluded.active",
        params![normalize_phone(number), tenant_id, active],
    )?;
    Ok(())
}

pub fn add_external_number(
    conn: &Connection,
    number: &str,
    tenant_id: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO external_numbers (phone_number, tenant_id) VALUES (?1, ?2)
         ON CONFLICT(phone_number) DO UPDATE SET tenant_id = excluded.tenant_id",
        params![normalize_phone(number), tenant_id],
    )?;
    Ok(())
}

pub fn calendar_credential(
    conn: &Connection,
    tenant_id: &str,
) -> Result<Option<String>, StoreError> {
    let credential = conn
        .query_row(
            "SELECT credential FROM calendar_credentials WHERE tenant_id = ?1",
            [tenant_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(credential)
}

pub fn set_calendar_credential(
    conn: &Connection,
    tenant_id: &str,
    credential: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO calendar_credentials (tenant_id, credential, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(tenant_id) DO UPDATE SET
            credential = excluded.credential,
            updated_at = excluded.updated_at",
        params![tenant_id, credential, format_ts(Utc::now())],
    )?;
    Ok(())
}
