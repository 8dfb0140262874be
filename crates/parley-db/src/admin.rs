//! Phone admin credentials and their lockout counters.

use crate::{format_ts, parse_opt_ts, StoreError};
use parley_types::{normalize_phone, AdminAccess};
use rusqlite::{params, Connection, OptionalExtension};

pub fn admin_access(
    conn: &Connection,
    tenant_id: &str,
    phone: &str,
) -> Result<Option<AdminAccess>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, tenant_id, phone_number, display_name, code_hash,
                    failed_attempts, first_failure_at, locked_until
             FROM admin_access WHERE tenant_id = ?1 AND phone_number = ?2",
            params![tenant_id, normalize_phone(phone)],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            },
        )
        .optional()?;

    let Some((id, tenant_id, phone_number, display_name, code_hash, failed, first, locked)) = row
    else {
        return Ok(None);
    };

    Ok(Some(AdminAccess {
        id,
        tenant_id,
        phone_number,
        display_name,
        code_hash,
        failed_attempts: failed,
        first_failure_at: parse_opt_ts("admin_access.first_failure_at", first)?,
        locked_until: parse_opt_ts("admin_access.locked_until", locked)?,
    }))
}

/// Creates or replaces the credentials for a phone. Counters reset.
pub fn upsert_admin_access(conn: &Connection, access: &AdminAccess) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO admin_access (
            id, tenant_id, phone_number, display_name, code_hash,
            failed_attempts, first_failure_at, locked_until
        ) VALUES (?1, ?2, ?3, ?4, ?5, 0, NULL, NULL)
        ON CONFLICT(tenant_id, phone_number) DO UPDATE SET
            display_name = excluded.display_name,
            code_hash = excluded.code_hash,
            failed_attempts = 0,
            first_failure_at = NULL,
            locked_until = NULL",
        params![
            access.id,
            access.tenant_id,
            normalize_phone(&access.phone_number),
            access.display_name,
            access.code_hash,
        ],
    )?;
    Ok(())
}

/// Persists the failure counters and lock.
///
/// # Errors
///
/// Returns `StoreError::NotFound` if the record no longer exists.
pub fn save_admin_lockout(conn: &Connection, access: &AdminAccess) -> Result<(), StoreError> {
    let count = conn.execute(
        "UPDATE admin_access
         SET failed_attempts = ?2, first_failure_at = ?3, locked_until = ?4
         WHERE id = ?1",
        params![
            access.id,
            access.failed_attempts,
            access.first_failure_at.map(format_ts),
            access.locked_until.map(format_ts),
        ],
    )?;
    if count == 0 {
        return Err(StoreError::NotFound(access.id.clone()));
    }
    Ok(())
}
