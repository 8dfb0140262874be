//! Schema migrations compiled into the worker, plus the schema check run
//! before a database is handed to the datastore.

use rusqlite::Connection;
use std::collections::HashSet;
use thiserror::Error;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

// Append only; names are the ledger keys.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "001_tenants",
        sql: include_str!("migrations/001_tenants.sql"),
    },
    Migration {
        name: "002_call_records",
        sql: include_str!("migrations/002_call_records.sql"),
    },
    Migration {
        name: "003_conversation_memories",
        sql: include_str!("migrations/003_conversation_memories.sql"),
    },
    Migration {
        name: "004_admin_access",
        sql: include_str!("migrations/004_admin_access.sql"),
    },
    Migration {
        name: "005_billing",
        sql: include_str!("migrations/005_billing.sql"),
    },
];

/// Tables the query helpers read and write. [`verify_schema`] refuses to
/// hand out a database missing any of them.
pub const REQUIRED_TABLES: &[&str] = &[
    "tenant_configs",
    "service_numbers",
    "external_numbers",
    "calendar_credentials",
    "call_records",
    "collected_call_data",
    "conversation_memories",
    "admin_access",
    "tenant_balances",
    "billing_ledger",
];

const LEDGER: &str = "_parley_migrations";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        source: rusqlite::Error,
    },

    #[error("failed to read migration ledger: {0}")]
    StateQuery(rusqlite::Error),

    #[error("database is missing tables: {}", .0.join(", "))]
    MissingTables(Vec<&'static str>),
}

/// Applies every migration not yet in the ledger and returns how many ran.
///
/// A migration and its ledger row commit together.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply(conn, MIGRATIONS)
}

/// Names of applied migrations, oldest first.
pub fn applied_migrations(conn: &Connection) -> Result<Vec<String>, MigrationError> {
    ensure_ledger(conn)?;
    let mut stmt = conn
        .prepare(&format!("SELECT name FROM {LEDGER} ORDER BY id"))
        .map_err(MigrationError::StateQuery)?;
    let names = stmt
        .query_map([], |row| row.get(0))
        .and_then(|rows| rows.collect::<Result<Vec<String>, _>>())
        .map_err(MigrationError::StateQuery)?;
    Ok(names)
}

/// Checks that every table in [`REQUIRED_TABLES`] exists.
pub fn verify_schema(conn: &Connection) -> Result<(), MigrationError> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
        .map_err(MigrationError::StateQuery)?;
    let present = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|rows| rows.collect::<Result<HashSet<_>, _>>())
        .map_err(MigrationError::StateQuery)?;

    let missing: Vec<&'static str> = REQUIRED_TABLES
        .iter()
        .copied()
        .filter(|t| !present.contains(*t))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(MigrationError::MissingTables(missing))
    }
}

fn ensure_ledger(conn: &Connection) -> Result<(), MigrationError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {LEDGER} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );"
    ))
    .map_err(|e| MigrationError::ExecutionFailed {
        name: LEDGER.to_string(),
        source: e,
    })
}

fn apply(conn: &Connection, migrations: &[Migration]) -> Result<usize, MigrationError> {
    let done: HashSet<String> = applied_migrations(conn)?.into_iter().collect();
    let pending: Vec<&Migration> = migrations
        .iter()
        .filter(|m| !done.contains(m.name))
        .collect();

    for migration in &pending {
        tracing::info!(migration = migration.name, "applying migration");
        let failed = |e: rusqlite::Error| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source: e,
        };
        let tx = conn.unchecked_transaction().map_err(failed)?;
        tx.execute_batch(migration.sql).map_err(failed)?;
        tx.execute(&format!("INSERT INTO {LEDGER} (name) VALUES (?1)"), [migration.name])
            .map_err(failed)?;
        tx.commit().map_err(failed)?;
    }

    Ok(pending.len())
}
