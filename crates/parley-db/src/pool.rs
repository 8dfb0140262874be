//! Opening the worker's SQLite database.
//!
//! [`open_database`] is what the worker calls at startup: it builds the pool,
//! brings the schema up to date and checks it. [`create_pool`] only builds
//! the pool.

use crate::migrations::{run_migrations, verify_schema, MigrationError};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use thiserror::Error;

const IN_MEMORY: &str = ":memory:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Milliseconds a connection waits on a locked database.
    pub busy_timeout_ms: u64,
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to open database connection: {0}")]
    Connection(#[from] r2d2::Error),

    #[error(transparent)]
    Schema(#[from] MigrationError),
}

/// Builds a connection pool over `db_path`.
///
/// Every connection runs in WAL mode with foreign keys on. An in-memory
/// database lives only as long as its connection, so `:memory:` gets a pool
/// of exactly one connection and every caller sees the same data.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let busy_timeout_ms = settings.busy_timeout_ms;

    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| {
            let mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
            if !matches!(mode.as_str(), "wal" | "memory") {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                    Some(format!("journal mode stayed {mode}")),
                ));
            }
            conn.execute_batch(&format!(
                "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {busy_timeout_ms};"
            ))
        });

    let max_size = if db_path == IN_MEMORY {
        1
    } else {
        settings.pool_max_size
    };
    Ok(Pool::builder().max_size(max_size).build(manager)?)
}

/// Builds the pool, applies pending migrations and verifies the schema.
pub fn open_database(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let pool = create_pool(db_path, settings)?;
    {
        let conn = pool.get()?;
        let applied = run_migrations(&conn)?;
        if applied > 0 {
            tracing::info!(count = applied, path = db_path, "applied database migrations");
        }
        verify_schema(&conn)?;
    }
    Ok(pool)
}
