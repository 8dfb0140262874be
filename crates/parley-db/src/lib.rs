//! Database layer for the Parley call worker.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, the synchronous query helpers for every table,
//! and [`SqliteDatastore`], the async [`parley_types::Datastore`] adapter the
//! session controller talks to.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: one worker process owns its database file.
//!   WAL mode allows the partial-transcript writer and settlement to run
//!   beside concurrent lookups from other calls.
//! - **Synchronous helpers, async adapter**: every query is a plain function
//!   over `&Connection`, so it is testable without a runtime. The adapter
//!   runs them on the blocking pool with `spawn_blocking`.
//! - **Timestamps as RFC 3339 text**: always written with microsecond
//!   precision and a `Z` suffix, so lexical order matches time order and
//!   window queries can compare strings.
//! - **Embedded migrations**: SQL files are compiled in with `include_str!`.
//!   [`open_database`] applies them and refuses a schema missing any table
//!   the helpers use.

pub mod admin;
pub mod billing;
pub mod calls;
pub mod memory;
mod migrations;
mod pool;
mod store;
pub mod tenants;

pub use migrations::{
    applied_migrations, run_migrations, verify_schema, MigrationError, REQUIRED_TABLES,
};
pub use pool::{create_pool, open_database, DbPool, DbRuntimeSettings, PoolError};
pub use store::{SqliteDatastore, StoreError};

use chrono::{DateTime, SecondsFormat, Utc};

pub(crate) fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(column: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt {
            column,
            value: raw.to_string(),
        })
}

pub(crate) fn parse_opt_ts(
    column: &'static str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(|r| parse_ts(column, &r)).transpose()
}
