//! First-match-wins lookups for the durable call record and call direction.
//!
//! Each strategy is a separate query so it can be exercised on its own.
//! Lookup errors are logged and treated as "not found".

use chrono::{DateTime, Utc};
use parley_types::{CallRecordMatch, Datastore, Direction, PortError};

/// One way of finding the durable record of the current call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStrategy {
    /// Match on the telephony provider's call id.
    ProviderCallId,
    /// Most recent record for the tenant on the same service number.
    TenantAndServiceNumber,
    /// Most recent record for the tenant on any number.
    TenantOnly,
}

impl RecordStrategy {
    /// Order used for call record resolution.
    pub const ALL: [RecordStrategy; 3] = [
        RecordStrategy::ProviderCallId,
        RecordStrategy::TenantAndServiceNumber,
        RecordStrategy::TenantOnly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProviderCallId => "provider_call_id",
            Self::TenantAndServiceNumber => "tenant_service_number",
            Self::TenantOnly => "tenant_only",
        }
    }
}

/// What is known about the call when resolving.
#[derive(Debug, Clone, Copy)]
pub struct RecordKey<'a> {
    pub tenant_id: &'a str,
    pub service_number: Option<&'a str>,
    pub provider_call_id: Option<&'a str>,
    /// Only records created at or after this instant qualify for the
    /// timestamp strategies.
    pub since: DateTime<Utc>,
}

/// Runs a single strategy. `Ok(None)` when the strategy does not apply.
pub async fn lookup(
    store: &dyn Datastore,
    strategy: RecordStrategy,
    key: &RecordKey<'_>,
) -> Result<Option<CallRecordMatch>, PortError> {
    match strategy {
        RecordStrategy::ProviderCallId => match key.provider_call_id {
            Some(id) => store.call_record_by_provider_id(id).await,
            None => Ok(None),
        },
        RecordStrategy::TenantAndServiceNumber => match key.service_number {
            Some(number) => {
                store
                    .recent_call_record(key.tenant_id, Some(number), key.since)
                    .await
            }
            None => Ok(None),
        },
        RecordStrategy::TenantOnly => store.recent_call_record(key.tenant_id, None, key.since).await,
    }
}

/// Tries `strategies` in order and returns the first match.
pub async fn first_match(
    store: &dyn Datastore,
    strategies: &[RecordStrategy],
    key: &RecordKey<'_>,
) -> Option<(RecordStrategy, CallRecordMatch)> {
    for &strategy in strategies {
        match lookup(store, strategy, key).await {
            Ok(Some(found)) => {
                tracing::debug!(
                    strategy = strategy.as_str(),
                    call_record_id = %found.id,
                    "call record resolved"
                );
                return Some((strategy, found));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    strategy = strategy.as_str(),
                    tenant_id = key.tenant_id,
                    error = %e,
                    "call record lookup failed, treating as not found"
                );
            }
        }
    }
    None
}

/// Resolves the durable call record using every strategy in order.
pub async fn resolve_call_record(
    store: &dyn Datastore,
    key: &RecordKey<'_>,
) -> Option<CallRecordMatch> {
    first_match(store, &RecordStrategy::ALL, key)
        .await
        .map(|(_, found)| found)
}

/// Infers direction from a recently created record, preferring one on the
/// same service number. Defaults to inbound.
pub async fn resolve_direction(store: &dyn Datastore, key: &RecordKey<'_>) -> Direction {
    let strategies = [
        RecordStrategy::TenantAndServiceNumber,
        RecordStrategy::TenantOnly,
    ];
    match first_match(store, &strategies, key).await {
        Some((_, found)) => found.direction,
        None => Direction::Inbound,
    }
}
