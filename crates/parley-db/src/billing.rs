//! Usage pricing and the tenant balance ledger.
//!
//! A call is priced per minute as the sum of a voice rate, a language-model
//! rate, the telephony rate and the rates of every enabled add-on. The
//! charge is written to `billing_ledger` under the call's reference, which
//! makes a repeated deduction for the same call a no-op.

use crate::{format_ts, StoreError};
use chrono::Utc;
use parley_types::{BillingReceipt, BillingRequest};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

pub const TELEPHONY_RATE: f64 = 0.015;

const OPENAI_VOICE_RATE: f64 = 0.08;
const DEFAULT_VOICE_RATE: f64 = 0.07;
const DEFAULT_LLM_RATE: f64 = 0.006;

const LLM_RATES: &[(&str, f64)] = &[
    ("gpt-4o", 0.05),
    ("gpt-4o-mini", 0.006),
    ("gpt-4.1", 0.045),
    ("gpt-4.1-mini", 0.016),
    ("gpt-5", 0.04),
    ("gpt-5-mini", 0.012),
    ("gpt-5-nano", 0.003),
    ("claude-3.5-sonnet", 0.05),
    ("claude-3-haiku", 0.006),
];

const ADDON_RATES: &[(&str, f64)] = &[
    ("knowledge_base", 0.005),
    ("memory", 0.005),
    ("semantic_memory", 0.005),
    ("pii_removal", 0.01),
];

pub fn voice_rate(voice_id: &str) -> f64 {
    if voice_id.starts_with("openai-") {
        OPENAI_VOICE_RATE
    } else {
        DEFAULT_VOICE_RATE
    }
}

pub fn llm_rate(model: &str) -> f64 {
    LLM_RATES
        .iter()
        .find(|(name, _)| *name == model)
        .map_or(DEFAULT_LLM_RATE, |(_, rate)| *rate)
}

/// Sum of the per-minute rates of known add-ons. Unknown names are free.
pub fn addon_rate(addons: &[String]) -> f64 {
    addons
        .iter()
        .filter_map(|a| ADDON_RATES.iter().find(|(name, _)| *name == a.as_str()))
        .map(|(_, rate)| rate)
        .sum()
}

/// Cost of a call, rounded to four decimals.
pub fn call_cost(request: &BillingRequest) -> f64 {
    let minutes = request.duration_seconds.max(0) as f64 / 60.0;
    let per_minute = voice_rate(&request.voice_id)
        + llm_rate(&request.llm_model)
        + TELEPHONY_RATE
        + addon_rate(&request.addons);
    round4(minutes * per_minute)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

pub fn balance(conn: &Connection, tenant_id: &str) -> Result<f64, StoreError> {
    let balance = conn
        .query_row(
            "SELECT balance FROM tenant_balances WHERE tenant_id = ?1",
            [tenant_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(balance.unwrap_or(0.0))
}

/// Adds `amount` to a tenant's balance and returns the new balance.
pub fn credit(conn: &Connection, tenant_id: &str, amount: f64) -> Result<f64, StoreError> {
    conn.execute(
        "INSERT INTO tenant_balances (tenant_id, balance, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(tenant_id) DO UPDATE SET
            balance = balance + excluded.balance,
            updated_at = excluded.updated_at",
        params![tenant_id, amount, format_ts(Utc::now())],
    )?;
    balance(conn, tenant_id)
}

/// Charges a call against the tenant balance.
///
/// A reference that was already charged returns the original cost without
/// charging again. A balance smaller than the cost is left untouched and
/// the receipt reports `success = false`.
pub fn deduct(conn: &mut Connection, request: &BillingRequest) -> Result<BillingReceipt, StoreError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some(reference) = &request.reference_id {
        let charged: Option<f64> = tx
            .query_row(
                "SELECT cost FROM billing_ledger WHERE reference_id = ?1",
                [reference],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(cost) = charged {
            tracing::debug!(reference_id = %reference, cost, "call already billed");
            return Ok(BillingReceipt {
                success: true,
                cost,
            });
        }
    }

    let cost = call_cost(request);
    let current = balance(&tx, &request.tenant_id)?;
    if current < cost {
        tracing::warn!(
            tenant_id = %request.tenant_id,
            balance = current,
            cost,
            "insufficient balance for call"
        );
        return Ok(BillingReceipt {
            success: false,
            cost,
        });
    }

    let remaining = round4(current - cost);
    let now = format_ts(Utc::now());
    tx.execute(
        "INSERT INTO tenant_balances (tenant_id, balance, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(tenant_id) DO UPDATE SET
            balance = excluded.balance,
            updated_at = excluded.updated_at",
        params![request.tenant_id, remaining, now],
    )?;
    tx.execute(
        "INSERT INTO billing_ledger (
            tenant_id, reference_id, direction, duration_seconds, usage_units,
            cost, balance_after, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            request.tenant_id,
            request.reference_id,
            request.direction.as_str(),
            request.duration_seconds,
            request.usage_units as i64,
            cost,
            remaining,
            now,
        ],
    )?;
    tx.commit()?;

    Ok(BillingReceipt {
        success: true,
        cost,
    })
}
