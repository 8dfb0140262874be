//! Usage-based billing request and receipt.

use crate::Direction;
use serde::{Deserialize, Serialize};

/// A request to deduct the cost of one finished call from a tenant balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingRequest {
    pub tenant_id: String,
    pub duration_seconds: i64,
    /// Characters of synthesised agent speech.
    pub usage_units: u64,
    pub voice_id: String,
    pub llm_model: String,
    pub addons: Vec<String>,
    pub direction: Direction,
    /// Idempotency key. A second request with the same reference is not charged.
    pub reference_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BillingReceipt {
    pub success: bool,
    pub cost: f64,
}
