//! Ledger events — the audit trail every job emits.
//!
//! RULE: every state change a job makes is described by exactly one
//! event, appended to `event_log` by the engine after the job returns.

use crate::types::PositionId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Variants are appended; never remove or reorder them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    // ── Lifecycle ──────────────────────────────────
    PositionMatured {
        position_id: PositionId,
        wallet: String,
        product_id: String,
        payout: Decimal,
        profit: Decimal,
    },
    PositionForfeited {
        position_id: PositionId,
        wallet: String,
        reason: String,
    },

    // ── Referral rewards ───────────────────────────
    ReferralRewardPaid {
        beneficiary: String,
        source_wallet: String,
        source_event_id: String,
        level: u8,
        amount: Decimal,
    },

    // ── Broker levels ──────────────────────────────
    BrokerLevelChanged {
        wallet: String,
        old_level: u8,
        new_level: u8,
    },

    // ── Dividends ──────────────────────────────────
    DividendPaid {
        wallet: String,
        dividend_type: String,
        period: String,
        level: u8,
        amount: Decimal,
    },

    // ── Reconciliation ─────────────────────────────
    DriftDetected {
        wallet: String,
        actual: Decimal,
        expected: Decimal,
    },
    DriftRepaired {
        wallet: String,
        action: String,
        amount: Decimal,
    },

    // ── Job bookkeeping ────────────────────────────
    ItemFailed {
        item: String,
        error: String,
    },
}

impl LedgerEvent {
    /// Stable name for the `event_type` column in `event_log`.
    pub fn type_name(&self) -> &'static str {
        match self {
            LedgerEvent::PositionMatured { .. }    => "position_matured",
            LedgerEvent::PositionForfeited { .. }  => "position_forfeited",
            LedgerEvent::ReferralRewardPaid { .. } => "referral_reward_paid",
            LedgerEvent::BrokerLevelChanged { .. } => "broker_level_changed",
            LedgerEvent::DividendPaid { .. }       => "dividend_paid",
            LedgerEvent::DriftDetected { .. }      => "drift_detected",
            LedgerEvent::DriftRepaired { .. }      => "drift_repaired",
            LedgerEvent::ItemFailed { .. }         => "item_failed",
        }
    }
}

/// One row of `event_log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: String,
    pub job: String,
    pub event_type: String,
    pub payload: String,
    pub created_at: i64,
}
