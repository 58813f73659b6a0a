//! Reconciliation auditor — recomputes each wallet's expected balance from
//! every ledger source and reports or repairs drift.
//!
//! Execution order: last job of a cycle, and only when
//! `audit_every_cycle` is set; the engine run is always report-only.
//! Repairs happen only through an explicit `audit_all(AuditMode::Repair)`.
//!
//! expected = deposits(completed) - withdrawals(completed)
//!          - Σ price(all positions) + Σ payout(expired positions)
//!          + referral rewards + team dividends + manual_adjustment
//!          [+ promo credits] [+ token exchange USDT deltas]
//!
//! Repair:
//!   expected < 0   book actual - expected into manual_adjustment with a
//!                  `reconciliation_shortfall` adjustment row; the balance
//!                  itself is not lowered
//!   expected >= 0  overwrite usdt_balance with expected

use crate::{
    clock::to_unix,
    config::ReconciliationConfig,
    error::LedgerResult,
    event::LedgerEvent,
    job::{JobReport, LedgerJob},
    store::{DriftReportRow, LedgerStore, SourceBreakdown},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::any::Any;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditMode {
    /// Never writes.
    ReportOnly,
    /// Corrects drift and persists a drift_report row per wallet.
    Repair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    Reported,
    BalanceOverwritten,
    AdjustmentRecorded,
    /// The balance moved between read and repair; left for the next audit.
    Stale,
}

impl RepairAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RepairAction::Reported           => "reported",
            RepairAction::BalanceOverwritten => "balance_overwritten",
            RepairAction::AdjustmentRecorded => "adjustment_recorded",
            RepairAction::Stale              => "stale",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub wallet: String,
    pub actual: Decimal,
    pub expected: Decimal,
    /// actual - expected
    pub difference: Decimal,
    pub breakdown: SourceBreakdown,
    pub action: RepairAction,
}

#[derive(Debug, Clone, Default)]
pub struct AuditOutcome {
    pub reports: Vec<DriftReport>,
    pub report: JobReport,
}

pub struct ReconciliationAuditor {
    config: ReconciliationConfig,
    store: LedgerStore,
}

impl ReconciliationAuditor {
    pub fn new(config: ReconciliationConfig, store: LedgerStore) -> Self {
        Self { config, store }
    }

    /// Drift for one wallet, or `None` when it balances within epsilon.
    pub fn audit_wallet(&self, wallet: &str, mode: AuditMode, now: i64) -> LedgerResult<Option<DriftReport>> {
        let actual = self.store.usdt_balance(wallet)?;
        let breakdown = self.store.source_breakdown(wallet, &self.config)?;
        let expected = breakdown.expected_balance();
        let difference = actual - expected;
        if difference.abs() <= self.config.epsilon {
            return Ok(None);
        }

        let action = match mode {
            AuditMode::ReportOnly => RepairAction::Reported,
            AuditMode::Repair => self.repair(wallet, actual, expected, difference, now)?,
        };
        let report = DriftReport {
            wallet: wallet.to_string(),
            actual,
            expected,
            difference,
            breakdown,
            action,
        };
        if mode == AuditMode::Repair {
            self.store.insert_drift_report(&DriftReportRow {
                wallet: report.wallet.clone(),
                actual,
                expected,
                difference,
                breakdown: report.breakdown.clone(),
                action: action.as_str().to_string(),
                created_at: now,
            })?;
        }
        Ok(Some(report))
    }

    fn repair(
        &self,
        wallet: &str,
        actual: Decimal,
        expected: Decimal,
        difference: Decimal,
        now: i64,
    ) -> LedgerResult<RepairAction> {
        let applied = if expected < Decimal::ZERO {
            self.store
                .record_shortfall_adjustment(wallet, actual, difference, now)?
        } else {
            self.store
                .overwrite_usdt_balance(wallet, actual, expected, now)?
        };
        let action = match (applied, expected < Decimal::ZERO) {
            (false, _) => RepairAction::Stale,
            (true, true) => RepairAction::AdjustmentRecorded,
            (true, false) => RepairAction::BalanceOverwritten,
        };
        match action {
            RepairAction::Stale => {
                log::warn!("reconciliation: {wallet} changed during repair, left for next audit")
            }
            _ => log::info!(
                "reconciliation: {wallet} repaired ({}), actual {actual} expected {expected}",
                action.as_str()
            ),
        }
        Ok(action)
    }

    /// Audit every wallet with a balance row. One wallet's failure is
    /// logged and counted; the rest are still audited.
    pub fn audit_all(&self, mode: AuditMode, now: i64) -> LedgerResult<AuditOutcome> {
        self.store.ping()?;
        let balances = self.store.all_balances()?;
        let mut outcome = AuditOutcome::default();

        for balance in &balances {
            match self.audit_wallet(&balance.wallet, mode, now) {
                Ok(None) => outcome.report.summary.processed += 1,
                Ok(Some(drift)) => {
                    outcome.report.summary.processed += 1;
                    log::warn!(
                        "reconciliation: drift on {}: actual {} expected {} ({})",
                        drift.wallet,
                        drift.actual,
                        drift.expected,
                        drift.action.as_str()
                    );
                    outcome.report.events.push(LedgerEvent::DriftDetected {
                        wallet: drift.wallet.clone(),
                        actual: drift.actual,
                        expected: drift.expected,
                    });
                    if matches!(
                        drift.action,
                        RepairAction::BalanceOverwritten | RepairAction::AdjustmentRecorded
                    ) {
                        outcome.report.events.push(LedgerEvent::DriftRepaired {
                            wallet: drift.wallet.clone(),
                            action: drift.action.as_str().to_string(),
                            amount: drift.difference,
                        });
                    }
                    outcome.reports.push(drift);
                }
                Err(e) => {
                    log::warn!("reconciliation: auditing {} failed: {e}", balance.wallet);
                    outcome
                        .report
                        .item_failed(format!("wallet:{}", balance.wallet), &e);
                }
            }
        }

        log::info!(
            "reconciliation: {} wallets audited, {} drifted",
            balances.len(),
            outcome.reports.len()
        );
        Ok(outcome)
    }
}

impl LedgerJob for ReconciliationAuditor {
    fn name(&self) -> &'static str {
        "reconciliation"
    }

    fn run(&mut self, now: DateTime<Utc>) -> LedgerResult<JobReport> {
        Ok(self.audit_all(AuditMode::ReportOnly, to_unix(now))?.report)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
