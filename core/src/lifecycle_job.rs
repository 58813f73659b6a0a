//! Robot lifecycle job — matures positions whose end time has passed.
//!
//! Execution order: first job of every cycle (see engine.rs).
//!
//! Payout by maturity policy:
//!   high_yield        principal + profit if quantified, else nothing
//!   return_principal  principal only
//!   no_refund         nothing
//! A banned owner gets nothing, but the position still expires so it is
//! not re-selected on every run.
//!
//! High-yield payouts with profit > 0 hand the profit to the referral
//! reward distributor as the reward base. The position counts as processed
//! once its payout commits; each reward level that fails afterwards is
//! counted as a failed item of its own.

use crate::{
    clock::to_unix,
    config::{LedgerConfig, MaturityPolicy},
    error::LedgerResult,
    event::LedgerEvent,
    job::{JobReport, LedgerJob},
    referral_rewards::ReferralRewardDistributor,
    store::{LedgerStore, PositionRow},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::any::Any;

/// How one matured position is settled.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub payout: Decimal,
    pub profit: Decimal,
    /// Set when the position expires without its promised refund.
    pub forfeit_reason: Option<&'static str>,
}

/// Pure payout rule for one position.
pub fn settlement_for(position: &PositionRow, policy: MaturityPolicy, owner_banned: bool) -> Settlement {
    if owner_banned {
        return Settlement {
            payout: Decimal::ZERO,
            profit: Decimal::ZERO,
            forfeit_reason: Some("owner_banned"),
        };
    }
    match policy {
        MaturityPolicy::HighYield if position.is_quantified => Settlement {
            payout: position.price + position.expected_return,
            profit: position.expected_return,
            forfeit_reason: None,
        },
        MaturityPolicy::HighYield => Settlement {
            payout: Decimal::ZERO,
            profit: Decimal::ZERO,
            forfeit_reason: Some("not_quantified"),
        },
        MaturityPolicy::ReturnPrincipal => Settlement {
            payout: position.price,
            profit: Decimal::ZERO,
            forfeit_reason: None,
        },
        MaturityPolicy::NoRefund => Settlement {
            payout: Decimal::ZERO,
            profit: Decimal::ZERO,
            forfeit_reason: None,
        },
    }
}

/// A committed settlement plus the reward levels that could not be paid.
struct Settled {
    events: Vec<LedgerEvent>,
    reward_failures: Vec<(String, String)>,
}

pub struct LifecycleJob {
    config: LedgerConfig,
    store: LedgerStore,
}

impl LifecycleJob {
    pub fn new(config: LedgerConfig, store: LedgerStore) -> Self {
        Self { config, store }
    }

    /// Settle every active position with `end_at <= now`, oldest first.
    /// Re-running immediately processes nothing: settled rows are no longer
    /// `active`.
    pub fn process_expired(&self, now: i64) -> LedgerResult<JobReport> {
        self.store.ping()?;
        let matured = self.store.matured_active_positions(now)?;
        let mut report = JobReport::default();

        for position in &matured {
            match self.settle(position, now) {
                Ok(Some(settled)) => {
                    report.summary.processed += 1;
                    report.events.extend(settled.events);
                    for (item, error) in settled.reward_failures {
                        report.item_failed(item, &error);
                    }
                }
                Ok(None) => report.summary.skipped += 1,
                Err(e) => {
                    log::warn!("lifecycle: position {} failed: {e}", position.id);
                    report.item_failed(format!("position:{}", position.id), &e);
                }
            }
        }

        log::info!(
            "lifecycle: {} matured, {} processed, {} skipped, {} failed",
            matured.len(),
            report.summary.processed,
            report.summary.skipped,
            report.summary.failed
        );
        Ok(report)
    }

    /// `Ok(None)` means the item was skipped and stays selectable.
    fn settle(&self, position: &PositionRow, now: i64) -> LedgerResult<Option<Settled>> {
        let product = match self.config.product(&position.product_id) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("lifecycle: position {} skipped: {e}", position.id);
                return Ok(None);
            }
        };
        let banned = self.store.is_banned(&position.wallet)?;
        let settlement = settlement_for(position, product.policy, banned);

        if !self.store.settle_position(position.id, settlement.payout, now)? {
            log::debug!("lifecycle: position {} already settled", position.id);
            return Ok(None);
        }

        let mut events = vec![match settlement.forfeit_reason {
            Some(reason) => LedgerEvent::PositionForfeited {
                position_id: position.id,
                wallet: position.wallet.clone(),
                reason: reason.to_string(),
            },
            None => LedgerEvent::PositionMatured {
                position_id: position.id,
                wallet: position.wallet.clone(),
                product_id: position.product_id.clone(),
                payout: settlement.payout,
                profit: settlement.profit,
            },
        }];
        log::debug!(
            "lifecycle: position {} expired, payout {}",
            position.id,
            settlement.payout
        );

        let mut reward_failures = Vec::new();
        if product.policy == MaturityPolicy::HighYield && settlement.profit > Decimal::ZERO {
            let distributor = ReferralRewardDistributor::new(&self.config.referral, &self.store);
            let source_event_id = format!("position:{}", position.id);
            // The payout is already committed; unpaid levels are reported and
            // left for an operator-triggered redistribution.
            match distributor.distribute(&position.wallet, &source_event_id, settlement.profit, now) {
                Ok(distribution) => {
                    events.extend(distribution.events());
                    reward_failures.extend(distribution.failures.into_iter().map(|f| {
                        (format!("{source_event_id}:level:{}", f.level), f.error)
                    }));
                }
                Err(e) => {
                    log::warn!("lifecycle: rewards for {source_event_id} failed: {e}");
                    reward_failures.push((format!("{source_event_id}:rewards"), e.to_string()));
                }
            }
        }
        Ok(Some(Settled { events, reward_failures }))
    }
}

impl LedgerJob for LifecycleJob {
    fn name(&self) -> &'static str {
        "lifecycle"
    }

    fn run(&mut self, now: DateTime<Utc>) -> LedgerResult<JobReport> {
        self.process_expired(to_unix(now))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
