//! Referral reward distributor — pays up to eight upline levels on a
//! profitable maturity.
//!
//! RULES:
//!   - The reward record's unique key (beneficiary, source event, level) is
//!     the only double-payment guard. A conflict means "already paid": the
//!     level is skipped and the walk continues upline.
//!   - Each level is rounded once with the canonical rule; the total is
//!     clamped to base × cap so rounding can never push it over.
//!   - A failure at one level is logged and the walk moves on. An invalid
//!     referrer address or a cycle ends the chain.

use crate::{
    config::{ReferralRewardConfig, REFERRAL_LEVELS},
    error::{LedgerError, LedgerResult},
    event::LedgerEvent,
    money::{scaled, MONEY_SCALE},
    store::{LedgerStore, ReferralRewardRow},
    types::{normalize, WalletAddress},
};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashSet;

/// Outcome of one distribution.
#[derive(Debug, Clone, Default)]
pub struct Distribution {
    /// Rewards credited by this call.
    pub paid: Vec<ReferralRewardRow>,
    /// Levels already paid by an earlier call.
    pub already_paid: usize,
    /// Levels whose lookup or write failed.
    pub failures: Vec<LevelFailure>,
    /// Levels walked before the chain ended.
    pub levels_walked: usize,
}

impl Distribution {
    pub fn total_paid(&self) -> Decimal {
        self.paid.iter().map(|r| r.amount).sum()
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.paid
            .iter()
            .map(|r| LedgerEvent::ReferralRewardPaid {
                beneficiary: r.beneficiary.clone(),
                source_wallet: r.source_wallet.clone(),
                source_event_id: r.source_event_id.clone(),
                level: r.level,
                amount: r.amount,
            })
            .collect()
    }
}

/// One upline level that could not be paid.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelFailure {
    pub level: usize,
    pub error: String,
}

pub struct ReferralRewardDistributor<'a> {
    config: &'a ReferralRewardConfig,
    store: &'a LedgerStore,
}

impl<'a> ReferralRewardDistributor<'a> {
    pub fn new(config: &'a ReferralRewardConfig, store: &'a LedgerStore) -> Self {
        Self { config, store }
    }

    /// Walk the upline of `source_wallet` and credit each level its share of
    /// `base`. Safe to call again for the same `source_event_id`.
    pub fn distribute(
        &self,
        source_wallet: &str,
        source_event_id: &str,
        base: Decimal,
        now: i64,
    ) -> LedgerResult<Distribution> {
        if base.is_sign_negative() {
            return Err(LedgerError::InvalidAmount {
                amount: base,
                reason: "reward base must not be negative".into(),
            });
        }
        let mut out = Distribution::default();
        if base.is_zero() {
            return Ok(out);
        }

        // Truncated so a clamped level still lands on the money scale.
        let ceiling = (base * self.config.total_cap)
            .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::ToZero);
        let mut allotted = Decimal::ZERO;
        let origin = normalize(source_wallet);
        let mut current = origin.clone();
        let mut seen: HashSet<String> = HashSet::from([origin.clone()]);

        for level in 1..=REFERRAL_LEVELS {
            let raw = match self.store.referrer_of(&current) {
                Ok(Some(r)) => r,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("referral: upline lookup for {current} failed at level {level}: {e}");
                    out.failures.push(LevelFailure { level, error: e.to_string() });
                    break;
                }
            };
            let referrer = match WalletAddress::parse(&raw) {
                Ok(w) => w.into_inner(),
                Err(_) => {
                    log::warn!(
                        "referral: invalid referrer address '{raw}' at level {level} of {source_event_id}, chain halted"
                    );
                    break;
                }
            };
            if !seen.insert(referrer.clone()) {
                log::warn!(
                    "referral: cycle at {referrer} (level {level}) walking upline of {origin}, chain halted"
                );
                break;
            }
            out.levels_walked = level;

            let rate = self.config.rate_for(level).unwrap_or_default();
            let amount = scaled(base, rate).min(ceiling - allotted);
            allotted += amount;

            if amount > Decimal::ZERO {
                let reward = ReferralRewardRow {
                    beneficiary: referrer.clone(),
                    source_wallet: origin.clone(),
                    source_event_id: source_event_id.to_string(),
                    level: level as u8,
                    base_amount: base,
                    rate,
                    amount,
                    created_at: now,
                };
                match self.store.record_referral_reward(&reward) {
                    Ok(true) => out.paid.push(reward),
                    Ok(false) => {
                        log::debug!(
                            "referral: {source_event_id} level {level} already paid to {referrer}, skipped"
                        );
                        out.already_paid += 1;
                    }
                    Err(e) => {
                        log::warn!(
                            "referral: crediting {referrer} for {source_event_id} level {level} failed: {e}"
                        );
                        out.failures.push(LevelFailure { level, error: e.to_string() });
                    }
                }
            }
            current = referrer;
        }
        Ok(out)
    }
}
