//! Broker level job — recomputes every referrer's broker level.
//!
//! Execution order: after lifecycle, before dividends (see engine.rs).
//!
//! Design:
//!   - Team volume and member count come from a bounded, cycle-guarded
//!     downline walk over the in-memory referral forest.
//!   - Levels are cumulative: a wallet holds level L only if it meets the
//!     requirements of every level 1..=L.
//!   - The subordinate requirement of level L counts direct referrals whose
//!     level is at least max(L - 1, 1), so levels are solved to a fixpoint:
//!     start every wallet at 0 and re-evaluate until nothing changes.
//!   - Records are fully replaced every pass; transitions are logged to
//!     broker_level_change.

use crate::{
    clock::to_unix,
    config::{BrokerConfig, LedgerConfig},
    error::LedgerResult,
    event::LedgerEvent,
    job::{JobReport, LedgerJob},
    referral_graph::{ReferralForest, TeamStats},
    store::{BrokerLevelRow, LedgerStore},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
};

/// Inputs that decide one wallet's level.
#[derive(Debug, Clone, Default)]
pub struct Qualification {
    /// Committed investment of each direct referral.
    pub direct_investments: Vec<Decimal>,
    /// Current level of each direct referral.
    pub direct_levels: Vec<u8>,
    pub team: TeamStats,
}

/// Highest level whose requirements, and those of every level below it,
/// are met.
pub fn qualify(config: &BrokerConfig, q: &Qualification) -> u8 {
    let mut level = 0;
    for tier in &config.levels {
        let qualified = q
            .direct_investments
            .iter()
            .filter(|inv| **inv >= tier.min_referral_investment)
            .count() as u32;
        let floor = tier.level.saturating_sub(1).max(1);
        let subordinates = q.direct_levels.iter().filter(|l| **l >= floor).count() as u32;

        let meets = qualified >= tier.min_direct_referrals
            && subordinates >= tier.min_subordinate_brokers
            && q.team.volume >= tier.min_team_volume
            && q.team.members >= tier.min_team_members;
        if !meets {
            break;
        }
        level = tier.level;
    }
    level
}

pub struct BrokerLevelJob {
    config: LedgerConfig,
    store: LedgerStore,
}

impl BrokerLevelJob {
    pub fn new(config: LedgerConfig, store: LedgerStore) -> Self {
        Self { config, store }
    }

    pub fn recalculate(&self, now: i64) -> LedgerResult<JobReport> {
        self.store.ping()?;
        let broker = &self.config.broker;
        let forest = ReferralForest::load(&self.store)?;
        let investments = self.store.committed_investment_by_wallet()?;
        let previous = self.store.broker_level_map()?;

        let wallets: Vec<String> = forest.referrers().into_iter().map(str::to_string).collect();
        let stats: HashMap<&str, TeamStats> = wallets
            .iter()
            .map(|w| (w.as_str(), forest.team_stats(w, broker.team_depth, &investments)))
            .collect();

        let levels = solve_levels(broker, &forest, &wallets, &stats, &investments);

        let mut report = JobReport::default();
        for wallet in &wallets {
            let level = levels.get(wallet.as_str()).copied().unwrap_or(0);
            let record = self.record_for(wallet, level, &forest, &stats, &investments, &levels, now);
            let old = previous.get(wallet).copied().unwrap_or(0);

            let written = self.store.upsert_broker_level(&record).and_then(|()| {
                if old != level {
                    self.store.insert_level_change(wallet, old, level, now)?;
                }
                Ok(())
            });
            match written {
                Ok(()) => {
                    report.summary.processed += 1;
                    if old != level {
                        log::info!("brokers: {wallet} level {old} -> {level}");
                        report.events.push(LedgerEvent::BrokerLevelChanged {
                            wallet: wallet.clone(),
                            old_level: old,
                            new_level: level,
                        });
                    }
                }
                Err(e) => {
                    log::warn!("brokers: writing level for {wallet} failed: {e}");
                    report.item_failed(format!("broker:{wallet}"), &e);
                }
            }
        }

        log::info!(
            "brokers: {} wallets recalculated, {} level changes",
            report.summary.processed,
            report.events.len()
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn record_for(
        &self,
        wallet: &str,
        level: u8,
        forest: &ReferralForest,
        stats: &HashMap<&str, TeamStats>,
        investments: &HashMap<String, Decimal>,
        levels: &HashMap<String, u8>,
        now: i64,
    ) -> BrokerLevelRow {
        let direct = forest.direct_referrals(wallet);
        let threshold = self
            .config
            .broker
            .level(level.max(1))
            .map(|t| t.min_referral_investment)
            .unwrap_or_default();
        let qualified = direct
            .iter()
            .filter(|d| investments.get(**d).copied().unwrap_or_default() >= threshold)
            .count() as u32;

        let mut histogram: BTreeMap<u8, u32> = BTreeMap::new();
        for d in &direct {
            match levels.get(*d).copied().unwrap_or(0) {
                0 => {}
                l => *histogram.entry(l).or_default() += 1,
            }
        }

        let team = stats.get(wallet).cloned().unwrap_or_default();
        BrokerLevelRow {
            wallet: wallet.to_string(),
            level,
            direct_referrals: direct.len() as u32,
            qualified_referrals: qualified,
            team_volume: team.volume,
            team_members: team.members,
            subordinate_levels: histogram,
            updated_at: now,
        }
    }
}

/// Iterate `qualify` over all wallets until no level changes.
/// Levels only rise from 0, so `max_level + 1` rounds always suffice.
fn solve_levels(
    broker: &BrokerConfig,
    forest: &ReferralForest,
    wallets: &[String],
    stats: &HashMap<&str, TeamStats>,
    investments: &HashMap<String, Decimal>,
) -> HashMap<String, u8> {
    let mut levels: HashMap<String, u8> = HashMap::new();
    let rounds = usize::from(broker.max_level()) + 1;

    for round in 0..rounds {
        let mut changed = false;
        for wallet in wallets {
            let direct = forest.direct_referrals(wallet);
            let q = Qualification {
                direct_investments: direct
                    .iter()
                    .map(|d| investments.get(*d).copied().unwrap_or_default())
                    .collect(),
                direct_levels: direct
                    .iter()
                    .map(|d| levels.get(*d).copied().unwrap_or(0))
                    .collect(),
                team: stats.get(wallet.as_str()).cloned().unwrap_or_default(),
            };
            let level = qualify(broker, &q);
            if levels.get(wallet).copied().unwrap_or(0) != level {
                levels.insert(wallet.clone(), level);
                changed = true;
            }
        }
        if !changed {
            log::debug!("brokers: levels settled after {} rounds", round + 1);
            return levels;
        }
    }
    log::warn!("brokers: levels still changing after {rounds} rounds");
    levels
}

impl LedgerJob for BrokerLevelJob {
    fn name(&self) -> &'static str {
        "broker_levels"
    }

    fn run(&mut self, now: DateTime<Utc>) -> LedgerResult<JobReport> {
        self.recalculate(to_unix(now))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
