//! Dividend job — pays the level-indexed daily and monthly team dividends.
//!
//! Execution order: after broker levels (see engine.rs), so a pass pays the
//! levels computed in the same cycle.
//!
//! Gates (UTC):
//!   daily    hour >= daily_dividend_hour
//!   monthly  day == monthly_dividend_day and the same hour gate
//! The job may run many times a day. The (wallet, period, type) unique key
//! on team_dividend is the only guard against paying a period twice.

use crate::{
    clock::{day_key, month_key, to_unix},
    config::LedgerConfig,
    error::LedgerResult,
    event::LedgerEvent,
    job::{JobReport, LedgerJob},
    store::{DividendType, LedgerStore, TeamDividendRow},
};
use chrono::{DateTime, Datelike, Timelike, Utc};
use rust_decimal::Decimal;
use std::any::Any;

pub struct DividendJob {
    config: LedgerConfig,
    store: LedgerStore,
}

impl DividendJob {
    pub fn new(config: LedgerConfig, store: LedgerStore) -> Self {
        Self { config, store }
    }

    pub fn daily_due(&self, now: DateTime<Utc>) -> bool {
        now.hour() >= self.config.schedule.daily_dividend_hour
    }

    pub fn monthly_due(&self, now: DateTime<Utc>) -> bool {
        now.day() == self.config.schedule.monthly_dividend_day && self.daily_due(now)
    }

    /// Pay today's daily dividend to every wallet at level >= 1.
    pub fn run_daily_pass(&self, now: DateTime<Utc>) -> LedgerResult<JobReport> {
        self.pay(DividendType::Daily, &day_key(now), now)
    }

    /// Pay this month's dividend, keyed by the first day of the month.
    pub fn run_monthly_pass(&self, now: DateTime<Utc>) -> LedgerResult<JobReport> {
        self.pay(DividendType::Monthly, &month_key(now), now)
    }

    fn pay(&self, kind: DividendType, period: &str, now: DateTime<Utc>) -> LedgerResult<JobReport> {
        self.store.ping()?;
        let brokers = self.store.brokers_at_or_above(1)?;
        let mut report = JobReport::default();

        for broker in &brokers {
            let amount = self
                .config
                .broker
                .level(broker.level)
                .map(|tier| match kind {
                    DividendType::Daily => tier.daily_dividend,
                    DividendType::Monthly => tier.monthly_dividend,
                })
                .unwrap_or_default();
            if amount <= Decimal::ZERO {
                log::warn!(
                    "dividends: no {} amount configured for level {}, {} skipped",
                    kind.as_str(),
                    broker.level,
                    broker.wallet
                );
                report.summary.skipped += 1;
                continue;
            }

            let dividend = TeamDividendRow {
                wallet: broker.wallet.clone(),
                dividend_type: kind.as_str().to_string(),
                period: period.to_string(),
                level: broker.level,
                amount,
                created_at: to_unix(now),
            };
            match self.store.record_team_dividend(&dividend) {
                Ok(true) => {
                    report.summary.processed += 1;
                    report.events.push(LedgerEvent::DividendPaid {
                        wallet: dividend.wallet,
                        dividend_type: dividend.dividend_type,
                        period: dividend.period,
                        level: dividend.level,
                        amount,
                    });
                }
                Ok(false) => {
                    log::debug!(
                        "dividends: {} {period} already paid to {}",
                        kind.as_str(),
                        broker.wallet
                    );
                    report.summary.skipped += 1;
                }
                Err(e) => {
                    log::warn!("dividends: paying {} failed: {e}", broker.wallet);
                    report.item_failed(format!("{}:{period}:{}", kind.as_str(), broker.wallet), &e);
                }
            }
        }

        log::info!(
            "dividends: {} {period}: {} paid, {} skipped, {} failed",
            kind.as_str(),
            report.summary.processed,
            report.summary.skipped,
            report.summary.failed
        );
        Ok(report)
    }
}

impl LedgerJob for DividendJob {
    fn name(&self) -> &'static str {
        "dividends"
    }

    fn run(&mut self, now: DateTime<Utc>) -> LedgerResult<JobReport> {
        let mut report = JobReport::default();
        if self.daily_due(now) {
            report.merge(self.run_daily_pass(now)?);
        }
        if self.monthly_due(now) {
            report.merge(self.run_monthly_pass(now)?);
        }
        Ok(report)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
