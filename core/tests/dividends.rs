//! Integration tests for team dividends.
//!
//! Tests verify:
//! 1. A daily pass run twice on one day pays once
//! 2. The next day is a new period
//! 3. The monthly dividend is keyed by the first of the month
//! 4. Nothing is paid before the configured hour
//! 5. Levels without a configured amount are skipped

use chrono::{DateTime, TimeZone, Utc};
use robot_ledger_core::{
    config::LedgerConfig,
    dividend_job::DividendJob,
    event::LedgerEvent,
    job::LedgerJob,
    store::{BrokerLevelRow, LedgerStore},
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

fn wallet(n: u32) -> String {
    format!("0x{n:040x}")
}

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn setup(name: &str) -> (LedgerConfig, LedgerStore) {
    let store = LedgerStore::shared_memory(name).expect("open shared store");
    store.migrate().expect("migrate");
    (LedgerConfig::default_test(), store)
}

fn set_level(store: &LedgerStore, n: u32, level: u8) {
    store
        .upsert_broker_level(&BrokerLevelRow {
            wallet: wallet(n),
            level,
            direct_referrals: 0,
            qualified_referrals: 0,
            team_volume: Decimal::ZERO,
            team_members: 0,
            subordinate_levels: BTreeMap::new(),
            updated_at: 0,
        })
        .unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests 1 and 2: one daily dividend per wallet per day
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn daily_pass_pays_once_per_day() {
    let (config, store) = setup("dividends-t1");
    set_level(&store, 1, 2);
    let job = DividendJob::new(config, store.reopen().unwrap());

    let first = job.run_daily_pass(at(2024, 1, 10, 9)).unwrap();
    let second = job.run_daily_pass(at(2024, 1, 10, 17)).unwrap();

    assert_eq!(first.summary.processed, 1);
    assert_eq!(second.summary.processed, 0);
    assert_eq!(second.summary.skipped, 1);
    assert_eq!(store.usdt_balance(&wallet(1)).unwrap(), dec!(15));

    let next_day = job.run_daily_pass(at(2024, 1, 11, 9)).unwrap();
    assert_eq!(next_day.summary.processed, 1);
    assert_eq!(store.usdt_balance(&wallet(1)).unwrap(), dec!(30));

    let periods: Vec<String> = store
        .dividends_for_wallet(&wallet(1))
        .unwrap()
        .into_iter()
        .map(|d| d.period)
        .collect();
    assert_eq!(periods, vec!["2024-01-10", "2024-01-11"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: monthly dividend
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn monthly_dividend_paid_on_configured_day() {
    let (config, store) = setup("dividends-t3");
    set_level(&store, 1, 2);
    let mut job = DividendJob::new(config, store.reopen().unwrap());

    let feb_first = job.run(at(2024, 2, 1, 3)).unwrap();
    assert_eq!(feb_first.summary.processed, 2, "daily and monthly");
    assert!(feb_first.events.iter().any(|e| matches!(
        e,
        LedgerEvent::DividendPaid { dividend_type, period, .. }
            if dividend_type == "monthly" && period == "2024-02-01"
    )));
    assert_eq!(store.usdt_balance(&wallet(1)).unwrap(), dec!(415));

    let feb_second = job.run(at(2024, 2, 2, 3)).unwrap();
    assert_eq!(feb_second.summary.processed, 1, "daily only");
    assert_eq!(store.usdt_balance(&wallet(1)).unwrap(), dec!(430));

    // A repeat on the same day pays nothing new.
    let repeat = job.run(at(2024, 2, 1, 23)).unwrap();
    assert_eq!(repeat.summary.processed, 0);
    assert_eq!(repeat.summary.skipped, 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: hour gate
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn nothing_paid_before_configured_hour() {
    let (mut config, store) = setup("dividends-t4");
    config.schedule.daily_dividend_hour = 6;
    set_level(&store, 1, 1);
    let mut job = DividendJob::new(config, store.reopen().unwrap());

    assert!(!job.daily_due(at(2024, 3, 1, 5)));
    assert!(!job.monthly_due(at(2024, 3, 1, 5)));
    let early = job.run(at(2024, 3, 1, 5)).unwrap();
    assert_eq!(early.summary.processed, 0);
    assert_eq!(store.usdt_balance(&wallet(1)).unwrap(), Decimal::ZERO);

    let later = job.run(at(2024, 3, 1, 6)).unwrap();
    assert_eq!(later.summary.processed, 2);
    assert_eq!(store.usdt_balance(&wallet(1)).unwrap(), dec!(105));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: unconfigured levels
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn level_without_amount_is_skipped() {
    let (config, store) = setup("dividends-t5");
    set_level(&store, 1, 1);
    set_level(&store, 2, 9);
    set_level(&store, 3, 0);
    let job = DividendJob::new(config, store.reopen().unwrap());

    let report = job.run_daily_pass(at(2024, 4, 2, 12)).unwrap();

    assert_eq!(report.summary.processed, 1);
    assert_eq!(report.summary.skipped, 1, "level 9 has no amount");
    assert_eq!(store.usdt_balance(&wallet(1)).unwrap(), dec!(5));
    assert_eq!(store.usdt_balance(&wallet(2)).unwrap(), Decimal::ZERO);
    assert!(store.dividends_for_wallet(&wallet(3)).unwrap().is_empty());
}
