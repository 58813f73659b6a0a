//! Integration tests for the reconciliation auditor.
//!
//! Tests verify:
//! 1. A ledger built only through recorded sources shows no drift
//! 2. Report-only audits are idempotent and never write
//! 3. Repair with a non-negative expected balance overwrites the balance
//! 4. Repair with a negative expected balance books the gap into manual_adjustment
//! 5. Differences within epsilon are not drift
//! 6. Optional sources follow the configuration toggles
//! 7. A repair run emits detected and repaired events

use robot_ledger_core::{
    clock::from_unix,
    config::LedgerConfig,
    dividend_job::DividendJob,
    event::LedgerEvent,
    funding::FundingDesk,
    lifecycle_job::LifecycleJob,
    positions::PositionDesk,
    reconciliation_job::{AuditMode, ReconciliationAuditor, RepairAction},
    store::{BalanceChange, BrokerLevelRow, LedgerStore},
};
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

const T0: i64 = 1_704_110_400;
const DAY: i64 = 86_400;

fn wallet(n: u32) -> String {
    format!("0x{n:040x}")
}

fn setup(name: &str) -> (LedgerConfig, LedgerStore) {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = LedgerStore::shared_memory(name).expect("open shared store");
    store.migrate().expect("migrate");
    (LedgerConfig::default_test(), store)
}

fn auditor(config: &LedgerConfig, store: &LedgerStore) -> ReconciliationAuditor {
    ReconciliationAuditor::new(config.reconciliation.clone(), store.reopen().expect("reopen"))
}

/// Credit `amount` without any ledger record behind it.
fn unrecorded_credit(store: &LedgerStore, n: u32, amount: rust_decimal::Decimal) {
    store
        .apply_balance_change(&wallet(n), &BalanceChange::usdt(amount), "untracked", None, T0)
        .unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: every recorded source is explained
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn recorded_sources_balance_exactly() {
    let (config, store) = setup("recon-t1");
    let funding = FundingDesk::new(&store);
    let positions = PositionDesk::new(&config, &store);

    funding.bind_referrer(&wallet(1), &wallet(2), T0).unwrap();
    funding.apply_deposit(&wallet(1), dec!(1000), "0xdep-1", "completed", T0).unwrap();
    funding.apply_deposit(&wallet(1), dec!(300), "0xdep-2", "pending", T0).unwrap();
    let id = positions.purchase(&wallet(1), "quantum_high", dec!(100), T0).unwrap();
    positions.quantify(id).unwrap();
    positions.purchase(&wallet(1), "steady_30", dec!(250), T0).unwrap();
    LifecycleJob::new(config.clone(), store.reopen().unwrap())
        .process_expired(T0 + DAY)
        .unwrap();
    funding.apply_withdrawal(&wallet(1), dec!(40.25), "0xwd-1", "completed", T0 + DAY).unwrap();
    funding
        .apply_manual_adjustment(&wallet(2), dec!(25), "support credit", "ops", T0 + DAY)
        .unwrap();
    funding.apply_promo_credit(&wallet(1), dec!(10), "launch", T0 + DAY).unwrap();

    store
        .upsert_broker_level(&BrokerLevelRow {
            wallet: wallet(2),
            level: 1,
            direct_referrals: 1,
            qualified_referrals: 1,
            team_volume: dec!(350),
            team_members: 1,
            subordinate_levels: BTreeMap::new(),
            updated_at: T0,
        })
        .unwrap();
    DividendJob::new(config.clone(), store.reopen().unwrap())
        .run_daily_pass(from_unix(T0 + DAY))
        .unwrap();

    let outcome = auditor(&config, &store).audit_all(AuditMode::ReportOnly, T0 + DAY).unwrap();
    assert!(outcome.reports.is_empty(), "unexpected drift: {:?}", outcome.reports);
    assert_eq!(outcome.report.summary.processed, 2);

    // 1000 - 100 - 250 + 110 - 40.25 + 10
    assert_eq!(store.usdt_balance(&wallet(1)).unwrap(), dec!(729.75));
    // 1.5 reward + 25 adjustment + 5 dividend
    assert_eq!(store.usdt_balance(&wallet(2)).unwrap(), dec!(31.5));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: report-only is idempotent
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn report_only_is_idempotent_and_writes_nothing() {
    let (config, store) = setup("recon-t2");
    FundingDesk::new(&store)
        .apply_deposit(&wallet(1), dec!(100), "0xdep-1", "completed", T0)
        .unwrap();
    unrecorded_credit(&store, 1, dec!(50));

    let auditor = auditor(&config, &store);
    let first = auditor.audit_all(AuditMode::ReportOnly, T0).unwrap();
    let second = auditor.audit_all(AuditMode::ReportOnly, T0 + 60).unwrap();

    assert_eq!(first.reports, second.reports);
    assert_eq!(first.reports.len(), 1);
    let drift = &first.reports[0];
    assert_eq!(drift.actual, dec!(150));
    assert_eq!(drift.expected, dec!(100));
    assert_eq!(drift.difference, dec!(50));
    assert_eq!(drift.action, RepairAction::Reported);

    assert_eq!(store.usdt_balance(&wallet(1)).unwrap(), dec!(150));
    assert_eq!(store.drift_report_count().unwrap(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: repair overwrites when expected >= 0
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn repair_overwrites_balance_with_expected() {
    let (config, store) = setup("recon-t3");
    FundingDesk::new(&store)
        .apply_deposit(&wallet(1), dec!(100), "0xdep-1", "completed", T0)
        .unwrap();
    unrecorded_credit(&store, 1, dec!(50));

    let auditor = auditor(&config, &store);
    let drift = auditor
        .audit_wallet(&wallet(1), AuditMode::Repair, T0)
        .unwrap()
        .expect("drift detected");

    assert_eq!(drift.action, RepairAction::BalanceOverwritten);
    assert_eq!(store.usdt_balance(&wallet(1)).unwrap(), dec!(100));

    let rows = store.drift_reports(&wallet(1)).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].difference, dec!(50));
    assert_eq!(rows[0].action, "balance_overwritten");
    assert_eq!(rows[0].breakdown.deposits, dec!(100));

    assert!(auditor.audit_wallet(&wallet(1), AuditMode::ReportOnly, T0).unwrap().is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: repair with a negative expected balance never lowers the balance
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn repair_with_negative_expected_records_adjustment() {
    let (config, store) = setup("recon-t4");
    unrecorded_credit(&store, 1, dec!(200));
    PositionDesk::new(&config, &store)
        .purchase(&wallet(1), "steady_30", dec!(150), T0)
        .unwrap();

    let auditor = auditor(&config, &store);
    let drift = auditor
        .audit_wallet(&wallet(1), AuditMode::Repair, T0)
        .unwrap()
        .expect("drift detected");

    assert_eq!(drift.actual, dec!(50));
    assert_eq!(drift.expected, dec!(-150));
    assert_eq!(drift.action, RepairAction::AdjustmentRecorded);

    let balance = store.balance(&wallet(1)).unwrap().unwrap();
    assert_eq!(balance.usdt_balance, dec!(50), "balance is not lowered");
    assert_eq!(balance.manual_adjustment, dec!(200));
    assert_eq!(store.drift_report_count().unwrap(), 1);

    assert!(auditor.audit_wallet(&wallet(1), AuditMode::ReportOnly, T0).unwrap().is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: epsilon tolerance
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn difference_within_epsilon_is_not_drift() {
    let (config, store) = setup("recon-t5");
    FundingDesk::new(&store)
        .apply_deposit(&wallet(1), dec!(100), "0xdep-1", "completed", T0)
        .unwrap();
    unrecorded_credit(&store, 1, dec!(0.005));

    let auditor = auditor(&config, &store);
    assert!(auditor.audit_wallet(&wallet(1), AuditMode::Repair, T0).unwrap().is_none());
    assert_eq!(store.usdt_balance(&wallet(1)).unwrap(), dec!(100.005));
    assert_eq!(store.drift_report_count().unwrap(), 0);

    unrecorded_credit(&store, 1, dec!(0.01));
    assert!(auditor.audit_wallet(&wallet(1), AuditMode::ReportOnly, T0).unwrap().is_some());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 6: optional sources
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn optional_sources_follow_toggles() {
    let (mut config, store) = setup("recon-t6");
    let funding = FundingDesk::new(&store);
    funding.apply_deposit(&wallet(1), dec!(100), "0xdep-1", "completed", T0).unwrap();
    funding.apply_promo_credit(&wallet(1), dec!(20), "spring", T0).unwrap();
    funding.apply_token_exchange(&wallet(1), dec!(-30), dec!(300), T0).unwrap();

    // Promo included, exchanges excluded: the exchange debit is unexplained.
    let drift = auditor(&config, &store)
        .audit_wallet(&wallet(1), AuditMode::ReportOnly, T0)
        .unwrap()
        .expect("exchange excluded");
    assert_eq!(drift.difference, dec!(-30));
    assert_eq!(drift.breakdown.promo_credits, Some(dec!(20)));
    assert_eq!(drift.breakdown.token_exchanges, None);

    config.reconciliation.include_token_exchanges = true;
    assert!(auditor(&config, &store)
        .audit_wallet(&wallet(1), AuditMode::ReportOnly, T0)
        .unwrap()
        .is_none());

    config.reconciliation.include_promo_credits = false;
    let drift = auditor(&config, &store)
        .audit_wallet(&wallet(1), AuditMode::ReportOnly, T0)
        .unwrap()
        .expect("promo excluded");
    assert_eq!(drift.difference, dec!(20));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 7: events
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn repair_run_emits_detected_and_repaired_events() {
    let (config, store) = setup("recon-t7");
    let funding = FundingDesk::new(&store);
    funding.apply_deposit(&wallet(1), dec!(100), "0xdep-1", "completed", T0).unwrap();
    funding.apply_deposit(&wallet(2), dec!(100), "0xdep-2", "completed", T0).unwrap();
    unrecorded_credit(&store, 2, dec!(7));

    let outcome = auditor(&config, &store).audit_all(AuditMode::Repair, T0).unwrap();

    assert_eq!(outcome.report.summary.processed, 2);
    assert_eq!(outcome.reports.len(), 1);
    assert!(matches!(
        outcome.report.events.as_slice(),
        [
            LedgerEvent::DriftDetected { .. },
            LedgerEvent::DriftRepaired { action, .. },
        ] if action == "balance_overwritten"
    ));
    assert_eq!(store.usdt_balance(&wallet(2)).unwrap(), dec!(100));
    assert_eq!(store.usdt_balance(&wallet(1)).unwrap(), dec!(100));
}
