//! Integration tests for the broker level job.
//!
//! Tests verify:
//! 1. Three direct referrals with 100 each give level 1 after one pass
//! 2. Recomputing without changes logs no transition
//! 3. Referrals under the per-referral investment threshold do not count
//! 4. Subordinate brokers promote their referrer within a single pass
//! 5. Team aggregates stop at the depth bound
//! 6. Cancelling a position can demote a wallet

use robot_ledger_core::{
    broker_level_job::{qualify, BrokerLevelJob, Qualification},
    config::LedgerConfig,
    event::LedgerEvent,
    funding::FundingDesk,
    positions::PositionDesk,
    referral_graph::TeamStats,
    store::LedgerStore,
    types::PositionId,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const T0: i64 = 1_704_110_400;

fn wallet(n: u32) -> String {
    format!("0x{n:040x}")
}

fn setup(name: &str) -> (LedgerConfig, LedgerStore) {
    let store = LedgerStore::shared_memory(name).expect("open shared store");
    store.migrate().expect("migrate");
    (LedgerConfig::default_test(), store)
}

fn job(config: &LedgerConfig, store: &LedgerStore) -> BrokerLevelJob {
    BrokerLevelJob::new(config.clone(), store.reopen().expect("reopen"))
}

/// Bind `member` under `referrer`, fund it and buy one position of `price`.
fn join_and_buy(
    config: &LedgerConfig,
    store: &LedgerStore,
    member: u32,
    referrer: u32,
    product: &str,
    price: Decimal,
) -> PositionId {
    let funding = FundingDesk::new(store);
    funding.bind_referrer(&wallet(member), &wallet(referrer), T0).unwrap();
    funding
        .apply_deposit(&wallet(member), price, &format!("0xdep-{member}"), "completed", T0)
        .unwrap();
    PositionDesk::new(config, store)
        .purchase(&wallet(member), product, price, T0)
        .unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: the three-referral scenario
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn three_referrals_of_one_hundred_reach_level_one() {
    let (config, store) = setup("brokers-t1");
    for n in 1..=3 {
        join_and_buy(&config, &store, n, 0, "steady_30", dec!(100));
    }

    let report = job(&config, &store).recalculate(T0).unwrap();

    let record = store.broker_level(&wallet(0)).unwrap().expect("record written");
    assert_eq!(record.level, 1);
    assert_eq!(record.direct_referrals, 3);
    assert_eq!(record.qualified_referrals, 3);
    assert_eq!(record.team_volume, dec!(300));
    assert_eq!(record.team_members, 3);
    assert!(record.subordinate_levels.is_empty(), "referrals have no level themselves");
    assert!(matches!(
        report.events.as_slice(),
        [LedgerEvent::BrokerLevelChanged { old_level: 0, new_level: 1, .. }]
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: full replace without duplicate transitions
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn recompute_without_changes_logs_no_transition() {
    let (config, store) = setup("brokers-t2");
    for n in 1..=3 {
        join_and_buy(&config, &store, n, 0, "steady_30", dec!(100));
    }
    let job = job(&config, &store);
    job.recalculate(T0).unwrap();
    let second = job.recalculate(T0 + 3_600).unwrap();

    assert!(second.events.is_empty());
    assert_eq!(second.summary.processed, 1);
    assert_eq!(store.level_change_count(&wallet(0)).unwrap(), 1);
    let record = store.broker_level(&wallet(0)).unwrap().unwrap();
    assert_eq!(record.updated_at, T0 + 3_600, "record is overwritten every pass");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: per-referral investment threshold
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn small_referral_investment_does_not_qualify() {
    let (config, store) = setup("brokers-t3");
    join_and_buy(&config, &store, 1, 0, "steady_30", dec!(100));
    join_and_buy(&config, &store, 2, 0, "steady_30", dec!(100));
    join_and_buy(&config, &store, 3, 0, "quantum_high", dec!(50));

    job(&config, &store).recalculate(T0).unwrap();

    let record = store.broker_level(&wallet(0)).unwrap().unwrap();
    assert_eq!(record.direct_referrals, 3);
    assert_eq!(record.qualified_referrals, 2);
    assert_eq!(record.level, 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: promotions cascade within one pass
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn subordinate_brokers_promote_referrer_in_one_pass() {
    let (config, store) = setup("brokers-t4");
    // Top wallet 0 with five directs (1..=5) buying 1000 each.
    for d in 1..=5 {
        join_and_buy(&config, &store, d, 0, "steady_30", dec!(1000));
    }
    // Directs 1 and 2 each recruit five members buying 100.
    let mut next = 100;
    for d in 1..=2 {
        for _ in 0..5 {
            join_and_buy(&config, &store, next, d, "steady_30", dec!(100));
            next += 1;
        }
    }

    job(&config, &store).recalculate(T0).unwrap();

    for d in 1..=2 {
        assert_eq!(store.broker_level(&wallet(d)).unwrap().unwrap().level, 1);
    }
    let top = store.broker_level(&wallet(0)).unwrap().unwrap();
    assert_eq!(top.team_members, 15);
    assert_eq!(top.team_volume, dec!(6000));
    assert_eq!(top.level, 2, "two level-1 subordinates, 5 directs, 6000 volume, 15 members");
    assert_eq!(top.subordinate_levels.get(&1), Some(&2));
    assert_eq!(store.brokers_at_or_above(2).unwrap().len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: depth bound in the persisted aggregates
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn team_aggregates_stop_at_depth_bound() {
    let (config, store) = setup("brokers-t5");
    // wallet(i + 1) joins under wallet(i), 12 levels deep.
    for i in 0..12 {
        join_and_buy(&config, &store, i + 1, i, "steady_30", dec!(100));
    }

    job(&config, &store).recalculate(T0).unwrap();

    let root = store.broker_level(&wallet(0)).unwrap().unwrap();
    assert_eq!(root.team_members, 8);
    assert_eq!(root.team_volume, dec!(800));
    assert_eq!(root.level, 0, "a single direct referral never qualifies");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 6: demotion
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn cancelled_position_demotes() {
    let (config, store) = setup("brokers-t6");
    let mut ids = Vec::new();
    for n in 1..=3 {
        ids.push(join_and_buy(&config, &store, n, 0, "steady_30", dec!(100)));
    }
    let job = job(&config, &store);
    job.recalculate(T0).unwrap();
    assert_eq!(store.broker_level(&wallet(0)).unwrap().unwrap().level, 1);

    PositionDesk::new(&config, &store).cancel(ids[0]).unwrap();
    let report = job.recalculate(T0 + 60).unwrap();

    let record = store.broker_level(&wallet(0)).unwrap().unwrap();
    assert_eq!(record.level, 0);
    assert_eq!(record.team_volume, dec!(200));
    assert!(matches!(
        report.events.as_slice(),
        [LedgerEvent::BrokerLevelChanged { old_level: 1, new_level: 0, .. }]
    ));
    assert_eq!(store.level_change_count(&wallet(0)).unwrap(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Pure qualification rule
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn levels_are_cumulative() {
    let config = LedgerConfig::default_test();
    // Enough directs and volume for level 2, but not the level-1 member count.
    let q = Qualification {
        direct_investments: vec![dec!(1000); 5],
        direct_levels: vec![1, 1, 0, 0, 0],
        team: TeamStats {
            volume: dec!(10000),
            members: 2,
        },
    };
    assert_eq!(qualify(&config.broker, &q), 0);

    let q = Qualification {
        team: TeamStats {
            volume: dec!(10000),
            members: 20,
        },
        ..q
    };
    assert_eq!(qualify(&config.broker, &q), 2);
}
