//! Integration tests for the referral reward distributor.
//!
//! Tests verify:
//! 1. A 20-deep chain only pays levels 1..=8
//! 2. Distributing the same source event twice pays once
//! 3. Total payout never exceeds base × cap (seeded random bases)
//! 4. Per-level rounding cannot push the total over the cap
//! 5. An invalid referrer address halts the chain
//! 6. An upline cycle halts the chain
//! 7. A beneficiary without a balance row is created before the credit

use rand::Rng;
use rand_pcg::Pcg64Mcg;
use robot_ledger_core::{
    config::{LedgerConfig, ReferralRewardConfig},
    referral_rewards::ReferralRewardDistributor,
    store::LedgerStore,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const T0: i64 = 1_704_110_400;

fn wallet(n: u32) -> String {
    format!("0x{n:040x}")
}

fn setup(name: &str) -> (LedgerConfig, LedgerStore) {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = LedgerStore::shared_memory(name).expect("open shared store");
    store.migrate().expect("migrate");
    (LedgerConfig::default_test(), store)
}

/// wallet(0) <- wallet(1) <- ... <- wallet(len): wallet(i) is referred by wallet(i + 1).
fn chain(store: &LedgerStore, len: u32) {
    for i in 0..len {
        store
            .insert_referral_edge(&wallet(i), &wallet(i + 1), T0)
            .unwrap();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: depth bound on a 20-deep chain
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn twenty_deep_chain_pays_only_eight_levels() {
    let (config, store) = setup("rewards-t1");
    chain(&store, 20);

    let distribution = ReferralRewardDistributor::new(&config.referral, &store)
        .distribute(&wallet(0), "position:1", dec!(1000), T0)
        .unwrap();

    assert_eq!(distribution.paid.len(), 8);
    assert_eq!(distribution.total_paid(), dec!(450), "45% of 1000");
    for (i, reward) in distribution.paid.iter().enumerate() {
        assert_eq!(reward.level as usize, i + 1);
        assert_eq!(reward.beneficiary, wallet(i as u32 + 1));
        assert_eq!(reward.source_wallet, wallet(0));
    }
    assert_eq!(store.usdt_balance(&wallet(1)).unwrap(), dec!(150));
    assert_eq!(store.usdt_balance(&wallet(8)).unwrap(), dec!(20));
    for n in 9..=20 {
        assert_eq!(
            store.usdt_balance(&wallet(n)).unwrap(),
            Decimal::ZERO,
            "level {n} is beyond the depth bound"
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: no double payment
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn same_source_event_is_paid_once() {
    let (config, store) = setup("rewards-t2");
    chain(&store, 10);
    let distributor = ReferralRewardDistributor::new(&config.referral, &store);

    let first = distributor
        .distribute(&wallet(0), "position:7", dec!(80), T0)
        .unwrap();
    let balances: Vec<Decimal> = (1..=8).map(|n| store.usdt_balance(&wallet(n)).unwrap()).collect();

    let second = distributor
        .distribute(&wallet(0), "position:7", dec!(80), T0 + 60)
        .unwrap();

    assert_eq!(first.paid.len(), 8);
    assert!(second.paid.is_empty(), "second call must not re-credit");
    assert_eq!(second.already_paid, 8, "every level is recognised as paid");
    assert_eq!(store.referral_reward_count().unwrap(), 8);
    let after: Vec<Decimal> = (1..=8).map(|n| store.usdt_balance(&wallet(n)).unwrap()).collect();
    assert_eq!(balances, after);

    // A different source event is a different key.
    let other = distributor
        .distribute(&wallet(0), "position:8", dec!(80), T0)
        .unwrap();
    assert_eq!(other.paid.len(), 8);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: bounded payout over seeded random bases
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn total_payout_never_exceeds_cap() {
    let (config, store) = setup("rewards-t3");
    chain(&store, 12);
    let distributor = ReferralRewardDistributor::new(&config.referral, &store);
    let mut rng = Pcg64Mcg::new(0x5eed_cafe);

    for i in 0..150 {
        let base = Decimal::new(rng.gen_range(1..=10_000_000_000i64), 4);
        let distribution = distributor
            .distribute(&wallet(0), &format!("event:{i}"), base, T0)
            .unwrap();
        let total = distribution.total_paid();
        assert!(
            total <= base * config.referral.total_cap,
            "base {base}: paid {total} exceeds cap"
        );
        for reward in &distribution.paid {
            assert!(reward.amount.scale() <= 4, "amount {} not on money scale", reward.amount);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: rounding up at every level is clamped by the cap
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn rounding_cannot_push_total_over_cap() {
    let (_, store) = setup("rewards-t4");
    chain(&store, 8);
    // 8 × 0.0625 = 0.5 exactly; a base of 0.0008 gives 0.00005 per level,
    // which rounds up to 0.0001 each.
    let rates = ReferralRewardConfig {
        rates: vec![dec!(0.0625); 8],
        total_cap: dec!(0.5),
    };
    let distribution = ReferralRewardDistributor::new(&rates, &store)
        .distribute(&wallet(0), "tiny", dec!(0.0008), T0)
        .unwrap();

    assert_eq!(distribution.total_paid(), dec!(0.0004));
    assert_eq!(distribution.paid.len(), 4, "levels past the cap receive nothing");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: invalid address halts the chain
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn invalid_referrer_address_halts_chain() {
    let (config, store) = setup("rewards-t5");
    store.insert_referral_edge(&wallet(0), &wallet(1), T0).unwrap();
    store.insert_referral_edge(&wallet(1), "not-a-wallet", T0).unwrap();
    store.insert_referral_edge("not-a-wallet", &wallet(3), T0).unwrap();

    let distribution = ReferralRewardDistributor::new(&config.referral, &store)
        .distribute(&wallet(0), "position:1", dec!(100), T0)
        .unwrap();

    assert_eq!(distribution.paid.len(), 1, "only the level before the bad address");
    assert_eq!(store.usdt_balance(&wallet(1)).unwrap(), dec!(15));
    assert_eq!(store.usdt_balance(&wallet(3)).unwrap(), Decimal::ZERO);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 6: cycle in the upline
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn upline_cycle_halts_chain() {
    let (config, store) = setup("rewards-t6");
    // A referred by B, B by C, C by A.
    store.insert_referral_edge(&wallet(10), &wallet(11), T0).unwrap();
    store.insert_referral_edge(&wallet(11), &wallet(12), T0).unwrap();
    store.insert_referral_edge(&wallet(12), &wallet(10), T0).unwrap();

    let distribution = ReferralRewardDistributor::new(&config.referral, &store)
        .distribute(&wallet(10), "position:1", dec!(100), T0)
        .unwrap();

    assert_eq!(distribution.paid.len(), 2);
    assert_eq!(distribution.levels_walked, 2);
    assert_eq!(store.usdt_balance(&wallet(10)).unwrap(), Decimal::ZERO, "source never pays itself");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 7: balance row created on first credit
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn beneficiary_without_balance_row_is_credited() {
    let (config, store) = setup("rewards-t7");
    store.insert_referral_edge(&wallet(0), &wallet(1), T0).unwrap();
    assert!(store.balance(&wallet(1)).unwrap().is_none());

    ReferralRewardDistributor::new(&config.referral, &store)
        .distribute(&wallet(0), "position:1", dec!(20), T0)
        .unwrap();

    let balance = store.balance(&wallet(1)).unwrap().expect("row created");
    assert_eq!(balance.usdt_balance, dec!(3));
    let history = store.history_for_wallet(&wallet(1)).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, "referral_reward");
}

#[test]
fn zero_base_pays_nothing() {
    let (config, store) = setup("rewards-t8");
    chain(&store, 3);
    let distribution = ReferralRewardDistributor::new(&config.referral, &store)
        .distribute(&wallet(0), "position:1", Decimal::ZERO, T0)
        .unwrap();
    assert!(distribution.paid.is_empty());
    assert!(ReferralRewardDistributor::new(&config.referral, &store)
        .distribute(&wallet(0), "position:2", dec!(-1), T0)
        .is_err());
}
