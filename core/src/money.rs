//! Decimal arithmetic layer.
//!
//! RULE: every monetary value is a `rust_decimal::Decimal`. No `f64`
//! touches money anywhere in the ledger.
//!
//! One rounding rule is used at every credit computation boundary:
//! half-away-from-zero at MONEY_SCALE fractional digits.

use crate::error::LedgerResult;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Fractional digits kept on every computed credit.
pub const MONEY_SCALE: u32 = 4;

/// Default reconciliation tolerance (0.01 currency unit).
pub const DRIFT_EPSILON_DEFAULT: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// The canonical rounding rule.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `base × rate`, rounded once.
pub fn scaled(base: Decimal, rate: Decimal) -> Decimal {
    round_money(base * rate)
}

pub fn parse_money(raw: &str) -> LedgerResult<Decimal> {
    Ok(Decimal::from_str(raw.trim())?)
}

/// Canonical TEXT form used for storage.
pub fn to_text(value: Decimal) -> String {
    value.normalize().to_string()
}

pub fn sum_money<I: IntoIterator<Item = Decimal>>(values: I) -> Decimal {
    values.into_iter().fold(Decimal::ZERO, |acc, v| acc + v)
}
