//! Position administration: purchase and the admin-only state changes.
//!
//! State machine:
//!   active → expired      (lifecycle job, time-triggered)
//!   active → cancelled    (admin)
//!   cancelled → active    (admin reactivation, exceptional)
//!
//! Only the lifecycle job moves a position to `expired`; this module handles
//! the external transitions around it.

use crate::{
    config::LedgerConfig,
    error::{LedgerError, LedgerResult},
    money::round_money,
    store::{LedgerStore, NewPosition, PositionRow, PositionStatus},
    types::{PositionId, WalletAddress},
};
use rust_decimal::Decimal;

const SECONDS_PER_DAY: i64 = 86_400;

pub struct PositionDesk<'a> {
    config: &'a LedgerConfig,
    store: &'a LedgerStore,
}

impl<'a> PositionDesk<'a> {
    pub fn new(config: &'a LedgerConfig, store: &'a LedgerStore) -> Self {
        Self { config, store }
    }

    /// Buy a robot: debit the price and open an active position.
    pub fn purchase(
        &self,
        wallet: &str,
        product_id: &str,
        price: Decimal,
        now: i64,
    ) -> LedgerResult<PositionId> {
        let wallet = WalletAddress::parse(wallet)?;
        let product = self.config.product(product_id)?;
        if price < product.min_price || price <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount {
                amount: price,
                reason: format!("{product_id} requires a price of at least {}", product.min_price),
            });
        }
        if self.store.is_banned(wallet.as_str())? {
            return Err(LedgerError::WalletBanned {
                wallet: wallet.into_inner(),
            });
        }

        let expected_return =
            round_money(price * product.daily_rate * Decimal::from(product.duration_days));
        let id = self.store.insert_position(&NewPosition {
            wallet: wallet.as_str(),
            product_id,
            price,
            expected_return,
            start_at: now,
            end_at: now + product.duration_days * SECONDS_PER_DAY,
        })?;
        log::debug!("positions: {wallet} bought {product_id} for {price} (position {id})");
        Ok(id)
    }

    /// Mark the profit of an active position as accrued.
    pub fn quantify(&self, id: PositionId) -> LedgerResult<()> {
        if self.store.mark_quantified(id)? {
            return Ok(());
        }
        let position = self.require(id)?;
        Err(invalid(&position, "quantified"))
    }

    pub fn cancel(&self, id: PositionId) -> LedgerResult<()> {
        self.transition(id, PositionStatus::Active, PositionStatus::Cancelled)
    }

    /// Cancel every id independently; one failure does not stop the rest.
    pub fn batch_cancel(&self, ids: &[PositionId]) -> Vec<(PositionId, LedgerResult<()>)> {
        ids.iter()
            .map(|&id| {
                let result = self.cancel(id);
                if let Err(e) = &result {
                    log::warn!("positions: batch cancel of {id} failed: {e}");
                }
                (id, result)
            })
            .collect()
    }

    pub fn reactivate(&self, id: PositionId) -> LedgerResult<()> {
        self.transition(id, PositionStatus::Cancelled, PositionStatus::Active)
    }

    fn transition(&self, id: PositionId, from: PositionStatus, to: PositionStatus) -> LedgerResult<()> {
        if self.store.transition_position(id, from, to)? {
            log::info!("positions: position {id} {from} -> {to}");
            return Ok(());
        }
        let position = self.require(id)?;
        Err(invalid(&position, to.as_str()))
    }

    fn require(&self, id: PositionId) -> LedgerResult<PositionRow> {
        self.store
            .position(id)?
            .ok_or(LedgerError::PositionNotFound { position_id: id })
    }
}

fn invalid(position: &PositionRow, to: &str) -> LedgerError {
    LedgerError::InvalidTransition {
        position_id: position.id,
        from: position.status.to_string(),
        to: to.to_string(),
    }
}
