//! Funding ingestion — the trusted inputs that move balances outside the
//! periodic jobs.
//!
//! Deposits and withdrawals arrive already confirmed by the upstream chain
//! observer; this module never talks to a chain. It only validates the
//! shape of a record and hands it to the store, which applies the balance
//! change in the same transaction as the record insert.

use crate::{
    error::{LedgerError, LedgerResult},
    store::{FundingKind, LedgerStore},
    types::WalletAddress,
};
use rust_decimal::Decimal;

pub struct FundingDesk<'a> {
    store: &'a LedgerStore,
}

impl<'a> FundingDesk<'a> {
    pub fn new(store: &'a LedgerStore) -> Self {
        Self { store }
    }

    // ── Chain-confirmed feeds ──────────────────────────────────

    /// Record a deposit. Only `completed` rows credit the balance.
    /// Re-applying a known `tx_hash` returns `Ok(false)` and moves nothing,
    /// except that a `pending` row delivered again as `completed` is
    /// promoted and credited.
    pub fn apply_deposit(
        &self,
        wallet: &str,
        amount: Decimal,
        tx_hash: &str,
        status: &str,
        now: i64,
    ) -> LedgerResult<bool> {
        let wallet = WalletAddress::parse(wallet)?;
        require_positive(amount, "deposit amount must be positive")?;
        let applied = self
            .store
            .record_deposit(wallet.as_str(), amount, tx_hash, status, now)?;
        if applied {
            log::debug!("funding: deposit {tx_hash} of {amount} for {wallet} recorded as {status}");
        } else {
            log::debug!("funding: deposit {tx_hash} already recorded, ignored");
        }
        Ok(applied)
    }

    /// Record a withdrawal. A completed withdrawal larger than the balance
    /// is refused with `InsufficientBalance` and nothing is written.
    pub fn apply_withdrawal(
        &self,
        wallet: &str,
        amount: Decimal,
        tx_hash: &str,
        status: &str,
        now: i64,
    ) -> LedgerResult<bool> {
        let wallet = WalletAddress::parse(wallet)?;
        require_positive(amount, "withdrawal amount must be positive")?;
        let applied = self
            .store
            .record_withdrawal(wallet.as_str(), amount, tx_hash, status, now)?;
        if !applied {
            log::debug!("funding: withdrawal {tx_hash} already recorded, ignored");
        }
        Ok(applied)
    }

    /// Promote a pending deposit to completed and credit it.
    pub fn confirm_deposit(&self, tx_hash: &str, now: i64) -> LedgerResult<bool> {
        self.store.confirm_funding(FundingKind::Deposit, tx_hash, now)
    }

    pub fn confirm_withdrawal(&self, tx_hash: &str, now: i64) -> LedgerResult<bool> {
        self.store.confirm_funding(FundingKind::Withdrawal, tx_hash, now)
    }

    // ── Admin sources ──────────────────────────────────────────

    /// Signed admin credit or debit. Returns the new USDT balance.
    pub fn apply_manual_adjustment(
        &self,
        wallet: &str,
        amount: Decimal,
        reason: &str,
        operator: &str,
        now: i64,
    ) -> LedgerResult<Decimal> {
        let wallet = WalletAddress::parse(wallet)?;
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount {
                amount,
                reason: "manual adjustment must be non-zero".into(),
            });
        }
        let balance = self
            .store
            .record_manual_adjustment(wallet.as_str(), amount, reason, operator, now)?;
        log::info!("funding: manual adjustment {amount} for {wallet} by {operator} ({reason})");
        Ok(balance)
    }

    pub fn apply_promo_credit(
        &self,
        wallet: &str,
        amount: Decimal,
        campaign: &str,
        now: i64,
    ) -> LedgerResult<()> {
        let wallet = WalletAddress::parse(wallet)?;
        require_positive(amount, "promo credit must be positive")?;
        self.store
            .record_promo_credit(wallet.as_str(), amount, campaign, now)
    }

    pub fn apply_token_exchange(
        &self,
        wallet: &str,
        usdt_delta: Decimal,
        token_delta: Decimal,
        now: i64,
    ) -> LedgerResult<()> {
        let wallet = WalletAddress::parse(wallet)?;
        self.store
            .record_token_exchange(wallet.as_str(), usdt_delta, token_delta, now)
    }

    // ── Accounts ───────────────────────────────────────────────

    /// Create the immutable member → referrer edge.
    pub fn bind_referrer(&self, member: &str, referrer: &str, now: i64) -> LedgerResult<()> {
        let member = WalletAddress::parse(member)?;
        let referrer = WalletAddress::parse(referrer)?;
        if member == referrer {
            return Err(LedgerError::ReferralRejected {
                member: member.into_inner(),
                reason: "a wallet cannot refer itself".into(),
            });
        }
        self.store.ensure_balance(member.as_str(), now)?;
        self.store.ensure_balance(referrer.as_str(), now)?;
        if !self
            .store
            .insert_referral_edge(member.as_str(), referrer.as_str(), now)?
        {
            return Err(LedgerError::ReferralRejected {
                member: member.into_inner(),
                reason: "referrer already bound".into(),
            });
        }
        Ok(())
    }

    pub fn set_banned(&self, wallet: &str, banned: bool, now: i64) -> LedgerResult<()> {
        let wallet = WalletAddress::parse(wallet)?;
        self.store.set_banned(wallet.as_str(), banned, now)?;
        log::info!("funding: {wallet} banned={banned}");
        Ok(())
    }
}

fn require_positive(amount: Decimal, reason: &str) -> LedgerResult<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount {
            amount,
            reason: reason.to_string(),
        });
    }
    Ok(())
}
