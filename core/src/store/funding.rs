use super::{
    balance::{apply_change, ensure_balance_row, insert_history},
    decimal_col, BalanceChange, DepositRow, LedgerStore,
};
use crate::{error::LedgerResult, money::to_text};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundingKind {
    Deposit,
    Withdrawal,
}

impl FundingKind {
    fn table(self) -> &'static str {
        match self {
            FundingKind::Deposit    => "deposit",
            FundingKind::Withdrawal => "withdrawal",
        }
    }

    /// Balance change and signed history amount for a completed record.
    fn change(self, amount: Decimal) -> (BalanceChange, Decimal) {
        match self {
            FundingKind::Deposit => (
                BalanceChange { usdt: amount, total_deposit: amount, ..BalanceChange::default() },
                amount,
            ),
            FundingKind::Withdrawal => (
                BalanceChange { usdt: -amount, total_withdraw: amount, ..BalanceChange::default() },
                -amount,
            ),
        }
    }
}

/// Insert a feed record keyed by tx hash and apply it when completed.
/// A hash already stored as `pending` that arrives again as `completed`
/// is promoted; any other repeat is a no-op.
fn record_funding(
    conn: &Connection,
    kind: FundingKind,
    wallet: &str,
    amount: Decimal,
    tx_hash: &str,
    status: &str,
    now: i64,
) -> LedgerResult<bool> {
    ensure_balance_row(conn, wallet, now)?;
    let table = kind.table();
    let inserted = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {table} (wallet, amount, tx_hash, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)"
        ),
        params![wallet, to_text(amount), tx_hash, status, now],
    )?;
    if inserted == 0 {
        if status == "completed" {
            return promote_pending(conn, kind, tx_hash, now);
        }
        return Ok(false);
    }
    if status == "completed" {
        let (change, signed) = kind.change(amount);
        apply_change(conn, wallet, &change, now)?;
        insert_history(conn, wallet, table, signed, Some(tx_hash), now)?;
    }
    Ok(true)
}

/// Flip a pending row to `completed` and apply it using the stored wallet
/// and amount. Returns false when no pending row with that hash exists.
fn promote_pending(conn: &Connection, kind: FundingKind, tx_hash: &str, now: i64) -> LedgerResult<bool> {
    let table = kind.table();
    let pending = super::optional(conn.query_row(
        &format!("SELECT wallet, amount FROM {table} WHERE tx_hash = ?1 AND status = 'pending'"),
        params![tx_hash],
        |row| Ok((row.get::<_, String>(0)?, decimal_col(row, 1)?)),
    ))?;
    let Some((wallet, amount)) = pending else {
        return Ok(false);
    };
    conn.execute(
        &format!("UPDATE {table} SET status = 'completed' WHERE tx_hash = ?1 AND status = 'pending'"),
        params![tx_hash],
    )?;
    let (change, signed) = kind.change(amount);
    apply_change(conn, &wallet, &change, now)?;
    insert_history(conn, &wallet, table, signed, Some(tx_hash), now)?;
    Ok(true)
}

impl LedgerStore {
    // ── Deposits ───────────────────────────────────────────────

    /// Record a deposit from the confirmation feed. Completed deposits
    /// credit the balance in the same transaction. Returns false when the
    /// tx hash was already recorded and nothing changed.
    pub fn record_deposit(
        &self,
        wallet: &str,
        amount: Decimal,
        tx_hash: &str,
        status: &str,
        now: i64,
    ) -> LedgerResult<bool> {
        self.write_txn(|conn| {
            record_funding(conn, FundingKind::Deposit, wallet, amount, tx_hash, status, now)
        })
    }

    pub fn deposits_for_wallet(&self, wallet: &str) -> LedgerResult<Vec<DepositRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT wallet, amount, tx_hash, status, created_at
             FROM deposit WHERE wallet = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![wallet], |row| {
                Ok(DepositRow {
                    wallet: row.get(0)?,
                    amount: decimal_col(row, 1)?,
                    tx_hash: row.get(2)?,
                    status: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Withdrawals ────────────────────────────────────────────

    /// Record a withdrawal from the confirmation feed. Completed withdrawals
    /// debit the balance; the whole record is refused if funds are short.
    pub fn record_withdrawal(
        &self,
        wallet: &str,
        amount: Decimal,
        tx_hash: &str,
        status: &str,
        now: i64,
    ) -> LedgerResult<bool> {
        self.write_txn(|conn| {
            record_funding(conn, FundingKind::Withdrawal, wallet, amount, tx_hash, status, now)
        })
    }

    /// Move a pending deposit or withdrawal to `completed` and apply it.
    /// Returns false when no pending row with that hash exists.
    pub fn confirm_funding(&self, kind: FundingKind, tx_hash: &str, now: i64) -> LedgerResult<bool> {
        self.write_txn(|conn| promote_pending(conn, kind, tx_hash, now))
    }

    // ── Manual adjustments ─────────────────────────────────────

    pub fn record_manual_adjustment(
        &self,
        wallet: &str,
        amount: Decimal,
        reason: &str,
        operator: &str,
        now: i64,
    ) -> LedgerResult<Decimal> {
        self.write_txn(|conn| {
            conn.execute(
                "INSERT INTO balance_adjustment (wallet, amount, reason, operator, moves_balance, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                params![wallet, to_text(amount), reason, operator, now],
            )?;
            let change = BalanceChange {
                usdt: amount,
                manual_adjustment: amount,
                ..BalanceChange::default()
            };
            let new_balance = apply_change(conn, wallet, &change, now)?;
            insert_history(conn, wallet, "manual_adjustment", amount, Some(reason), now)?;
            Ok(new_balance)
        })
    }

    // ── Secondary sources ──────────────────────────────────────

    pub fn record_promo_credit(
        &self,
        wallet: &str,
        amount: Decimal,
        campaign: &str,
        now: i64,
    ) -> LedgerResult<()> {
        self.write_txn(|conn| {
            conn.execute(
                "INSERT INTO promo_credit (wallet, amount, campaign, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![wallet, to_text(amount), campaign, now],
            )?;
            apply_change(conn, wallet, &BalanceChange::usdt(amount), now)?;
            insert_history(conn, wallet, "promo_credit", amount, Some(campaign), now)?;
            Ok(())
        })
    }

    /// Swap between USDT and the secondary token. Negative `usdt_delta`
    /// spends USDT and is refused if the balance is short.
    pub fn record_token_exchange(
        &self,
        wallet: &str,
        usdt_delta: Decimal,
        token_delta: Decimal,
        now: i64,
    ) -> LedgerResult<()> {
        self.write_txn(|conn| {
            conn.execute(
                "INSERT INTO token_exchange (wallet, usdt_delta, token_delta, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![wallet, to_text(usdt_delta), to_text(token_delta), now],
            )?;
            let change = BalanceChange {
                usdt: usdt_delta,
                secondary_token: token_delta,
                ..BalanceChange::default()
            };
            apply_change(conn, wallet, &change, now)?;
            insert_history(conn, wallet, "token_exchange", usdt_delta, None, now)?;
            Ok(())
        })
    }
}
