use super::{decimal_col, optional, BalanceRow, HistoryRow, LedgerStore};
use crate::{error::{LedgerError, LedgerResult}, money::to_text};
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;

/// Signed deltas applied to one balance row in a single write.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BalanceChange {
    pub usdt: Decimal,
    pub secondary_token: Decimal,
    pub total_deposit: Decimal,
    pub total_withdraw: Decimal,
    pub manual_adjustment: Decimal,
}

impl BalanceChange {
    pub fn usdt(amount: Decimal) -> Self {
        Self { usdt: amount, ..Self::default() }
    }
}

const BALANCE_COLUMNS: &str = "wallet, usdt_balance, secondary_token_balance, total_deposit,
     total_withdraw, manual_adjustment, is_banned, created_at, updated_at";

fn map_balance_row(row: &Row<'_>) -> rusqlite::Result<BalanceRow> {
    Ok(BalanceRow {
        wallet: row.get(0)?,
        usdt_balance: decimal_col(row, 1)?,
        secondary_token_balance: decimal_col(row, 2)?,
        total_deposit: decimal_col(row, 3)?,
        total_withdraw: decimal_col(row, 4)?,
        manual_adjustment: decimal_col(row, 5)?,
        is_banned: row.get::<_, i32>(6)? != 0,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Create the balance row with zero balances if it does not exist yet.
pub(super) fn ensure_balance_row(conn: &Connection, wallet: &str, now: i64) -> LedgerResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO user_balance (wallet, created_at, updated_at) VALUES (?1, ?2, ?2)",
        params![wallet, now],
    )?;
    Ok(())
}

pub(super) fn read_balance(conn: &Connection, wallet: &str) -> LedgerResult<Option<BalanceRow>> {
    optional(conn.query_row(
        &format!("SELECT {BALANCE_COLUMNS} FROM user_balance WHERE wallet = ?1"),
        params![wallet],
        map_balance_row,
    ))
}

/// `a + b`, with overflow reported as an invalid amount.
fn checked_sum(a: Decimal, b: Decimal) -> LedgerResult<Decimal> {
    a.checked_add(b).ok_or_else(|| LedgerError::InvalidAmount {
        amount: b,
        reason: "balance arithmetic overflow".to_string(),
    })
}

/// Apply `change` to the wallet's row. Must run inside a write transaction.
/// A debit that would take `usdt_balance` below zero is refused, and a
/// delta that overflows any column is refused as an invalid amount.
pub(super) fn apply_change(
    conn: &Connection,
    wallet: &str,
    change: &BalanceChange,
    now: i64,
) -> LedgerResult<Decimal> {
    ensure_balance_row(conn, wallet, now)?;
    let current = read_balance(conn, wallet)?.ok_or_else(|| {
        LedgerError::Other(anyhow::anyhow!("balance row for {wallet} vanished mid-transaction"))
    })?;

    let new_usdt = checked_sum(current.usdt_balance, change.usdt)?;
    let new_token = checked_sum(current.secondary_token_balance, change.secondary_token)?;
    let new_deposit = checked_sum(current.total_deposit, change.total_deposit)?;
    let new_withdraw = checked_sum(current.total_withdraw, change.total_withdraw)?;
    let new_adjustment = checked_sum(current.manual_adjustment, change.manual_adjustment)?;
    if change.usdt < Decimal::ZERO && new_usdt < Decimal::ZERO {
        return Err(LedgerError::InsufficientBalance {
            wallet: wallet.to_string(),
            required: -change.usdt,
            available: current.usdt_balance,
        });
    }

    conn.execute(
        "UPDATE user_balance
         SET usdt_balance = ?1, secondary_token_balance = ?2, total_deposit = ?3,
             total_withdraw = ?4, manual_adjustment = ?5, updated_at = ?6
         WHERE wallet = ?7",
        params![
            to_text(new_usdt),
            to_text(new_token),
            to_text(new_deposit),
            to_text(new_withdraw),
            to_text(new_adjustment),
            now,
            wallet,
        ],
    )?;
    Ok(new_usdt)
}

pub(super) fn insert_history(
    conn: &Connection,
    wallet: &str,
    kind: &str,
    amount: Decimal,
    reference: Option<&str>,
    now: i64,
) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO transaction_history (entry_id, wallet, kind, amount, reference, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            uuid::Uuid::new_v4().to_string(),
            wallet,
            kind,
            to_text(amount),
            reference,
            now,
        ],
    )?;
    Ok(())
}

impl LedgerStore {
    // ── Balance aggregate ──────────────────────────────────────

    pub fn ensure_balance(&self, wallet: &str, now: i64) -> LedgerResult<()> {
        ensure_balance_row(&self.conn, wallet, now)
    }

    pub fn balance(&self, wallet: &str) -> LedgerResult<Option<BalanceRow>> {
        read_balance(&self.conn, wallet)
    }

    /// Current USDT balance, zero for unknown wallets.
    pub fn usdt_balance(&self, wallet: &str) -> LedgerResult<Decimal> {
        Ok(self
            .balance(wallet)?
            .map(|b| b.usdt_balance)
            .unwrap_or_default())
    }

    pub fn all_balances(&self) -> LedgerResult<Vec<BalanceRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {BALANCE_COLUMNS} FROM user_balance ORDER BY wallet ASC"))?;
        let rows = stmt
            .query_map([], map_balance_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn is_banned(&self, wallet: &str) -> LedgerResult<bool> {
        Ok(self.balance(wallet)?.map(|b| b.is_banned).unwrap_or(false))
    }

    pub fn set_banned(&self, wallet: &str, banned: bool, now: i64) -> LedgerResult<()> {
        self.write_txn(|conn| {
            ensure_balance_row(conn, wallet, now)?;
            conn.execute(
                "UPDATE user_balance SET is_banned = ?1, updated_at = ?2 WHERE wallet = ?3",
                params![i32::from(banned), now, wallet],
            )?;
            Ok(())
        })
    }

    /// Atomic credit or debit with a history entry but no ledger record.
    /// Reconciliation reports such changes as drift until a source explains them.
    pub fn apply_balance_change(
        &self,
        wallet: &str,
        change: &BalanceChange,
        kind: &str,
        reference: Option<&str>,
        now: i64,
    ) -> LedgerResult<Decimal> {
        self.write_txn(|conn| {
            let new_balance = apply_change(conn, wallet, change, now)?;
            insert_history(conn, wallet, kind, change.usdt, reference, now)?;
            Ok(new_balance)
        })
    }

    // ── Transaction history ────────────────────────────────────

    pub fn history_for_wallet(&self, wallet: &str) -> LedgerResult<Vec<HistoryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT entry_id, wallet, kind, amount, reference, created_at
             FROM transaction_history WHERE wallet = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map(params![wallet], |row| {
                Ok(HistoryRow {
                    entry_id: row.get(0)?,
                    wallet: row.get(1)?,
                    kind: row.get(2)?,
                    amount: decimal_col(row, 3)?,
                    reference: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
