use super::{
    balance::{apply_change, insert_history},
    decimal_col, optional, BalanceChange, LedgerStore, PositionRow, PositionStatus,
};
use crate::{error::LedgerResult, money::to_text, types::PositionId};
use rusqlite::{params, types::Type, Row};
use rust_decimal::Decimal;
use std::collections::HashMap;

const POSITION_COLUMNS: &str = "id, wallet, product_id, price, expected_return, is_quantified,
     status, payout, start_at, end_at, settled_at";

fn map_position_row(row: &Row<'_>) -> rusqlite::Result<PositionRow> {
    let status: String = row.get(6)?;
    Ok(PositionRow {
        id: row.get(0)?,
        wallet: row.get(1)?,
        product_id: row.get(2)?,
        price: decimal_col(row, 3)?,
        expected_return: decimal_col(row, 4)?,
        is_quantified: row.get::<_, i32>(5)? != 0,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(6, Type::Text, e.into())
        })?,
        payout: decimal_col(row, 7)?,
        start_at: row.get(8)?,
        end_at: row.get(9)?,
        settled_at: row.get(10)?,
    })
}

/// Input for a purchase.
#[derive(Debug, Clone)]
pub struct NewPosition<'a> {
    pub wallet: &'a str,
    pub product_id: &'a str,
    pub price: Decimal,
    pub expected_return: Decimal,
    pub start_at: i64,
    pub end_at: i64,
}

impl LedgerStore {
    // ── Purchase ───────────────────────────────────────────────

    /// Debit the price and create the active position in one transaction.
    pub fn insert_position(&self, new: &NewPosition<'_>) -> LedgerResult<PositionId> {
        self.write_txn(|conn| {
            apply_change(conn, new.wallet, &BalanceChange::usdt(-new.price), new.start_at)?;
            conn.execute(
                "INSERT INTO position
                 (wallet, product_id, price, expected_return, is_quantified, status, start_at, end_at)
                 VALUES (?1, ?2, ?3, ?4, 0, 'active', ?5, ?6)",
                params![
                    new.wallet,
                    new.product_id,
                    to_text(new.price),
                    to_text(new.expected_return),
                    new.start_at,
                    new.end_at,
                ],
            )?;
            let id = conn.last_insert_rowid();
            insert_history(
                conn,
                new.wallet,
                "robot_purchase",
                -new.price,
                Some(&format!("position:{id}")),
                new.start_at,
            )?;
            Ok(id)
        })
    }

    // ── Queries ────────────────────────────────────────────────

    pub fn position(&self, id: PositionId) -> LedgerResult<Option<PositionRow>> {
        optional(self.conn.query_row(
            &format!("SELECT {POSITION_COLUMNS} FROM position WHERE id = ?1"),
            params![id],
            map_position_row,
        ))
    }

    /// Active positions whose end time has passed, oldest end time first.
    pub fn matured_active_positions(&self, now: i64) -> LedgerResult<Vec<PositionRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {POSITION_COLUMNS} FROM position
             WHERE status = 'active' AND end_at <= ?1
             ORDER BY end_at ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map(params![now], map_position_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn position_count(&self, status: PositionStatus) -> LedgerResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM position WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Committed capital per wallet: prices of active and expired positions.
    /// Cancelled positions never count.
    pub fn committed_investment_by_wallet(&self) -> LedgerResult<HashMap<String, Decimal>> {
        let mut stmt = self.conn.prepare(
            "SELECT wallet, price FROM position WHERE status IN ('active', 'expired')",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, decimal_col(row, 1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut totals: HashMap<String, Decimal> = HashMap::new();
        for (wallet, price) in rows {
            *totals.entry(wallet).or_default() += price;
        }
        Ok(totals)
    }

    // ── State transitions ──────────────────────────────────────

    /// Expire an active position and credit `payout` to its owner.
    ///
    /// The `status = 'active'` guard makes the transition happen at most
    /// once: if another run already settled the position, nothing is
    /// credited and `false` is returned.
    pub fn settle_position(&self, id: PositionId, payout: Decimal, now: i64) -> LedgerResult<bool> {
        self.write_txn(|conn| {
            let changed = conn.execute(
                "UPDATE position SET status = 'expired', payout = ?1, settled_at = ?2
                 WHERE id = ?3 AND status = 'active'",
                params![to_text(payout), now, id],
            )?;
            if changed == 0 {
                return Ok(false);
            }
            if payout > Decimal::ZERO {
                let wallet: String = conn.query_row(
                    "SELECT wallet FROM position WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )?;
                apply_change(conn, &wallet, &BalanceChange::usdt(payout), now)?;
                insert_history(
                    conn,
                    &wallet,
                    "robot_maturity",
                    payout,
                    Some(&format!("position:{id}")),
                    now,
                )?;
            }
            Ok(true)
        })
    }

    /// Compare-and-set on the status column. Moves no money.
    pub fn transition_position(
        &self,
        id: PositionId,
        from: PositionStatus,
        to: PositionStatus,
    ) -> LedgerResult<bool> {
        let changed = self.conn.execute(
            "UPDATE position SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![to.as_str(), id, from.as_str()],
        )?;
        Ok(changed == 1)
    }

    pub fn mark_quantified(&self, id: PositionId) -> LedgerResult<bool> {
        let changed = self.conn.execute(
            "UPDATE position SET is_quantified = 1 WHERE id = ?1 AND status = 'active'",
            params![id],
        )?;
        Ok(changed == 1)
    }
}
