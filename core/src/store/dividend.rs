use super::{
    balance::{apply_change, ensure_balance_row, insert_history},
    decimal_col, BalanceChange, LedgerStore, TeamDividendRow,
};
use crate::{error::LedgerResult, money::to_text};
use rusqlite::params;

impl LedgerStore {
    // ── Team dividends ─────────────────────────────────────────

    /// Insert the dividend record and credit the wallet atomically.
    /// A conflict on (wallet, period, dividend_type) means the period was
    /// already paid: nothing is credited and `false` is returned.
    pub fn record_team_dividend(&self, dividend: &TeamDividendRow) -> LedgerResult<bool> {
        self.write_txn(|conn| {
            ensure_balance_row(conn, &dividend.wallet, dividend.created_at)?;
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO team_dividend
                 (wallet, dividend_type, period, level, amount, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    dividend.wallet,
                    dividend.dividend_type,
                    dividend.period,
                    i64::from(dividend.level),
                    to_text(dividend.amount),
                    dividend.created_at,
                ],
            )?;
            if inserted == 0 {
                return Ok(false);
            }
            apply_change(
                conn,
                &dividend.wallet,
                &BalanceChange::usdt(dividend.amount),
                dividend.created_at,
            )?;
            insert_history(
                conn,
                &dividend.wallet,
                &format!("{}_dividend", dividend.dividend_type),
                dividend.amount,
                Some(&dividend.period),
                dividend.created_at,
            )?;
            Ok(true)
        })
    }

    pub fn dividends_for_wallet(&self, wallet: &str) -> LedgerResult<Vec<TeamDividendRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT wallet, dividend_type, period, level, amount, created_at
             FROM team_dividend WHERE wallet = ?1
             ORDER BY period ASC, dividend_type ASC",
        )?;
        let rows = stmt
            .query_map(params![wallet], |row| {
                Ok(TeamDividendRow {
                    wallet: row.get(0)?,
                    dividend_type: row.get(1)?,
                    period: row.get(2)?,
                    level: row.get::<_, i64>(3)? as u8,
                    amount: decimal_col(row, 4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
