use super::{
    balance::{apply_change, read_balance},
    decimal_col, sum_decimal_query, BalanceChange, DriftReportRow, LedgerStore, SourceBreakdown,
};
use crate::{
    config::ReconciliationConfig,
    error::LedgerResult,
    money::to_text,
};
use rusqlite::{params, types::Type};
use rust_decimal::Decimal;

impl LedgerStore {
    // ── Per-source sums ────────────────────────────────────────

    /// Sum every ledger source that contributes to `wallet`'s balance.
    pub fn source_breakdown(
        &self,
        wallet: &str,
        sources: &ReconciliationConfig,
    ) -> LedgerResult<SourceBreakdown> {
        let conn = &self.conn;
        let deposits = sum_decimal_query(
            conn,
            "SELECT amount FROM deposit WHERE wallet = ?1 AND status = 'completed'",
            params![wallet],
        )?;
        let withdrawals = sum_decimal_query(
            conn,
            "SELECT amount FROM withdrawal WHERE wallet = ?1 AND status = 'completed'",
            params![wallet],
        )?;
        let purchases = sum_decimal_query(
            conn,
            "SELECT price FROM position WHERE wallet = ?1",
            params![wallet],
        )?;
        let position_payouts = sum_decimal_query(
            conn,
            "SELECT payout FROM position WHERE wallet = ?1 AND status = 'expired'",
            params![wallet],
        )?;
        let referral_rewards = sum_decimal_query(
            conn,
            "SELECT amount FROM referral_reward WHERE beneficiary = ?1",
            params![wallet],
        )?;
        let team_dividends = sum_decimal_query(
            conn,
            "SELECT amount FROM team_dividend WHERE wallet = ?1",
            params![wallet],
        )?;
        let manual_adjustment = read_balance(conn, wallet)?
            .map(|b| b.manual_adjustment)
            .unwrap_or_default();

        let promo_credits = if sources.include_promo_credits {
            Some(sum_decimal_query(
                conn,
                "SELECT amount FROM promo_credit WHERE wallet = ?1",
                params![wallet],
            )?)
        } else {
            None
        };
        let token_exchanges = if sources.include_token_exchanges {
            Some(sum_decimal_query(
                conn,
                "SELECT usdt_delta FROM token_exchange WHERE wallet = ?1",
                params![wallet],
            )?)
        } else {
            None
        };

        Ok(SourceBreakdown {
            deposits,
            withdrawals,
            purchases,
            position_payouts,
            referral_rewards,
            team_dividends,
            manual_adjustment,
            promo_credits,
            token_exchanges,
        })
    }

    // ── Repairs ────────────────────────────────────────────────

    /// Set `usdt_balance` to `expected`, but only if it still equals
    /// `observed`. Returns false when another writer moved it in between.
    pub fn overwrite_usdt_balance(
        &self,
        wallet: &str,
        observed: Decimal,
        expected: Decimal,
        now: i64,
    ) -> LedgerResult<bool> {
        self.write_txn(|conn| {
            let Some(current) = read_balance(conn, wallet)? else {
                return Ok(false);
            };
            if current.usdt_balance != observed {
                return Ok(false);
            }
            conn.execute(
                "UPDATE user_balance SET usdt_balance = ?1, updated_at = ?2 WHERE wallet = ?3",
                params![to_text(expected), now, wallet],
            )?;
            Ok(true)
        })
    }

    /// Book an unexplained surplus into `manual_adjustment` without touching
    /// `usdt_balance`, leaving an adjustment row as the review trail.
    pub fn record_shortfall_adjustment(
        &self,
        wallet: &str,
        observed: Decimal,
        amount: Decimal,
        now: i64,
    ) -> LedgerResult<bool> {
        self.write_txn(|conn| {
            let Some(current) = read_balance(conn, wallet)? else {
                return Ok(false);
            };
            if current.usdt_balance != observed {
                return Ok(false);
            }
            conn.execute(
                "INSERT INTO balance_adjustment (wallet, amount, reason, operator, moves_balance, created_at)
                 VALUES (?1, ?2, 'reconciliation_shortfall', 'reconciliation', 0, ?3)",
                params![wallet, to_text(amount), now],
            )?;
            let change = BalanceChange {
                manual_adjustment: amount,
                ..BalanceChange::default()
            };
            apply_change(conn, wallet, &change, now)?;
            Ok(true)
        })
    }

    // ── Drift reports ──────────────────────────────────────────

    pub fn insert_drift_report(&self, report: &DriftReportRow) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO drift_report (wallet, actual, expected, difference, breakdown, action, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                report.wallet,
                to_text(report.actual),
                to_text(report.expected),
                to_text(report.difference),
                serde_json::to_string(&report.breakdown)?,
                report.action,
                report.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn drift_reports(&self, wallet: &str) -> LedgerResult<Vec<DriftReportRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT wallet, actual, expected, difference, breakdown, action, created_at
             FROM drift_report WHERE wallet = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![wallet], |row| {
                let breakdown: String = row.get(4)?;
                Ok(DriftReportRow {
                    wallet: row.get(0)?,
                    actual: decimal_col(row, 1)?,
                    expected: decimal_col(row, 2)?,
                    difference: decimal_col(row, 3)?,
                    breakdown: serde_json::from_str(&breakdown).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e))
                    })?,
                    action: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn drift_report_count(&self) -> LedgerResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM drift_report", [], |row| row.get(0))?;
        Ok(count)
    }
}
