use super::{
    balance::{apply_change, ensure_balance_row, insert_history},
    decimal_col, optional, BalanceChange, LedgerStore, ReferralRewardRow,
};
use crate::{error::LedgerResult, money::to_text};
use rusqlite::params;

impl LedgerStore {
    // ── Referral edges ─────────────────────────────────────────

    /// Bind `member` to `referrer`. Edges are immutable: returns false if
    /// the member already has a referrer.
    pub fn insert_referral_edge(&self, member: &str, referrer: &str, now: i64) -> LedgerResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO referral_edge (member_wallet, referrer_wallet, created_at)
             VALUES (?1, ?2, ?3)",
            params![member, referrer, now],
        )?;
        Ok(inserted == 1)
    }

    pub fn referrer_of(&self, member: &str) -> LedgerResult<Option<String>> {
        optional(self.conn.query_row(
            "SELECT referrer_wallet FROM referral_edge WHERE member_wallet = ?1",
            params![member],
            |row| row.get(0),
        ))
    }

    pub fn direct_referrals(&self, referrer: &str) -> LedgerResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT member_wallet FROM referral_edge WHERE referrer_wallet = ?1
             ORDER BY member_wallet ASC",
        )?;
        let rows = stmt
            .query_map(params![referrer], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every `(member, referrer)` edge, for building the in-memory forest.
    pub fn all_referral_edges(&self) -> LedgerResult<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT member_wallet, referrer_wallet FROM referral_edge ORDER BY member_wallet ASC",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Referral rewards ───────────────────────────────────────

    /// Insert the reward record and credit the beneficiary atomically.
    ///
    /// The unique key (beneficiary, source_event_id, level) is the
    /// idempotency guard: a conflicting insert means the reward was already
    /// paid, nothing is credited and `false` is returned.
    pub fn record_referral_reward(&self, reward: &ReferralRewardRow) -> LedgerResult<bool> {
        self.write_txn(|conn| {
            // The row must exist before the credit so the update cannot be lost.
            ensure_balance_row(conn, &reward.beneficiary, reward.created_at)?;
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO referral_reward
                 (beneficiary, source_wallet, source_event_id, level, base_amount, rate, amount, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    reward.beneficiary,
                    reward.source_wallet,
                    reward.source_event_id,
                    i64::from(reward.level),
                    to_text(reward.base_amount),
                    to_text(reward.rate),
                    to_text(reward.amount),
                    reward.created_at,
                ],
            )?;
            if inserted == 0 {
                return Ok(false);
            }
            apply_change(
                conn,
                &reward.beneficiary,
                &BalanceChange::usdt(reward.amount),
                reward.created_at,
            )?;
            insert_history(
                conn,
                &reward.beneficiary,
                "referral_reward",
                reward.amount,
                Some(&format!("{}#L{}", reward.source_event_id, reward.level)),
                reward.created_at,
            )?;
            Ok(true)
        })
    }

    pub fn rewards_for_source(&self, source_event_id: &str) -> LedgerResult<Vec<ReferralRewardRow>> {
        self.query_rewards(
            "WHERE source_event_id = ?1 ORDER BY level ASC",
            source_event_id,
        )
    }

    pub fn referral_reward_count(&self) -> LedgerResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM referral_reward", [], |row| row.get(0))?;
        Ok(count)
    }

    fn query_rewards(&self, filter: &str, key: &str) -> LedgerResult<Vec<ReferralRewardRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT beneficiary, source_wallet, source_event_id, level, base_amount, rate, amount, created_at
             FROM referral_reward {filter}"
        ))?;
        let rows = stmt
            .query_map(params![key], |row| {
                Ok(ReferralRewardRow {
                    beneficiary: row.get(0)?,
                    source_wallet: row.get(1)?,
                    source_event_id: row.get(2)?,
                    level: row.get::<_, i64>(3)? as u8,
                    base_amount: decimal_col(row, 4)?,
                    rate: decimal_col(row, 5)?,
                    amount: decimal_col(row, 6)?,
                    created_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
