use super::{decimal_col, optional, BrokerLevelRow, LedgerStore};
use crate::{error::LedgerResult, money::to_text};
use rusqlite::{params, types::Type, Row};
use std::collections::{BTreeMap, HashMap};

const BROKER_COLUMNS: &str = "wallet, level, direct_referrals, qualified_referrals, team_volume,
     team_members, subordinate_levels, updated_at";

fn map_broker_row(row: &Row<'_>) -> rusqlite::Result<BrokerLevelRow> {
    let histogram: String = row.get(6)?;
    let subordinate_levels: BTreeMap<u8, u32> = serde_json::from_str(&histogram)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    Ok(BrokerLevelRow {
        wallet: row.get(0)?,
        level: row.get::<_, i64>(1)? as u8,
        direct_referrals: row.get::<_, i64>(2)? as u32,
        qualified_referrals: row.get::<_, i64>(3)? as u32,
        team_volume: decimal_col(row, 4)?,
        team_members: row.get::<_, i64>(5)? as u32,
        subordinate_levels,
        updated_at: row.get(7)?,
    })
}

impl LedgerStore {
    // ── Broker level cache ─────────────────────────────────────

    /// Full replace of one wallet's derived record.
    pub fn upsert_broker_level(&self, record: &BrokerLevelRow) -> LedgerResult<()> {
        let histogram = serde_json::to_string(&record.subordinate_levels)?;
        self.conn.execute(
            "INSERT INTO broker_level
             (wallet, level, direct_referrals, qualified_referrals, team_volume,
              team_members, subordinate_levels, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(wallet) DO UPDATE SET
                level = excluded.level,
                direct_referrals = excluded.direct_referrals,
                qualified_referrals = excluded.qualified_referrals,
                team_volume = excluded.team_volume,
                team_members = excluded.team_members,
                subordinate_levels = excluded.subordinate_levels,
                updated_at = excluded.updated_at",
            params![
                record.wallet,
                i64::from(record.level),
                i64::from(record.direct_referrals),
                i64::from(record.qualified_referrals),
                to_text(record.team_volume),
                i64::from(record.team_members),
                histogram,
                record.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn broker_level(&self, wallet: &str) -> LedgerResult<Option<BrokerLevelRow>> {
        optional(self.conn.query_row(
            &format!("SELECT {BROKER_COLUMNS} FROM broker_level WHERE wallet = ?1"),
            params![wallet],
            map_broker_row,
        ))
    }

    /// Current level of every wallet that has a record.
    pub fn broker_level_map(&self) -> LedgerResult<HashMap<String, u8>> {
        let mut stmt = self.conn.prepare("SELECT wallet, level FROM broker_level")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u8)))?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    /// Records with `level >= min_level`, ordered by wallet.
    pub fn brokers_at_or_above(&self, min_level: u8) -> LedgerResult<Vec<BrokerLevelRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {BROKER_COLUMNS} FROM broker_level WHERE level >= ?1 ORDER BY wallet ASC"
        ))?;
        let rows = stmt
            .query_map(params![i64::from(min_level)], map_broker_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn insert_level_change(&self, wallet: &str, old_level: u8, new_level: u8, now: i64) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO broker_level_change (wallet, old_level, new_level, changed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![wallet, i64::from(old_level), i64::from(new_level), now],
        )?;
        Ok(())
    }

    pub fn level_change_count(&self, wallet: &str) -> LedgerResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM broker_level_change WHERE wallet = ?1",
            params![wallet],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
