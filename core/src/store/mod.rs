//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Jobs call store methods — they never execute SQL directly.
//!
//! Every operation that moves money runs inside a `BEGIN IMMEDIATE`
//! transaction: the balance row is read, adjusted in exact decimal
//! arithmetic and written back while SQLite holds the write lock, and the
//! ledger record that justifies the change commits in the same transaction.

use crate::{
    error::LedgerResult,
    event::EventLogEntry,
    types::PositionId,
};
use rusqlite::{
    params, types::Type, Connection, OpenFlags, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

mod balance;
mod broker;
mod dividend;
mod funding;
mod position;
mod reconciliation;
mod referral;

pub use balance::BalanceChange;
pub use funding::FundingKind;
pub use position::NewPosition;

pub struct LedgerStore {
    conn: Connection,
    path: Option<String>, // None for a private :memory: database
}

impl LedgerStore {
    pub fn open(path: &str) -> LedgerResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        // Overlapping job runs wait for the write lock instead of failing.
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Open a named in-memory database that every `reopen()` handle shares.
    /// Used by tests to give each job its own connection to one ledger.
    pub fn shared_memory(name: &str) -> LedgerResult<Self> {
        Self::open(&format!("file:{name}?mode=memory&cache=shared"))
    }

    /// Open another connection to the same database.
    /// A private :memory: store cannot be shared and reopens empty.
    pub fn reopen(&self) -> LedgerResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order. Safe to call repeatedly.
    pub fn migrate(&self) -> LedgerResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_balances.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_referrals.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_positions.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/005_brokers.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/006_reconciliation.sql"))?;
        Ok(())
    }

    /// Cheap round trip used by jobs before they start a batch.
    pub fn ping(&self) -> LedgerResult<()> {
        self.conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    /// Run `f` inside a write-locked transaction. Dropping without commit
    /// (any `?` inside `f`) rolls everything back.
    fn write_txn<T>(&self, f: impl FnOnce(&Connection) -> LedgerResult<T>) -> LedgerResult<T> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let out = {
            let conn: &Connection = &tx;
            f(conn)?
        };
        tx.commit()?;
        Ok(out)
    }

    // ── Job runs ───────────────────────────────────────────────

    pub fn insert_job_run(&self, run_id: &str, job: &str, started_at: i64) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO job_run (run_id, job, started_at) VALUES (?1, ?2, ?3)",
            params![run_id, job, started_at],
        )?;
        Ok(())
    }

    pub fn finish_job_run(
        &self,
        run_id: &str,
        finished_at: i64,
        status: &str,
        summary: &BatchSummary,
        error: Option<&str>,
    ) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE job_run
             SET finished_at = ?1, status = ?2, processed = ?3, skipped = ?4, failed = ?5, error = ?6
             WHERE run_id = ?7",
            params![
                finished_at,
                status,
                summary.processed as i64,
                summary.skipped as i64,
                summary.failed as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn job_runs(&self, job: &str) -> LedgerResult<Vec<JobRunRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, job, started_at, finished_at, status, processed, skipped, failed, error
             FROM job_run WHERE job = ?1 ORDER BY started_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map(params![job], |row| {
                Ok(JobRunRow {
                    run_id: row.get(0)?,
                    job: row.get(1)?,
                    started_at: row.get(2)?,
                    finished_at: row.get(3)?,
                    status: row.get(4)?,
                    summary: BatchSummary {
                        processed: row.get::<_, i64>(5)? as usize,
                        skipped: row.get::<_, i64>(6)? as usize,
                        failed: row.get::<_, i64>(7)? as usize,
                    },
                    error: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, job, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.run_id,
                entry.job,
                entry.event_type,
                entry.payload,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> LedgerResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, job, event_type, payload, created_at
             FROM event_log WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], map_event_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn events_of_type(&self, event_type: &str) -> LedgerResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, job, event_type, payload, created_at
             FROM event_log WHERE event_type = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![event_type], map_event_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

fn map_event_row(row: &Row<'_>) -> rusqlite::Result<EventLogEntry> {
    Ok(EventLogEntry {
        id: Some(row.get(0)?),
        run_id: row.get(1)?,
        job: row.get(2)?,
        event_type: row.get(3)?,
        payload: row.get(4)?,
        created_at: row.get(5)?,
    })
}

// ── Column helpers ─────────────────────────────────────────────────

/// Read a decimal stored as TEXT.
pub(crate) fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Sum a single TEXT decimal column over the rows a query returns.
pub(crate) fn sum_decimal_query(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> LedgerResult<Decimal> {
    let mut stmt = conn.prepare(sql)?;
    let values = stmt
        .query_map(params, |row| decimal_col(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(crate::money::sum_money(values))
}

pub(crate) fn optional<T>(result: rusqlite::Result<T>) -> LedgerResult<Option<T>> {
    Ok(result.optional()?)
}

// ── Row types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct JobRunRow {
    pub run_id: String,
    pub job: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: String,
    pub summary: BatchSummary,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceRow {
    pub wallet: String,
    pub usdt_balance: Decimal,
    pub secondary_token_balance: Decimal,
    pub total_deposit: Decimal,
    pub total_withdraw: Decimal,
    pub manual_adjustment: Decimal,
    pub is_banned: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Active,
    Expired,
    Cancelled,
}

impl PositionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PositionStatus::Active    => "active",
            PositionStatus::Expired   => "expired",
            PositionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active"    => Ok(PositionStatus::Active),
            "expired"   => Ok(PositionStatus::Expired),
            "cancelled" => Ok(PositionStatus::Cancelled),
            other       => Err(format!("unknown position status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionRow {
    pub id: PositionId,
    pub wallet: String,
    pub product_id: String,
    pub price: Decimal,
    pub expected_return: Decimal,
    pub is_quantified: bool,
    pub status: PositionStatus,
    pub payout: Decimal,
    pub start_at: i64,
    pub end_at: i64,
    pub settled_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferralRewardRow {
    pub beneficiary: String,
    pub source_wallet: String,
    pub source_event_id: String,
    pub level: u8,
    pub base_amount: Decimal,
    pub rate: Decimal,
    pub amount: Decimal,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DividendType {
    Daily,
    Monthly,
}

impl DividendType {
    pub fn as_str(self) -> &'static str {
        match self {
            DividendType::Daily   => "daily",
            DividendType::Monthly => "monthly",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamDividendRow {
    pub wallet: String,
    pub dividend_type: String,
    pub period: String,
    pub level: u8,
    pub amount: Decimal,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerLevelRow {
    pub wallet: String,
    pub level: u8,
    pub direct_referrals: u32,
    pub qualified_referrals: u32,
    pub team_volume: Decimal,
    pub team_members: u32,
    /// Histogram of levels among direct referrals (level 0 excluded).
    pub subordinate_levels: BTreeMap<u8, u32>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepositRow {
    pub wallet: String,
    pub amount: Decimal,
    pub tx_hash: String,
    pub status: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub entry_id: String,
    pub wallet: String,
    pub kind: String,
    pub amount: Decimal,
    pub reference: Option<String>,
    pub created_at: i64,
}

/// Per-source totals that explain one wallet's balance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceBreakdown {
    pub deposits: Decimal,
    pub withdrawals: Decimal,
    pub purchases: Decimal,
    pub position_payouts: Decimal,
    pub referral_rewards: Decimal,
    pub team_dividends: Decimal,
    pub manual_adjustment: Decimal,
    pub promo_credits: Option<Decimal>,
    pub token_exchanges: Option<Decimal>,
}

impl SourceBreakdown {
    /// The canonical expected-balance formula.
    pub fn expected_balance(&self) -> Decimal {
        self.deposits - self.withdrawals - self.purchases
            + self.position_payouts
            + self.referral_rewards
            + self.team_dividends
            + self.manual_adjustment
            + self.promo_credits.unwrap_or_default()
            + self.token_exchanges.unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriftReportRow {
    pub wallet: String,
    pub actual: Decimal,
    pub expected: Decimal,
    pub difference: Decimal,
    pub breakdown: SourceBreakdown,
    pub action: String,
    pub created_at: i64,
}
