//! Wall-clock source for the scheduler.
//!
//! Jobs never read the system time themselves; the engine passes `now`
//! into every run so tests can replay any instant.

use chrono::{DateTime, Datelike, TimeZone, Utc};

pub trait Clock: Send {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone, Copy)]
pub struct ManualClock {
    now: DateTime<Utc>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

pub fn to_unix(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

pub fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

/// Period key of a daily dividend (`YYYY-MM-DD`).
pub fn day_key(at: DateTime<Utc>) -> String {
    at.date_naive().format("%Y-%m-%d").to_string()
}

/// Period key of a monthly dividend: the first day of the month.
pub fn month_key(at: DateTime<Utc>) -> String {
    let d = at.date_naive();
    d.with_day(1).unwrap_or(d).format("%Y-%m-%d").to_string()
}
