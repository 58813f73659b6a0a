//! Job trait.
//!
//! RULE: Every periodic task implements LedgerJob.
//! The engine calls run() on each registered job in registration order,
//! once per cycle. Execution order is fixed and documented in engine.rs.
//! Jobs never call each other; they coordinate only through the store.

use crate::{error::LedgerResult, event::LedgerEvent, store::BatchSummary};
use chrono::{DateTime, Utc};
use std::any::Any;

/// What one job run did.
#[derive(Debug, Clone, Default)]
pub struct JobReport {
    pub summary: BatchSummary,
    pub events: Vec<LedgerEvent>,
}

impl JobReport {
    /// Fold another pass of the same job into this report.
    pub fn merge(&mut self, other: JobReport) {
        self.summary.processed += other.summary.processed;
        self.summary.skipped += other.summary.skipped;
        self.summary.failed += other.summary.failed;
        self.events.extend(other.events);
    }

    /// Count a per-item failure and keep it in the event trail.
    pub fn item_failed(&mut self, item: String, error: &dyn std::fmt::Display) {
        self.summary.failed += 1;
        self.events.push(LedgerEvent::ItemFailed {
            item,
            error: error.to_string(),
        });
    }
}

/// The contract every periodic job must fulfill.
pub trait LedgerJob: Send {
    /// Unique stable name, used for `job_run.job` and log prefixes.
    fn name(&self) -> &'static str;

    /// Process one batch as of `now`.
    ///
    /// Per-item failures are caught inside and counted in the report.
    /// An `Err` means the batch could not start (store unreachable) and
    /// nothing was written.
    fn run(&mut self, now: DateTime<Utc>) -> LedgerResult<JobReport>;

    /// For downcasting in tests and tooling only.
    fn as_any(&self) -> &dyn Any;
}
