//! The ledger engine — runs the periodic jobs.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Lifecycle         (matures positions, triggers referral rewards)
//!   2. Broker levels     (recomputes the level cache)
//!   3. Dividends         (pays the levels computed in step 2)
//!   4. Reconciliation    (report-only, only if audit_every_cycle)
//!
//! RULES:
//!   - Jobs execute in registration order, once per cycle.
//!   - Each job owns its own store handle; jobs share nothing in memory.
//!   - Every job run gets a job_run row; every event it returns is
//!     appended to event_log.
//!   - A job that cannot start its batch is recorded as failed and the
//!     remaining jobs still run.

use crate::{
    broker_level_job::BrokerLevelJob,
    clock::{to_unix, Clock, ManualClock, SystemClock},
    config::LedgerConfig,
    dividend_job::DividendJob,
    error::LedgerResult,
    event::EventLogEntry,
    job::LedgerJob,
    lifecycle_job::LifecycleJob,
    reconciliation_job::ReconciliationAuditor,
    store::{BatchSummary, LedgerStore},
    types::RunId,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// Result of one job within a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job: String,
    pub run_id: RunId,
    pub status: String,
    pub summary: BatchSummary,
    pub events: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub at: DateTime<Utc>,
    pub jobs: Vec<JobOutcome>,
}

impl CycleReport {
    pub fn job(&self, name: &str) -> Option<&JobOutcome> {
        self.jobs.iter().find(|j| j.job == name)
    }
}

pub struct LedgerEngine {
    pub store: LedgerStore,
    clock: Box<dyn Clock>,
    jobs: Vec<Box<dyn LedgerJob>>,
}

impl LedgerEngine {
    pub fn new(store: LedgerStore, clock: Box<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            jobs: Vec::new(),
        }
    }

    /// Build a fully wired engine with all jobs registered.
    /// Each job gets its own connection via `store.reopen()`, so `store`
    /// must be a file or a shared-memory database.
    pub fn build(config: &LedgerConfig, store: LedgerStore, clock: Box<dyn Clock>) -> LedgerResult<Self> {
        store.migrate()?;
        let mut engine = LedgerEngine::new(store, clock);

        // EXECUTION ORDER. Fixed; do not reorder.
        let lifecycle = LifecycleJob::new(config.clone(), engine.store.reopen()?);
        engine.register(Box::new(lifecycle));
        let brokers = BrokerLevelJob::new(config.clone(), engine.store.reopen()?);
        engine.register(Box::new(brokers));
        let dividends = DividendJob::new(config.clone(), engine.store.reopen()?);
        engine.register(Box::new(dividends));
        if config.reconciliation.audit_every_cycle {
            let auditor =
                ReconciliationAuditor::new(config.reconciliation.clone(), engine.store.reopen()?);
            engine.register(Box::new(auditor));
        }
        Ok(engine)
    }

    /// Engine over a named shared-memory store with the test config and a
    /// manual clock parked at 2024-01-01T12:00:00Z.
    pub fn build_test(name: &str) -> LedgerResult<Self> {
        let store = LedgerStore::shared_memory(name)?;
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
            .single()
            .unwrap_or_default();
        Self::build(
            &LedgerConfig::default_test(),
            store,
            Box::new(ManualClock::new(start)),
        )
    }

    /// Production engine on the system clock.
    pub fn build_default(config: &LedgerConfig, store: LedgerStore) -> LedgerResult<Self> {
        Self::build(config, store, Box::new(SystemClock))
    }

    /// Register a job. Call in the documented execution order.
    pub fn register(&mut self, job: Box<dyn LedgerJob>) {
        self.jobs.push(job);
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// One cycle at the engine clock's current time.
    pub fn run_cycle(&mut self) -> LedgerResult<CycleReport> {
        let now = self.clock.now();
        self.run_cycle_at(now)
    }

    /// One cycle as of `now`. Only a failure to write the job bookkeeping
    /// itself escapes as `Err`.
    pub fn run_cycle_at(&mut self, now: DateTime<Utc>) -> LedgerResult<CycleReport> {
        let started_at = to_unix(now);
        let mut outcomes = Vec::with_capacity(self.jobs.len());

        for job in &mut self.jobs {
            let name = job.name();
            let run_id = uuid::Uuid::new_v4().to_string();
            self.store.insert_job_run(&run_id, name, started_at)?;

            let outcome = match job.run(now) {
                Ok(report) => {
                    for event in &report.events {
                        let entry = EventLogEntry {
                            id: None,
                            run_id: run_id.clone(),
                            job: name.to_string(),
                            event_type: event.type_name().to_string(),
                            payload: serde_json::to_string(event)?,
                            created_at: started_at,
                        };
                        self.store.append_event(&entry)?;
                    }
                    self.store
                        .finish_job_run(&run_id, to_unix(now), "completed", &report.summary, None)?;
                    JobOutcome {
                        job: name.to_string(),
                        run_id,
                        status: "completed".into(),
                        summary: report.summary,
                        events: report.events.len(),
                        error: None,
                    }
                }
                Err(e) => {
                    log::error!("engine: job {name} could not run its batch: {e}");
                    let message = e.to_string();
                    self.store.finish_job_run(
                        &run_id,
                        to_unix(now),
                        "failed",
                        &BatchSummary::default(),
                        Some(&message),
                    )?;
                    JobOutcome {
                        job: name.to_string(),
                        run_id,
                        status: "failed".into(),
                        summary: BatchSummary::default(),
                        events: 0,
                        error: Some(message),
                    }
                }
            };
            outcomes.push(outcome);
        }

        Ok(CycleReport { at: now, jobs: outcomes })
    }

    /// Downcast a registered job. For tests and tooling only.
    pub fn job<T: 'static>(&self) -> Option<&T> {
        self.jobs.iter().find_map(|j| j.as_any().downcast_ref::<T>())
    }
}
