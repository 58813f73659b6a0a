//! Reward ledger and reconciliation engine for the robot investment
//! platform: position maturity, multi-level referral rewards, broker levels
//! with team dividends, and balance reconciliation.

pub mod broker_level_job;
pub mod clock;
pub mod config;
pub mod dividend_job;
pub mod engine;
pub mod error;
pub mod event;
pub mod funding;
pub mod job;
pub mod lifecycle_job;
pub mod money;
pub mod positions;
pub mod reconciliation_job;
pub mod referral_graph;
pub mod referral_rewards;
pub mod store;
pub mod types;
