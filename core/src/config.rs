use crate::error::{LedgerError, LedgerResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of upline levels paid on a qualifying event.
pub const REFERRAL_LEVELS: usize = 8;

/// Default depth bound of downline aggregation.
pub const TEAM_DEPTH_LIMIT: usize = 8;

fn default_team_depth() -> usize {
    TEAM_DEPTH_LIMIT
}

// ── Products ──────────────────────────────────────────────────────

/// What a position refunds when it matures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MaturityPolicy {
    /// Principal + profit, only when the position was quantified.
    HighYield,
    /// Principal only, regardless of quantification.
    ReturnPrincipal,
    /// Nothing is refunded at maturity.
    NoRefund,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductConfig {
    pub product_id: String,
    pub label: String,
    pub policy: MaturityPolicy,
    pub duration_days: i64,
    pub daily_rate: Decimal,
    pub min_price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
struct ProductCatalogFile {
    products: Vec<ProductConfig>,
}

// ── Referral rewards ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralRewardConfig {
    /// One rate per upline level, level 1 first.
    pub rates: Vec<Decimal>,
    /// Upper bound on the sum of all rates.
    pub total_cap: Decimal,
}

impl ReferralRewardConfig {
    pub fn rate_for(&self, level: usize) -> Option<Decimal> {
        level.checked_sub(1).and_then(|i| self.rates.get(i)).copied()
    }

    pub fn total_rate(&self) -> Decimal {
        self.rates.iter().copied().sum()
    }
}

// ── Broker levels ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerLevelConfig {
    pub level: u8,
    pub min_direct_referrals: u32,
    /// A direct referral only counts once its own investment reaches this.
    pub min_referral_investment: Decimal,
    pub min_subordinate_brokers: u32,
    pub min_team_volume: Decimal,
    pub min_team_members: u32,
    pub daily_dividend: Decimal,
    pub monthly_dividend: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub levels: Vec<BrokerLevelConfig>,
    /// Downline levels below this depth contribute nothing.
    #[serde(default = "default_team_depth")]
    pub team_depth: usize,
}

impl BrokerConfig {
    pub fn level(&self, level: u8) -> Option<&BrokerLevelConfig> {
        self.levels.iter().find(|l| l.level == level)
    }

    pub fn max_level(&self) -> u8 {
        self.levels.iter().map(|l| l.level).max().unwrap_or(0)
    }
}

// ── Reconciliation ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    pub epsilon: Decimal,
    #[serde(default)]
    pub include_promo_credits: bool,
    #[serde(default)]
    pub include_token_exchanges: bool,
    /// Run a report-only audit of every wallet on each engine cycle.
    #[serde(default)]
    pub audit_every_cycle: bool,
}

// ── Schedule ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Daily dividends are paid on the first cycle at or after this UTC hour.
    pub daily_dividend_hour: u32,
    /// Monthly dividends are paid on this day of the month.
    pub monthly_dividend_day: u32,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub products: HashMap<String, ProductConfig>,
    pub referral: ReferralRewardConfig,
    pub broker: BrokerConfig,
    pub reconciliation: ReconciliationConfig,
    pub schedule: ScheduleConfig,
}

impl LedgerConfig {
    /// Load from the data/ directory.
    /// In tests, use LedgerConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let product_path = format!("{data_dir}/products/product_catalog.json");
        let product_content = std::fs::read_to_string(&product_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {product_path}: {e}"))?;
        let product_file: ProductCatalogFile = serde_json::from_str(&product_content)?;
        let products = product_file
            .products
            .into_iter()
            .map(|p| (p.product_id.clone(), p))
            .collect();

        let referral_path = format!("{data_dir}/referral/reward_rates.json");
        let referral_content = std::fs::read_to_string(&referral_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {referral_path}: {e}"))?;
        let referral: ReferralRewardConfig = serde_json::from_str(&referral_content)?;

        let broker_path = format!("{data_dir}/broker/broker_levels.json");
        let broker_content = std::fs::read_to_string(&broker_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {broker_path}: {e}"))?;
        let broker: BrokerConfig = serde_json::from_str(&broker_content)?;

        let recon_path = format!("{data_dir}/reconciliation/reconciliation_config.json");
        let recon_content = std::fs::read_to_string(&recon_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {recon_path}: {e}"))?;
        let reconciliation: ReconciliationConfig = serde_json::from_str(&recon_content)?;

        let schedule_path = format!("{data_dir}/schedule/schedule_config.json");
        let schedule_content = std::fs::read_to_string(&schedule_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {schedule_path}: {e}"))?;
        let schedule: ScheduleConfig = serde_json::from_str(&schedule_content)?;

        let config = Self {
            products,
            referral,
            broker,
            reconciliation,
            schedule,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject tables that would break the payout invariants.
    pub fn validate(&self) -> LedgerResult<()> {
        let r = &self.referral;
        if r.rates.len() != REFERRAL_LEVELS {
            return Err(LedgerError::Config(format!(
                "expected {REFERRAL_LEVELS} referral rates, found {}",
                r.rates.len()
            )));
        }
        if r.rates.iter().any(|rate| rate.is_sign_negative()) {
            return Err(LedgerError::Config("referral rates must be non-negative".into()));
        }
        if r.total_cap > Decimal::ONE || r.total_cap.is_sign_negative() {
            return Err(LedgerError::Config(format!(
                "referral cap {} outside [0, 1]",
                r.total_cap
            )));
        }
        if r.total_rate() > r.total_cap {
            return Err(LedgerError::Config(format!(
                "referral rates sum to {}, above cap {}",
                r.total_rate(),
                r.total_cap
            )));
        }

        for (i, level) in self.broker.levels.iter().enumerate() {
            if usize::from(level.level) != i + 1 {
                return Err(LedgerError::Config(format!(
                    "broker levels must ascend from 1 without gaps (position {i} holds level {})",
                    level.level
                )));
            }
        }

        if self.broker.team_depth == 0 {
            return Err(LedgerError::Config("broker team_depth must be at least 1".into()));
        }

        for product in self.products.values() {
            if product.duration_days <= 0 {
                return Err(LedgerError::Config(format!(
                    "product {} has non-positive duration",
                    product.product_id
                )));
            }
        }

        if self.schedule.daily_dividend_hour > 23 || !(1..=28).contains(&self.schedule.monthly_dividend_day) {
            return Err(LedgerError::Config("schedule hour/day out of range".into()));
        }
        Ok(())
    }

    pub fn product(&self, product_id: &str) -> LedgerResult<&ProductConfig> {
        self.products
            .get(product_id)
            .ok_or_else(|| LedgerError::UnknownProduct {
                product_id: product_id.to_string(),
            })
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        let products = [
            ProductConfig {
                product_id: "quantum_high".into(),
                label: "Quantum High-Yield Robot".into(),
                policy: MaturityPolicy::HighYield,
                duration_days: 1,
                daily_rate: Decimal::new(10, 2),
                min_price: Decimal::new(10, 0),
            },
            ProductConfig {
                product_id: "steady_30".into(),
                label: "Steady 30-Day Robot".into(),
                policy: MaturityPolicy::ReturnPrincipal,
                duration_days: 30,
                daily_rate: Decimal::new(8, 3),
                min_price: Decimal::new(100, 0),
            },
            ProductConfig {
                product_id: "flash_7".into(),
                label: "Flash 7-Day Robot".into(),
                policy: MaturityPolicy::NoRefund,
                duration_days: 7,
                daily_rate: Decimal::new(20, 3),
                min_price: Decimal::new(50, 0),
            },
        ]
        .into_iter()
        .map(|p| (p.product_id.clone(), p))
        .collect();

        // 15% / 10% / 5% / 5% / 3% / 3% / 2% / 2% = 45%
        let referral = ReferralRewardConfig {
            rates: [15, 10, 5, 5, 3, 3, 2, 2]
                .into_iter()
                .map(|pct| Decimal::new(pct, 2))
                .collect(),
            total_cap: Decimal::new(50, 2),
        };

        let broker = BrokerConfig {
            levels: vec![
                BrokerLevelConfig {
                    level: 1,
                    min_direct_referrals: 3,
                    min_referral_investment: Decimal::new(100, 0),
                    min_subordinate_brokers: 0,
                    min_team_volume: Decimal::new(100, 0),
                    min_team_members: 3,
                    daily_dividend: Decimal::new(5, 0),
                    monthly_dividend: Decimal::new(100, 0),
                },
                BrokerLevelConfig {
                    level: 2,
                    min_direct_referrals: 5,
                    min_referral_investment: Decimal::new(100, 0),
                    min_subordinate_brokers: 2,
                    min_team_volume: Decimal::new(5_000, 0),
                    min_team_members: 15,
                    daily_dividend: Decimal::new(15, 0),
                    monthly_dividend: Decimal::new(400, 0),
                },
                BrokerLevelConfig {
                    level: 3,
                    min_direct_referrals: 8,
                    min_referral_investment: Decimal::new(200, 0),
                    min_subordinate_brokers: 3,
                    min_team_volume: Decimal::new(30_000, 0),
                    min_team_members: 50,
                    daily_dividend: Decimal::new(40, 0),
                    monthly_dividend: Decimal::new(1_200, 0),
                },
            ],
            team_depth: TEAM_DEPTH_LIMIT,
        };

        Self {
            products,
            referral,
            broker,
            reconciliation: ReconciliationConfig {
                epsilon: crate::money::DRIFT_EPSILON_DEFAULT,
                include_promo_credits: true,
                include_token_exchanges: false,
                audit_every_cycle: false,
            },
            schedule: ScheduleConfig {
                daily_dividend_hour: 0,
                monthly_dividend_day: 1,
            },
        }
    }
}
