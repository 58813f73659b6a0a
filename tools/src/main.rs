//! ledger-runner: headless runner for the reward ledger.
//!
//! Usage:
//!   ledger-runner --db ledger.db --data-dir ./data --cycles 1
//!   ledger-runner --db ledger.db --at 2024-03-01T00:30:00Z
//!   ledger-runner --db ledger.db --audit [--repair] [--wallet 0x...]
//!   ledger-runner --db ledger.db --ipc-mode     (JSON commands on stdin)
//!
//! Every report is printed as one JSON line.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use robot_ledger_core::{
    clock::{to_unix, ManualClock},
    config::{LedgerConfig, MaturityPolicy},
    engine::LedgerEngine,
    funding::FundingDesk,
    positions::PositionDesk,
    reconciliation_job::{AuditMode, ReconciliationAuditor},
    referral_rewards::ReferralRewardDistributor,
    store::{LedgerStore, PositionStatus},
    types::{PositionId, WalletAddress},
};
use rust_decimal::Decimal;
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Deposit {
        wallet: String,
        amount: Decimal,
        tx_hash: String,
        #[serde(default = "completed")]
        status: String,
    },
    Withdrawal {
        wallet: String,
        amount: Decimal,
        tx_hash: String,
        #[serde(default = "completed")]
        status: String,
    },
    Adjust { wallet: String, amount: Decimal, reason: String, operator: String },
    Bind { member: String, referrer: String },
    Ban { wallet: String, banned: bool },
    Purchase { wallet: String, product_id: String, price: Decimal },
    Quantify { position_id: PositionId },
    Cancel { position_id: PositionId },
    BatchCancel { position_ids: Vec<PositionId> },
    Reactivate { position_id: PositionId },
    Redistribute { position_id: PositionId },
    Balance { wallet: String },
    Cycle {
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Audit {
        #[serde(default)]
        repair: bool,
        #[serde(default)]
        wallet: Option<String>,
    },
    Quit,
}

fn completed() -> String {
    "completed".into()
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let cycles = parse_arg(&args, "--cycles", 1u32);
    let audit = args.iter().any(|a| a == "--audit");
    let repair = args.iter().any(|a| a == "--repair");
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");
    let wallet = flag_value(&args, "--wallet");
    let at = flag_value(&args, "--at")
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| anyhow!("--at {raw}: {e}"))
        })
        .transpose()?;

    // For :memory: use a shared-memory URI so the engine and every job
    // connection see the same database.
    let db_effective = if db == ":memory:" {
        format!("file:ledger_{}?mode=memory&cache=shared", unix_now())
    } else {
        db.to_string()
    };

    let config = LedgerConfig::load(data_dir)?;
    let store = LedgerStore::open(&db_effective)?;
    store.migrate()?;

    if audit {
        let mode = if repair { AuditMode::Repair } else { AuditMode::ReportOnly };
        let now = at.unwrap_or_else(Utc::now);
        return run_audit(&config, &store, mode, wallet, to_unix(now));
    }

    let mut engine = match at {
        Some(start) => LedgerEngine::build(&config, store, Box::new(ManualClock::new(start)))?,
        None => LedgerEngine::build_default(&config, store)?,
    };

    if ipc_mode {
        return run_ipc_loop(&config, &mut engine);
    }

    for i in 0..cycles {
        // With a fixed start, consecutive cycles are one hour apart.
        let report = match at {
            Some(start) => engine.run_cycle_at(start + Duration::hours(i64::from(i)))?,
            None => engine.run_cycle()?,
        };
        println!("{}", serde_json::to_string(&report)?);
    }
    Ok(())
}

fn run_audit(
    config: &LedgerConfig,
    store: &LedgerStore,
    mode: AuditMode,
    wallet: Option<&str>,
    now: i64,
) -> Result<()> {
    let auditor = ReconciliationAuditor::new(config.reconciliation.clone(), store.reopen()?);
    match wallet {
        Some(raw) => {
            let wallet = WalletAddress::parse(raw)?;
            match auditor.audit_wallet(wallet.as_str(), mode, now)? {
                Some(report) => println!("{}", serde_json::to_string(&report)?),
                None => println!("{}", serde_json::json!({ "wallet": wallet, "drift": false })),
            }
        }
        None => {
            let outcome = auditor.audit_all(mode, now)?;
            for report in &outcome.reports {
                println!("{}", serde_json::to_string(report)?);
            }
            println!("{}", serde_json::to_string(&outcome.report.summary)?);
        }
    }
    Ok(())
}

fn run_ipc_loop(config: &LedgerConfig, engine: &mut LedgerEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let reply = match handle_command(config, engine, cmd) {
            Ok(value) => value,
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(
    config: &LedgerConfig,
    engine: &mut LedgerEngine,
    cmd: IpcCommand,
) -> Result<serde_json::Value> {
    if let IpcCommand::Cycle { at } = cmd {
        let report = match at {
            Some(at) => engine.run_cycle_at(at)?,
            None => engine.run_cycle()?,
        };
        return Ok(serde_json::to_value(&report)?);
    }

    let now = to_unix(engine.now());
    let store = &engine.store;
    let funding = FundingDesk::new(store);
    let positions = PositionDesk::new(config, store);

    let reply = match cmd {
        IpcCommand::Deposit { wallet, amount, tx_hash, status } => {
            serde_json::json!({ "applied": funding.apply_deposit(&wallet, amount, &tx_hash, &status, now)? })
        }
        IpcCommand::Withdrawal { wallet, amount, tx_hash, status } => {
            serde_json::json!({ "applied": funding.apply_withdrawal(&wallet, amount, &tx_hash, &status, now)? })
        }
        IpcCommand::Adjust { wallet, amount, reason, operator } => {
            let balance = funding.apply_manual_adjustment(&wallet, amount, &reason, &operator, now)?;
            serde_json::json!({ "usdt_balance": balance })
        }
        IpcCommand::Bind { member, referrer } => {
            funding.bind_referrer(&member, &referrer, now)?;
            serde_json::json!({ "ok": true })
        }
        IpcCommand::Ban { wallet, banned } => {
            funding.set_banned(&wallet, banned, now)?;
            serde_json::json!({ "ok": true })
        }
        IpcCommand::Purchase { wallet, product_id, price } => {
            serde_json::json!({ "position_id": positions.purchase(&wallet, &product_id, price, now)? })
        }
        IpcCommand::Quantify { position_id } => {
            positions.quantify(position_id)?;
            serde_json::json!({ "ok": true })
        }
        IpcCommand::Cancel { position_id } => {
            positions.cancel(position_id)?;
            serde_json::json!({ "ok": true })
        }
        IpcCommand::BatchCancel { position_ids } => {
            let results: Vec<_> = positions
                .batch_cancel(&position_ids)
                .into_iter()
                .map(|(id, r)| match r {
                    Ok(()) => serde_json::json!({ "position_id": id, "ok": true }),
                    Err(e) => serde_json::json!({ "position_id": id, "error": e.to_string() }),
                })
                .collect();
            serde_json::json!({ "results": results })
        }
        IpcCommand::Reactivate { position_id } => {
            positions.reactivate(position_id)?;
            serde_json::json!({ "ok": true })
        }
        IpcCommand::Redistribute { position_id } => redistribute(config, store, position_id, now)?,
        IpcCommand::Balance { wallet } => {
            let wallet = WalletAddress::parse(&wallet)?;
            serde_json::json!({ "wallet": wallet, "usdt_balance": store.usdt_balance(wallet.as_str())? })
        }
        IpcCommand::Audit { repair, wallet } => {
            let mode = if repair { AuditMode::Repair } else { AuditMode::ReportOnly };
            let auditor = ReconciliationAuditor::new(config.reconciliation.clone(), store.reopen()?);
            match wallet {
                Some(raw) => {
                    let wallet = WalletAddress::parse(&raw)?;
                    serde_json::to_value(auditor.audit_wallet(wallet.as_str(), mode, now)?)?
                }
                None => serde_json::to_value(auditor.audit_all(mode, now)?.reports)?,
            }
        }
        IpcCommand::Cycle { .. } | IpcCommand::Quit => serde_json::Value::Null,
    };
    Ok(reply)
}

/// Re-run the referral rewards of a matured high-yield position. Levels
/// already paid are skipped by the reward key, so this only fills gaps.
fn redistribute(
    config: &LedgerConfig,
    store: &LedgerStore,
    position_id: PositionId,
    now: i64,
) -> Result<serde_json::Value> {
    let position = store
        .position(position_id)?
        .ok_or_else(|| anyhow!("position {position_id} not found"))?;
    let product = config.product(&position.product_id)?;
    let profit = position.payout - position.price;
    if position.status != PositionStatus::Expired
        || product.policy != MaturityPolicy::HighYield
        || profit <= Decimal::ZERO
    {
        return Ok(serde_json::json!({ "paid": 0 }));
    }
    let distribution = ReferralRewardDistributor::new(&config.referral, store).distribute(
        &position.wallet,
        &format!("position:{position_id}"),
        profit,
        now,
    )?;
    Ok(serde_json::json!({
        "paid": distribution.paid.len(),
        "already_paid": distribution.already_paid,
        "failed": distribution.failures.len(),
        "total": distribution.total_paid(),
    }))
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
