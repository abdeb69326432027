//! LP Position Tracker
//!
//! Usage:
//!   lp-tracker sync [--position ID]     full cycle: value, reconcile fees, metrics
//!   lp-tracker report [--position ID]   offline report from the data directory
//!   lp-tracker fees ID                  reconcile the fee ledger only
//!
//! Global flags: `--config PATH` (default `config/tracker.toml`), `--json`.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use lp_tracker::chain::connect_http;
use lp_tracker::oracle::CoinGeckoOracle;
use lp_tracker::{report_from_store, JsonFileStore, PositionConfig, SyncEngine, SyncReport, TrackerConfig};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "lp-tracker", about = "Concentrated-liquidity position tracker")]
struct Args {
    /// Path to the TOML config
    #[arg(short, long, env = "LP_TRACKER_CONFIG", default_value = "config/tracker.toml", global = true)]
    config: String,

    /// JSON log lines and JSON report output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Value positions, reconcile fees and compute metrics
    Sync {
        #[arg(short, long)]
        position: Option<u64>,
    },
    /// Report from persisted state without touching the chain
    Report {
        #[arg(short, long)]
        position: Option<u64>,
    },
    /// Reconcile the collected-fee ledger of one position
    Fees { id: u64 },
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    if json {
        fmt().json().with_env_filter(filter).init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }
}

fn select(config: &TrackerConfig, id: Option<u64>) -> Result<Vec<PositionConfig>> {
    match id {
        Some(id) => {
            let position = config
                .position(id)
                .cloned()
                // ad-hoc positions (not in the config) run without a baseline
                .unwrap_or_else(|| PositionConfig::ad_hoc(id));
            Ok(vec![position])
        }
        None if config.positions.is_empty() => {
            anyhow::bail!("no [[position]] entries in config and no --position given")
        }
        None => Ok(config.positions.clone()),
    }
}

fn print_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report).context("Failed to serialize report")?);
        return Ok(());
    }
    let m = &report.metrics;
    println!("{} (#{}) {}", report.label, report.position.position_id, report.position.pair_symbol());
    println!("  status:        {:?}", report.valuation.status);
    println!("  in range:      {}", report.valuation.in_range);
    if let Some(range) = &report.valuation.range {
        println!("  range:         {:.2} - {:.2} (current {:.2})", range.lower, range.upper, range.current);
    }
    println!("  value:         ${:.2}", m.current_value_usd);
    println!("  fees:          ${:.2} (collected ${:.2}, pending ${:.2})",
        m.total_fees_usd, m.collected_value_usd, m.pending_value_usd);
    if m.baseline_missing {
        println!("  baseline:      not configured");
    } else if m.valuation_unpriced {
        println!("  PnL/APR:       not computed (no usable price)");
    } else {
        println!("  net PnL:       ${:.2} ({:.2}%)", m.net_pnl, m.roi_percent);
        println!("  fee APR:       {:.2}%", m.fee_apr);
        println!("  total APR:     {:.2}%", m.total_apr);
        println!("  IL:            {:.2}% (${:.2} vs HODL ${:.2})", m.il_percent, m.il_usd, m.hodl_value_usd);
        println!("  LP vs HODL:    ${:.2}", m.lp_vs_hodl_usd);
        println!("  days active:   {:.2}", m.days_active);
        println!("  fees/day:      ${:.4} | /month ${:.2} | /year ${:.2}",
            m.projections.daily, m.projections.monthly, m.projections.yearly);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config = TrackerConfig::load(&args.config)?;
    init_tracing(&config.general.log_level, args.json);

    info!("===========================================");
    info!("   LP Position Tracker");
    info!("===========================================");
    info!("Config: {}", args.config);
    info!("Data dir: {}", config.general.data_dir.display());
    info!("Price source: {:?}", config.general.price_source);

    let store = Arc::new(JsonFileStore::new(&config.general.data_dir).with_lock_ttl(config.lock_ttl()));

    match args.command {
        Command::Report { position } => {
            let stables = config.stable_set();
            for cfg in select(&config, position)? {
                match report_from_store(store.as_ref(), &cfg, &stables, Utc::now())
                    .with_context(|| format!("Failed to build report for {}", cfg.display_name()))?
                {
                    Some(report) => print_report(&report, args.json)?,
                    None => warn!("{}: never synced, run `lp-tracker sync` first", cfg.display_name()),
                }
            }
        }
        Command::Sync { position } => {
            let chain = Arc::new(connect_http(&config.general.rpc_url, config.rpc_timeout())?);
            let oracle = Arc::new(CoinGeckoOracle::new(config.rpc_timeout())?);
            let mut engine = SyncEngine::new(chain, store, &config).with_oracle(oracle);

            let positions = select(&config, position)?;
            let results = engine.sync_all(&positions).await;
            let failed = results.iter().filter(|(_, r)| r.is_err()).count();
            for (_, result) in &results {
                if let Ok(report) = result {
                    print_report(report, args.json)?;
                }
            }
            info!("Synced {}/{} positions", results.len() - failed, results.len());
            if failed > 0 {
                error!("{} position(s) failed", failed);
                anyhow::bail!("{} of {} positions failed to sync", failed, results.len());
            }
        }
        Command::Fees { id } => {
            let chain = Arc::new(connect_http(&config.general.rpc_url, config.rpc_timeout())?);
            let mut engine = SyncEngine::new(chain, store, &config);
            let cfg = config.position(id).cloned().unwrap_or_else(|| PositionConfig::ad_hoc(id));

            let report = engine
                .sync_fees(&cfg)
                .await
                .with_context(|| format!("Fee reconciliation failed for position {}", id))?;
            let ledger = &report.ledger;
            info!(
                "Position {}: {} events | collected {} / {} | scanned to {:?}",
                id,
                ledger.events_count,
                ledger.total_collected0,
                ledger.total_collected1,
                ledger.last_scanned_block
            );
            if args.json {
                println!("{}", serde_json::to_string(&report.ledger).context("Failed to serialize ledger")?);
            }
            if report.outcome.is_partial() {
                warn!("Ledger partially reconciled: {:?}", report.outcome);
            }
        }
    }

    Ok(())
}
