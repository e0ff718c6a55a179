//! Re-entry Bot
//!
//! Watches prices on a fixed cadence and re-enters after SL hunts, TP
//! continuations, and discretionary exits, with chained position sizing
//! and incremental profit booking.

mod broker;
mod chains;
mod config;
mod db;
mod models;
mod monitor;
mod trading;
mod triggers;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::broker::SimBroker;
use crate::config::BotConfig;
use crate::db::Database;
use crate::models::TradeSide;
use crate::monitor::{Collaborators, PriceMonitor};
use crate::trading::ProfitBookingSlCalculator;

/// Re-entry bot CLI.
#[derive(Parser)]
#[command(name = "reentrybot")]
#[command(about = "Price-triggered re-entry and profit-booking engine", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./reentrybot.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the monitoring loop against the simulated broker
    Run {
        /// Evaluation interval in seconds
        #[arg(short, long, default_value = "30")]
        interval: u64,

        /// Simulated account balance
        #[arg(short, long, default_value = "10000")]
        balance: f64,
    },

    /// Show current configuration
    Config,

    /// Show recorded TP-continuation re-entries
    Events {
        /// Maximum number of rows to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Check a profit-booking stop against the fixed-loss target
    ValidateSl {
        /// Trading symbol
        #[arg(short, long)]
        symbol: String,

        /// Entry price
        #[arg(short, long)]
        entry: f64,

        /// Stop-loss price to validate (defaults to the computed stop)
        #[arg(long)]
        sl: Option<f64>,

        /// Trade direction (buy or sell)
        #[arg(long, default_value = "buy")]
        side: String,

        /// Lot size
        #[arg(long, default_value = "0.1")]
        lot: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { interval, balance } => {
            let mut config = BotConfig::default();
            config.re_entry.monitor_interval_secs = interval;
            config.database_url = cli.database.clone();

            info!(
                interval = interval,
                simulate = config.simulate_orders,
                "Starting re-entry bot"
            );

            let db = Arc::new(Database::new(&cli.database).await?);

            let broker = Arc::new(SimBroker::new(Decimal::try_from(balance)?));
            let collab = Collaborators {
                prices: broker.clone(),
                executor: broker.clone(),
                notifier: broker.clone(),
                gate: broker.clone(),
            };

            let monitor = PriceMonitor::new(config, collab, db);
            monitor.start().await;

            println!("\n=== Re-entry Bot ===");
            println!("Interval: {}s", interval);
            println!("Mode: SIMULATED (no real orders)");
            println!("Database: {}", cli.database);
            println!("\nPress Ctrl+C to stop.\n");

            tokio::signal::ctrl_c().await?;
            println!("\nStopping...");
            monitor.stop().await;

            let status = monitor.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        Commands::Config => {
            let config = BotConfig::default();

            println!("\n=== Re-entry Configuration ===\n");
            println!("Monitoring:");
            println!("  Interval:             {}s", config.re_entry.monitor_interval_secs);
            println!("  SL Hunt:              {}", config.re_entry.sl_hunt_enabled);
            println!("  TP Continuation:      {}", config.re_entry.tp_reentry_enabled);
            println!("  Exit Continuation:    {}", config.re_entry.exit_continuation_enabled);

            println!("\nRe-entry Rules:");
            println!("  SL Hunt Offset:       {} pips", config.re_entry.sl_hunt_offset_pips);
            println!("  TP Gap:               {} pips", config.re_entry.tp_continuation_gap_pips);
            println!("  SL Reduction:         {:.0}%/level", config.re_entry.sl_reduction_per_level * 100.0);
            println!("  Max Chain Levels:     {}", config.re_entry.max_chain_levels);
            println!("  Chain Idle Timeout:   {}s", config.re_entry.chain_max_idle_secs);

            println!("\nProfit Booking:");
            println!("  Enabled:              {}", config.profit_booking.enabled);
            println!("  Per-Order Target:     ${}", config.profit_booking.per_order_target);
            println!("  Fixed SL Loss:        ${}", config.profit_booking.fixed_sl_loss);
            println!("  Stale Timeout:        {}s", config.profit_booking.stale_chain_secs);

            println!("\nRisk:");
            println!("  Risk Per Trade:       {}%", config.risk.risk_per_trade * dec!(100));
            println!("  R:R Ratio:            {}", config.risk.rr_ratio);
            println!("  Lot Tiers:            {}", config.risk.lot_tiers.len());

            println!("\nSymbols:");
            let mut symbols: Vec<_> = config.symbols.iter().collect();
            symbols.sort_by_key(|(name, _)| name.clone());
            for (name, sc) in symbols {
                println!(
                    "  {:<10} pip {:<8} ${}/lot",
                    name, sc.pip_size, sc.pip_value_per_std_lot
                );
            }
        }

        Commands::Events { limit } => {
            let db = Database::new(&cli.database).await?;
            let events = db.recent_tp_reentries(limit).await?;

            if events.is_empty() {
                println!("No TP re-entry events recorded.");
                return Ok(());
            }

            println!(
                "\n{:<5} {:<38} {:<8} {:>5} {:>12} {:>12} {:>8}",
                "ID", "CHAIN", "SYMBOL", "LVL", "PROFIT", "PRICE", "SL-RED"
            );
            println!("{}", "-".repeat(95));

            for event in events {
                println!(
                    "{:<5} {:<38} {:<8} {:>5} {:>11.2} {:>12.5} {:>7.1}%",
                    event.id,
                    event.chain_id,
                    event.symbol,
                    event.level,
                    event.chain_profit,
                    event.trigger_price,
                    event.sl_reduction_pct,
                );
            }
        }

        Commands::ValidateSl {
            symbol,
            entry,
            sl,
            side,
            lot,
        } => {
            let calc = ProfitBookingSlCalculator::new(BotConfig::default());

            let side = match side.to_lowercase().as_str() {
                "sell" => TradeSide::Sell,
                _ => TradeSide::Buy,
            };
            let entry = Decimal::try_from(entry)?;
            let lot = Decimal::try_from(lot)?;

            let (suggested, distance) = calc.calculate_sl_price(entry, side, &symbol, lot);
            let sl = match sl {
                Some(sl) => Decimal::try_from(sl)?,
                None => suggested,
            };
            let v = calc.validate_sl_loss(entry, sl, &symbol, lot);

            println!("\n=== Profit-Booking SL Check ===");
            println!("Symbol:        {}", symbol);
            println!("Side:          {}", side.as_str());
            println!("Entry:         {:.5}", entry);
            println!("Lot:           {:.2}", lot);
            println!("Suggested SL:  {:.5} (distance {:.5})", suggested, distance);
            println!("Checked SL:    {:.5}", sl);
            println!("Actual Loss:   ${:.2}", v.actual_loss);
            println!("Expected:      ${:.2} (tolerance ${:.2})", v.expected_loss, v.tolerance);
            println!("Difference:    ${:.2}", v.difference);
            println!("Valid:         {}", if v.valid { "Yes" } else { "No" });
        }
    }

    Ok(())
}
