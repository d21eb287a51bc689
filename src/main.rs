//! Multi-Symbol Futures Trading Bot
//!
//! Trades EMA-oscillator crossovers on USDT-margined perpetuals with a
//! shared capital pool, soft stop-losses, and persisted performance metrics.

mod backtest;
mod db;
mod exchange;
mod history;
mod metrics;
mod models;
mod notify;
mod signal;
mod trader;
mod trading;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::backtest::Backtester;
use crate::db::Store;
use crate::exchange::{retry_with_timeout, ExchangeGateway, RestGateway, RetryPolicy};
use crate::notify::Notifier;
use crate::trader::{Bot, TradeOutcome, Trader};
use crate::trading::{shared_pool, TradingConfig};

/// Futures trading bot CLI.
#[derive(Parser)]
#[command(name = "macdbot")]
#[command(about = "Multi-symbol crossover trading bot with shared margin", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./macdbot.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate the strategy over recent exchange history
    Backtest {
        /// Restrict the run to one symbol
        #[arg(short, long)]
        symbol: Option<String>,

        /// Candles fetched per symbol
        #[arg(long)]
        limit: Option<u32>,

        /// Write the simulated trades to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Write the simulated trades to this JSON file
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Start the live trading loop
    Run {
        /// Polling interval in seconds
        #[arg(short, long, default_value = "60")]
        interval: u64,
    },

    /// Evaluate a single symbol once and exit
    RunSymbol {
        /// Unified symbol, e.g. IP/USDT:USDT
        symbol: String,
    },

    /// Show the active configuration
    Config,

    /// Recompute and show performance metrics from stored trades
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

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

    let config = TradingConfig::default();

    match cli.command {
        Commands::Backtest {
            symbol,
            limit,
            csv,
            json,
        } => {
            let mut config = config;
            if let Some(symbol) = &symbol {
                anyhow::ensure!(
                    config.symbol(symbol).is_some(),
                    "unknown symbol: {}",
                    symbol
                );
                config.symbols.retain(|s| &s.symbol == symbol);
            }
            let limit = limit.unwrap_or(config.history_limit);

            info!(symbols = config.symbols.len(), limit, "fetching history");
            let gateway = RestGateway::from_env()?;
            let retry = RetryPolicy::default();

            let mut data = HashMap::new();
            for sym in &config.symbols {
                let candles = retry_with_timeout("fetch_candles", &retry, || {
                    gateway.fetch_candles(&sym.symbol, &config.timeframe, limit)
                })
                .await?;
                info!(symbol = %sym.symbol, candles = candles.len(), "history loaded");
                data.insert(sym.symbol.clone(), candles);
            }

            let report = Backtester::new(config).run(&data)?;
            println!("\n{}", report);

            if let Some(path) = csv {
                report.export_csv(&path)?;
                println!("\nTrades written to {}", path.display());
            }
            if let Some(path) = json {
                report.export_json(&path)?;
                println!("Trades written to {}", path.display());
            }
        }

        Commands::Run { interval } => {
            let trader = build_trader(&cli.database, config.clone()).await?;

            println!("\n=== Live Trading ===");
            println!("Symbols:          {}", config.symbols.len());
            println!("Start capital:    {} USDT", config.start_capital);
            println!("Leverage:         {}x", config.leverage);
            println!("Timeframe:        {}", config.timeframe);
            println!("Polling interval: {}s", interval);
            println!("\nPress Ctrl+C to stop.\n");

            let bot = Bot::new(trader, Duration::from_secs(interval));
            bot.run().await?;
        }

        Commands::RunSymbol { symbol } => {
            let sym = config
                .symbol(&symbol)
                .ok_or_else(|| anyhow::anyhow!("unknown symbol: {}", symbol))?
                .clone();

            let trader = build_trader(&cli.database, config.clone()).await?;
            trader.reconcile().await?;
            trader.check_account_health().await?;

            match trader.run_symbol(&sym).await? {
                Some(TradeOutcome::Opened {
                    symbol,
                    side,
                    entry_price,
                }) => println!("Opened {} {} @ {:.6}", side, symbol, entry_price),
                Some(TradeOutcome::Closed(trade)) => println!(
                    "Closed {} {} @ {:.6} ({}) PnL {:.2} USDT ({:.2}%)",
                    trade.side,
                    trade.symbol,
                    trade.exit_price,
                    trade.reason,
                    trade.pnl_usd,
                    trade.pnl_pct
                ),
                None => println!("No action for {}", symbol),
            }
        }

        Commands::Config => {
            println!("\n=== Trading Configuration ===\n");
            println!("Start capital:  {} USDT", config.start_capital);
            println!("Leverage:       {}x", config.leverage);
            println!("Stop loss:      {:.0}%", config.stop_loss_pct * 100.0);
            println!("Timeframe:      {}", config.timeframe);
            println!("History limit:  {} candles", config.history_limit);
            println!(
                "Fees:           {:.2} bps maker / {:.2} bps taker",
                config.maker_fee * 10_000.0,
                config.taker_fee * 10_000.0
            );
            println!("Slippage:       {:.2} bps", config.slippage * 10_000.0);
            println!("Planned margin: {} USDT", config.planned_margin());

            println!("\n{:<20} {:>10} {:>12} {:>8} {:>14}", "SYMBOL", "NOTIONAL", "ALLOCATION", "MODE", "FAST/SLOW/SIG");
            println!("{}", "-".repeat(68));
            for sym in &config.symbols {
                println!(
                    "{:<20} {:>10} {:>11.0}% {:>8} {:>14}",
                    sym.symbol,
                    sym.notional,
                    sym.allocation * 100.0,
                    match sym.mode {
                        trading::TradeMode::LongOnly => "LONG",
                        trading::TradeMode::LongShort => "BOTH",
                    },
                    format!("{}/{}/{}", sym.fast, sym.slow, sym.signal)
                );
            }
        }

        Commands::Metrics => {
            let store = Store::open(Some(&cli.database)).await;
            let m = store.recompute_metrics(config.start_capital).await?;

            if m.total_trades == 0 {
                println!("No trades recorded yet.");
                return Ok(());
            }

            println!("\n=== Performance Metrics ===");
            println!("Total Trades:   {}", m.total_trades);
            println!("Total P&L:      {:.2} USDT", m.total_pnl);

            println!("\n--- Win/Loss ---");
            println!("Win Rate:       {:.1}%", m.win_rate);
            println!("Winning Trades: {}", m.winning_trades);
            println!("Losing Trades:  {}", m.losing_trades);
            println!("Avg Win:        {:.2} USDT", m.average_win);
            println!("Avg Loss:       {:.2} USDT", m.average_loss);
            println!("Profit Factor:  {:.2}", m.profit_factor);

            println!("\n--- Risk ---");
            println!("Max Drawdown:   {:.2}%", m.max_drawdown);
            println!("Sharpe Ratio:   {:.2}", m.sharpe_ratio);

            println!("\n--- Streaks ---");
            println!("Max Win Streak:  {}", m.max_consecutive_wins);
            println!("Max Loss Streak: {}", m.max_consecutive_losses);

            let mut ledger = history::TradeLedger::new();
            for trade in store.load_trades().await? {
                ledger.append(trade);
            }

            println!("\n--- Per Symbol ---");
            for entry in ledger.symbol_breakdown() {
                println!(
                    "{:<20} {:>4} trades  {:>6.1}% win  {:>10.2} USDT",
                    entry.symbol, entry.trades, entry.win_rate, entry.total_pnl
                );
            }

            println!("\n--- Recent Trades ---");
            for trade in ledger.recent_first().into_iter().take(5) {
                println!(
                    "  {} {} {} @ {:.6} -> {:.6} ({}) {:+.2} USDT",
                    trade.exit_time.format("%Y-%m-%d %H:%M"),
                    trade.side,
                    trade.symbol,
                    trade.entry_price,
                    trade.exit_price,
                    trade.reason,
                    trade.pnl_usd
                );
            }
        }
    }

    Ok(())
}

async fn build_trader(database: &str, config: TradingConfig) -> Result<Trader<RestGateway>> {
    let gateway = RestGateway::from_env()?;
    let store = Store::open(Some(database)).await;
    if !store.is_durable() {
        tracing::warn!("running without durable storage, history will not survive restarts");
    }
    let notifier = Notifier::from_env()?;
    let pool = shared_pool(config.start_capital);

    Ok(Trader::new(gateway, config, pool, store, notifier))
}
