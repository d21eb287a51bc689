//! Multi-symbol backtest over historical candles, sharing one capital pool.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::history::{SymbolBreakdown, TradeLedger};
use crate::metrics::MetricsCalculator;
use crate::models::{Candle, CloseReason, MetricsSnapshot, Position};
use crate::signal::{detect_cross, oscillator, OscillatorSeries};
use crate::trading::{
    entry_fill_price, exit_fill_price, open_position, plan_bar, settle_close, CapitalPool,
    TradingConfig,
};

/// Outcome of a simulation run.
pub struct BacktestReport {
    pub start_capital: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,
    pub bars_evaluated: usize,
    /// Margin committed when every configured symbol holds a position
    pub planned_margin: f64,
    /// Highest simultaneous margin usage observed
    pub max_used_margin: f64,
    pub ledger: TradeLedger,
    pub metrics: MetricsSnapshot,
}

impl BacktestReport {
    pub fn symbol_breakdown(&self) -> Vec<SymbolBreakdown> {
        self.ledger.symbol_breakdown()
    }

    /// Write the simulated trades as CSV.
    pub fn export_csv(&self, path: &Path) -> Result<()> {
        self.ledger.export_csv(path)
    }

    /// Write the simulated trades as JSON.
    pub fn export_json(&self, path: &Path) -> Result<()> {
        self.ledger.export_json(path)
    }
}

impl fmt::Display for BacktestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:=^60}", " BACKTEST REPORT ")?;
        writeln!(f, "Start capital:     {:>12.2} USDT", self.start_capital)?;
        writeln!(f, "Final equity:      {:>12.2} USDT", self.final_equity)?;
        writeln!(f, "Total return:      {:>12.2} %", self.total_return_pct)?;
        writeln!(f, "Bars evaluated:    {:>12}", self.bars_evaluated)?;
        writeln!(f, "Planned margin:    {:>12.2} USDT", self.planned_margin)?;
        writeln!(f, "Max used margin:   {:>12.2} USDT", self.max_used_margin)?;
        writeln!(f, "{:-^60}", "")?;
        writeln!(
            f,
            "Trades: {} ({} wins / {} losses, {:.1}% win rate)",
            self.metrics.total_trades,
            self.metrics.winning_trades,
            self.metrics.losing_trades,
            self.metrics.win_rate
        )?;
        writeln!(f, "Total PnL:         {:>12.2} USDT", self.metrics.total_pnl)?;
        writeln!(f, "Profit factor:     {:>12.2}", self.metrics.profit_factor)?;
        writeln!(f, "Max drawdown:      {:>12.2} %", self.metrics.max_drawdown)?;
        writeln!(f, "Sharpe ratio:      {:>12.2}", self.metrics.sharpe_ratio)?;
        writeln!(
            f,
            "Streaks:           {} wins / {} losses",
            self.metrics.max_consecutive_wins, self.metrics.max_consecutive_losses
        )?;
        writeln!(f, "{:-^60}", "")?;
        for entry in self.symbol_breakdown() {
            writeln!(
                f,
                "{:<20} {:>4} trades  {:>6.1}% win  {:>10.2} USDT",
                entry.symbol, entry.trades, entry.win_rate, entry.total_pnl
            )?;
        }
        write!(f, "{:=^60}", "")
    }
}

struct SymbolSeries<'a> {
    cfg: &'a crate::trading::SymbolConfig,
    candles: &'a [Candle],
    series: OscillatorSeries,
}

/// Bar-by-bar simulator applying the exact live semantics against history.
pub struct Backtester {
    config: TradingConfig,
}

impl Backtester {
    pub fn new(config: TradingConfig) -> Self {
        Self { config }
    }

    /// Simulate all configured symbols over `data` (unified symbol -> candles,
    /// oldest first). Symbols without data are skipped.
    pub fn run(&self, data: &HashMap<String, Vec<Candle>>) -> Result<BacktestReport> {
        let mut symbols: Vec<SymbolSeries<'_>> = Vec::new();
        for cfg in &self.config.symbols {
            let Some(candles) = data.get(&cfg.symbol) else {
                debug!(symbol = %cfg.symbol, "no data provided, skipping");
                continue;
            };
            let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
            symbols.push(SymbolSeries {
                cfg,
                candles,
                series: oscillator(&closes, cfg.fast, cfg.slow, cfg.signal),
            });
        }
        if symbols.is_empty() {
            anyhow::bail!("no candle data for any configured symbol");
        }

        // skip bars until the slowest EMA has stabilized
        let max_slow = symbols.iter().map(|s| s.cfg.slow).max().unwrap_or(0);
        let warmup = max_slow + 2;
        let max_len = symbols.iter().map(|s| s.candles.len()).max().unwrap_or(0);
        if max_len <= warmup || max_len < 50 {
            anyhow::bail!(
                "not enough history: {} bars, need more than {}",
                max_len,
                warmup.max(49)
            );
        }

        let mut pool = CapitalPool::new(self.config.start_capital);
        let mut positions: HashMap<String, Position> = HashMap::new();
        let mut ledger = TradeLedger::new();
        let mut max_used_margin = 0.0f64;
        let fee_rate = self.config.round_trip_fee_rate();

        for i in warmup..max_len {
            for sym in &symbols {
                if i >= sym.candles.len() {
                    continue;
                }
                let price = sym.candles[i].close;
                let bar_time = sym.candles[i].time;
                let cross = detect_cross(
                    sym.series.main[i - 1],
                    sym.series.signal[i - 1],
                    sym.series.main[i],
                    sym.series.signal[i],
                );

                let plan = plan_bar(sym.cfg.mode, positions.get(&sym.cfg.symbol), cross, price);

                if let Some(reason) = plan.close {
                    let position = positions
                        .remove(&sym.cfg.symbol)
                        .context("close planned without an open position")?;
                    let exit_price =
                        exit_fill_price(position.side, reason, price, self.config.slippage);
                    let trade = settle_close(
                        &mut pool, &position, exit_price, reason, fee_rate, bar_time, i,
                    );
                    ledger.append(trade);
                }

                if let Some(side) = plan.open {
                    let fill_price = entry_fill_price(side, price, self.config.slippage);
                    if let Some(position) = open_position(
                        &mut pool,
                        sym.cfg,
                        &self.config,
                        side,
                        fill_price,
                        bar_time,
                        i,
                    ) {
                        positions.insert(sym.cfg.symbol.clone(), position);
                    }
                }

                max_used_margin = max_used_margin.max(pool.used_margin());
            }
        }

        // anything still open settles at its final bar
        for sym in &symbols {
            let Some(position) = positions.remove(&sym.cfg.symbol) else {
                continue;
            };
            let last = sym.candles.len() - 1;
            let price = sym.candles[last].close;
            let exit_price = exit_fill_price(
                position.side,
                CloseReason::ForceCloseEnd,
                price,
                self.config.slippage,
            );
            let trade = settle_close(
                &mut pool,
                &position,
                exit_price,
                CloseReason::ForceCloseEnd,
                fee_rate,
                sym.candles[last].time,
                last,
            );
            ledger.append(trade);
        }

        let metrics = MetricsCalculator::calculate(ledger.trades(), self.config.start_capital);
        let final_equity = pool.equity();

        info!(
            trades = ledger.len(),
            final_equity,
            max_used_margin,
            "backtest finished"
        );

        Ok(BacktestReport {
            start_capital: self.config.start_capital,
            final_equity,
            total_return_pct: (final_equity - self.config.start_capital)
                / self.config.start_capital
                * 100.0,
            bars_evaluated: max_len - warmup,
            planned_margin: self.config.planned_margin(),
            max_used_margin,
            ledger,
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionSide;
    use chrono::{Duration, TimeZone, Utc};

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                time: start + Duration::hours(i as i64),
                open: close,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    /// Decline, rally, decline. The long first leg pushes the bull cross past
    /// every warm-up window; the final leg produces one bear cross.
    fn v_shape_closes() -> Vec<f64> {
        let mut closes = Vec::new();
        for i in 0..45 {
            closes.push(100.0 - i as f64 * 0.5);
        }
        for i in 0..30 {
            closes.push(78.0 + i as f64 * 0.7);
        }
        for i in 0..30 {
            closes.push(99.0 - i as f64 * 0.8);
        }
        closes
    }

    fn single_symbol_config() -> TradingConfig {
        let mut config = TradingConfig::default();
        config.symbols.retain(|s| s.symbol == "IP/USDT:USDT");
        config
    }

    #[test]
    fn test_flat_market_produces_no_trades() {
        let config = single_symbol_config();
        let mut data = HashMap::new();
        data.insert("IP/USDT:USDT".to_string(), candles_from_closes(&[50.0; 200]));

        let report = Backtester::new(config).run(&data).unwrap();
        assert_eq!(report.ledger.len(), 0);
        assert_eq!(report.final_equity, 1000.0);
        assert_eq!(report.max_used_margin, 0.0);
    }

    #[test]
    fn test_insufficient_history_is_an_error() {
        let config = single_symbol_config();
        let mut data = HashMap::new();
        data.insert("IP/USDT:USDT".to_string(), candles_from_closes(&[50.0; 20]));

        assert!(Backtester::new(config).run(&data).is_err());
    }

    #[test]
    fn test_missing_all_data_is_an_error() {
        let config = single_symbol_config();
        assert!(Backtester::new(config).run(&HashMap::new()).is_err());
    }

    #[test]
    fn test_v_shape_round_trip() {
        let config = single_symbol_config();
        let mut data = HashMap::new();
        data.insert(
            "IP/USDT:USDT".to_string(),
            candles_from_closes(&v_shape_closes()),
        );

        let report = Backtester::new(config).run(&data).unwrap();

        assert!(report.ledger.len() >= 1);
        for trade in report.ledger.trades() {
            // LONG_ONLY symbol never goes short
            assert_eq!(trade.side, PositionSide::Long);
            assert_eq!(trade.margin, 250.0);
        }
        // nothing left open, so equity fully accounts for the PnL
        assert!((report.final_equity - (1000.0 + report.ledger.total_pnl())).abs() < 1e-9);
        assert!(report.max_used_margin >= 250.0);
        // the rally entry eventually exits on the bear cross or at the end
        let last = report.ledger.trades().last().unwrap();
        assert!(matches!(
            last.reason,
            CloseReason::SignalFlip | CloseReason::ForceCloseEnd
        ));
    }

    #[test]
    fn test_shared_pool_caps_concurrent_margin() {
        let config = TradingConfig::default();
        let closes = v_shape_closes();
        let mut data = HashMap::new();
        for sym in &config.symbols {
            data.insert(sym.symbol.clone(), candles_from_closes(&closes));
        }

        let report = Backtester::new(config.clone()).run(&data).unwrap();

        // all four margins together stay within the planned 500 USDT
        assert!(report.max_used_margin <= config.planned_margin() + 1e-9);
        assert!(report.max_used_margin <= report.start_capital);
        // identical data means every symbol traded
        let breakdown = report.symbol_breakdown();
        assert_eq!(breakdown.len(), config.symbols.len());
        assert!((report.final_equity - (1000.0 + report.ledger.total_pnl())).abs() < 1e-9);
    }

    #[test]
    fn test_deterministic_across_runs() {
        let config = TradingConfig::default();
        let closes = v_shape_closes();
        let mut data = HashMap::new();
        for sym in &config.symbols {
            data.insert(sym.symbol.clone(), candles_from_closes(&closes));
        }

        let a = Backtester::new(config.clone()).run(&data).unwrap();
        let b = Backtester::new(config).run(&data).unwrap();
        assert_eq!(a.ledger.len(), b.ledger.len());
        assert_eq!(a.final_equity, b.final_equity);
        assert_eq!(a.metrics.total_pnl, b.metrics.total_pnl);
    }

    #[test]
    fn test_report_renders() {
        let config = single_symbol_config();
        let mut data = HashMap::new();
        data.insert(
            "IP/USDT:USDT".to_string(),
            candles_from_closes(&v_shape_closes()),
        );

        let report = Backtester::new(config).run(&data).unwrap();
        let rendered = format!("{}", report);
        assert!(rendered.contains("BACKTEST REPORT"));
        assert!(rendered.contains("IP/USDT:USDT"));
    }
}
