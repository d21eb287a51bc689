//! Calculator for strategy performance metrics: MDD, Sharpe ratio, streaks, etc.

use chrono::Utc;
use statrs::statistics::Statistics;

use crate::models::{ClosedTrade, MetricsSnapshot};

/// Annualization factor for the Sharpe ratio (daily-bar convention).
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Profit factor reported when there are gains but no losses at all.
const PROFIT_FACTOR_CAP: f64 = 999.0;

/// Calculator for computing strategy performance metrics.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Compute a full snapshot from the ordered trade sequence.
    ///
    /// `initial_equity` anchors the drawdown equity curve; trades must be in
    /// close order. An empty ledger yields the all-zero snapshot.
    pub fn calculate(trades: &[ClosedTrade], initial_equity: f64) -> MetricsSnapshot {
        let mut metrics = MetricsSnapshot::empty();
        if trades.is_empty() {
            return metrics;
        }

        let pnls: Vec<f64> = trades.iter().map(|t| t.pnl_usd).collect();
        // Zero-PnL trades count as losses throughout
        let (wins, losses): (Vec<f64>, Vec<f64>) = pnls.iter().partition(|&&p| p > 0.0);

        metrics.total_trades = trades.len() as u32;
        metrics.winning_trades = wins.len() as u32;
        metrics.losing_trades = losses.len() as u32;
        metrics.win_rate = wins.len() as f64 / trades.len() as f64 * 100.0;
        metrics.total_pnl = pnls.iter().sum();

        if !wins.is_empty() {
            metrics.average_win = wins.iter().sum::<f64>() / wins.len() as f64;
        }
        if !losses.is_empty() {
            metrics.average_loss = losses.iter().map(|l| l.abs()).sum::<f64>() / losses.len() as f64;
        }

        let gross_profit: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().map(|l| l.abs()).sum();
        metrics.profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            PROFIT_FACTOR_CAP
        } else {
            0.0
        };

        metrics.max_drawdown = Self::max_drawdown(&pnls, initial_equity);
        metrics.sharpe_ratio = Self::sharpe_ratio(trades);

        let (max_wins, max_losses) = Self::streaks(trades);
        metrics.max_consecutive_wins = max_wins;
        metrics.max_consecutive_losses = max_losses;

        metrics.computed_at = Utc::now();
        metrics
    }

    /// Worst peak-to-trough decline of the equity curve, in percent.
    ///
    /// The curve starts at `initial_equity` and adds each trade's net PnL.
    /// Returned value is zero or negative.
    pub fn max_drawdown(pnls: &[f64], initial_equity: f64) -> f64 {
        if pnls.is_empty() {
            return 0.0;
        }

        let mut equity = initial_equity;
        let mut peak = initial_equity;
        let mut max_dd = 0.0f64;

        for pnl in pnls {
            equity += pnl;
            if equity > peak {
                peak = equity;
            }
            let dd = (equity - peak) / peak * 100.0;
            if dd < max_dd {
                max_dd = dd;
            }
        }

        max_dd
    }

    /// Annualized Sharpe ratio over per-trade margin returns.
    ///
    /// Zero risk-free rate; zero when the return series is empty or has no
    /// variance.
    pub fn sharpe_ratio(trades: &[ClosedTrade]) -> f64 {
        let returns: Vec<f64> = trades.iter().map(|t| t.pnl_pct / 100.0).collect();
        if returns.is_empty() {
            return 0.0;
        }

        let mean = returns.clone().mean();
        let std_dev = returns.population_std_dev();
        if std_dev <= 0.0 || !std_dev.is_finite() {
            return 0.0;
        }

        mean / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
    }

    /// Longest win streak and longest loss streak, in close order.
    pub fn streaks(trades: &[ClosedTrade]) -> (u32, u32) {
        let mut max_wins = 0u32;
        let mut max_losses = 0u32;
        let mut cur_wins = 0u32;
        let mut cur_losses = 0u32;

        for trade in trades {
            if trade.is_win() {
                cur_wins += 1;
                cur_losses = 0;
                max_wins = max_wins.max(cur_wins);
            } else {
                cur_losses += 1;
                cur_wins = 0;
                max_losses = max_losses.max(cur_losses);
            }
        }

        (max_wins, max_losses)
    }
}
