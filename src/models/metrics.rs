//! Aggregated performance metrics derived from the trade ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of ledger-wide performance statistics. Derived data; always
/// recomputable from the ordered trade sequence, never hand-edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// When the snapshot was computed
    pub computed_at: DateTime<Utc>,

    // === Counts ===
    /// Total number of closed trades
    pub total_trades: u32,

    /// Trades with positive net PnL
    pub winning_trades: u32,

    /// Trades with zero or negative net PnL
    pub losing_trades: u32,

    /// Win rate in percent (0-100)
    pub win_rate: f64,

    // === PnL ===
    /// Sum of net PnL across all trades
    pub total_pnl: f64,

    /// Average profit on winning trades
    pub average_win: f64,

    /// Average loss on losing trades (absolute value)
    pub average_loss: f64,

    /// Gross profit / gross loss; 999 when there are gains but no losses
    pub profit_factor: f64,

    // === Risk ===
    /// Worst peak-to-trough equity decline in percent (negative, e.g. -12.5)
    pub max_drawdown: f64,

    /// Annualized Sharpe ratio over per-trade returns
    pub sharpe_ratio: f64,

    // === Streaks ===
    pub max_consecutive_wins: u32,
    pub max_consecutive_losses: u32,
}

impl MetricsSnapshot {
    /// Empty snapshot (no trades recorded yet).
    pub fn empty() -> Self {
        Self {
            computed_at: Utc::now(),
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            total_pnl: 0.0,
            average_win: 0.0,
            average_loss: 0.0,
            profit_factor: 0.0,
            max_drawdown: 0.0,
            sharpe_ratio: 0.0,
            max_consecutive_wins: 0,
            max_consecutive_losses: 0,
        }
    }
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// A point on the derived equity curve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub timestamp: DateTime<Utc>,

    /// Initial capital plus cumulative realized PnL
    pub equity: f64,

    /// Decline from the running peak in percent (negative or zero)
    pub drawdown: f64,

    /// Cumulative realized PnL
    pub total_pnl: f64,
}
