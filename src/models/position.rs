//! Open position model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open leveraged position. At most one exists per symbol; the side only
/// changes through a full close followed by a fresh open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,

    /// Contract quantity (notional / entry price)
    pub qty: f64,

    /// Leveraged exposure value
    pub notional: f64,

    /// Capital locked to support the notional
    pub margin: f64,

    /// Soft stop-loss as a fraction of entry price (e.g. 0.22)
    pub stop_loss_pct: f64,

    pub entry_time: DateTime<Utc>,

    /// Bar index at entry (backtest only; 0 in live mode)
    pub entry_index: usize,
}

impl Position {
    /// Price-move fraction relative to entry, signed in the position's favor.
    pub fn price_move(&self, exit_price: f64) -> f64 {
        match self.side {
            PositionSide::Long => (exit_price - self.entry_price) / self.entry_price,
            PositionSide::Short => (self.entry_price - exit_price) / self.entry_price,
        }
    }

    /// Whether `price` has moved adversely past the soft stop level.
    pub fn stop_hit(&self, price: f64) -> bool {
        match self.side {
            PositionSide::Long => price <= self.entry_price * (1.0 - self.stop_loss_pct),
            PositionSide::Short => price >= self.entry_price * (1.0 + self.stop_loss_pct),
        }
    }
}
