//! Closed trade records appended to the trade ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PositionSide;

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    /// Soft stop-loss level breached
    StopLoss,
    /// Opposite oscillator cross
    SignalFlip,
    /// Open position at the end of a simulation window
    ForceCloseEnd,
    /// Position disappeared on the exchange and was settled locally
    Error,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::StopLoss => "STOP_LOSS",
            CloseReason::SignalFlip => "SIGNAL_FLIP",
            CloseReason::ForceCloseEnd => "FORCE_CLOSE_END",
            CloseReason::Error => "ERROR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "STOP_LOSS" => Some(CloseReason::StopLoss),
            "SIGNAL_FLIP" => Some(CloseReason::SignalFlip),
            "FORCE_CLOSE_END" => Some(CloseReason::ForceCloseEnd),
            "ERROR" => Some(CloseReason::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully settled round trip. Immutable once appended to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    /// Unique record id
    pub id: String,

    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub exit_price: f64,

    /// Net PnL as a percentage of the margin committed
    pub pnl_pct: f64,

    /// Net realized PnL in quote currency
    pub pnl_usd: f64,

    pub reason: CloseReason,

    /// Bars the position was held (0 when unknown in live mode)
    pub bars_held: usize,

    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,

    /// Margin that was locked for the position
    pub margin: f64,

    /// Total fees charged on the round trip
    pub fees: f64,
}

impl ClosedTrade {
    pub fn is_win(&self) -> bool {
        self.pnl_usd > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_round_trip() {
        for reason in [
            CloseReason::StopLoss,
            CloseReason::SignalFlip,
            CloseReason::ForceCloseEnd,
            CloseReason::Error,
        ] {
            assert_eq!(CloseReason::from_str(reason.as_str()), Some(reason));
        }
        assert_eq!(CloseReason::from_str("TAKE_PROFIT"), None);
    }

    #[test]
    fn test_zero_pnl_is_not_a_win() {
        let trade = ClosedTrade {
            id: "t1".to_string(),
            symbol: "IP/USDT:USDT".to_string(),
            side: PositionSide::Long,
            entry_price: 1.0,
            exit_price: 1.0,
            pnl_pct: 0.0,
            pnl_usd: 0.0,
            reason: CloseReason::SignalFlip,
            bars_held: 3,
            entry_time: Utc::now(),
            exit_time: Utc::now(),
            margin: 250.0,
            fees: 1.0,
        };
        assert!(!trade.is_win());
    }
}
