//! Trading configuration: portfolio allocation and strategy parameters.

use serde::{Deserialize, Serialize};

/// Which sides a symbol is allowed to trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeMode {
    LongOnly,
    LongShort,
}

impl TradeMode {
    pub fn allows_long(&self) -> bool {
        true
    }

    pub fn allows_short(&self) -> bool {
        matches!(self, TradeMode::LongShort)
    }
}

/// Per-symbol strategy parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolConfig {
    /// Unified symbol identifier, e.g. "IP/USDT:USDT"
    pub symbol: String,

    /// Target leveraged exposure in quote currency
    pub notional: f64,

    pub mode: TradeMode,

    /// Fraction of the capital pool budgeted to this symbol
    pub allocation: f64,

    /// Oscillator fast EMA period
    pub fast: usize,

    /// Oscillator slow EMA period
    pub slow: usize,

    /// Oscillator signal EMA period
    pub signal: usize,
}

impl SymbolConfig {
    /// Margin this symbol locks when its position is open.
    pub fn margin_target(&self, leverage: f64) -> f64 {
        self.notional / leverage
    }
}

/// Global configuration for a trading run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Starting capital of the shared pool
    pub start_capital: f64,

    /// Leverage applied to every position
    pub leverage: f64,

    /// Soft stop-loss fraction (close when the adverse move reaches it)
    pub stop_loss_pct: f64,

    /// Candle timeframe, e.g. "1h"
    pub timeframe: String,

    /// Number of candles fetched per evaluation
    pub history_limit: u32,

    pub maker_fee: f64,
    pub taker_fee: f64,

    /// Assumed execution slippage, applied against the trader
    pub slippage: f64,

    /// Configured symbols, in tick-evaluation order
    pub symbols: Vec<SymbolConfig>,
}

impl TradingConfig {
    /// Look up the configuration for one symbol.
    pub fn symbol(&self, symbol: &str) -> Option<&SymbolConfig> {
        self.symbols.iter().find(|c| c.symbol == symbol)
    }

    /// Static round-trip fee rate (entry + exit approximation).
    pub fn round_trip_fee_rate(&self) -> f64 {
        self.maker_fee + self.taker_fee
    }

    /// Sum of per-symbol margin targets, i.e. the margin committed when
    /// every configured symbol holds a position.
    pub fn planned_margin(&self) -> f64 {
        self.symbols
            .iter()
            .map(|c| c.margin_target(self.leverage))
            .sum()
    }

    /// Sum of allocation fractions. Must not exceed 1.0.
    pub fn total_allocation(&self) -> f64 {
        self.symbols.iter().map(|c| c.allocation).sum()
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            start_capital: 1000.0,
            leverage: 5.0,
            stop_loss_pct: 0.22,
            timeframe: "1h".to_string(),
            history_limit: 1000,
            maker_fee: 0.0002,
            taker_fee: 0.0006,
            slippage: 0.0002,
            symbols: vec![
                SymbolConfig {
                    symbol: "IP/USDT:USDT".to_string(),
                    notional: 1250.0,
                    mode: TradeMode::LongOnly,
                    allocation: 0.5,
                    fast: 16,
                    slow: 26,
                    signal: 7,
                },
                SymbolConfig {
                    symbol: "PEOPLE/USDT:USDT".to_string(),
                    notional: 750.0,
                    mode: TradeMode::LongShort,
                    allocation: 0.3,
                    fast: 16,
                    slow: 34,
                    signal: 11,
                },
                SymbolConfig {
                    symbol: "AVNT/USDT:USDT".to_string(),
                    notional: 250.0,
                    mode: TradeMode::LongOnly,
                    allocation: 0.1,
                    fast: 12,
                    slow: 26,
                    signal: 11,
                },
                SymbolConfig {
                    symbol: "0G/USDT:USDT".to_string(),
                    notional: 250.0,
                    mode: TradeMode::LongOnly,
                    allocation: 0.1,
                    fast: 16,
                    slow: 34,
                    signal: 7,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allocations_sum_to_one() {
        let config = TradingConfig::default();
        assert!((config.total_allocation() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_planned_margin_leaves_buffer() {
        // 1250/5 + 750/5 + 250/5 + 250/5 = 500, half the start capital
        let config = TradingConfig::default();
        assert!((config.planned_margin() - 500.0).abs() < 1e-12);
        assert!(config.planned_margin() < config.start_capital);
    }

    #[test]
    fn test_mode_gating() {
        assert!(TradeMode::LongOnly.allows_long());
        assert!(!TradeMode::LongOnly.allows_short());
        assert!(TradeMode::LongShort.allows_short());
    }

    #[test]
    fn test_symbol_lookup() {
        let config = TradingConfig::default();
        assert!(config.symbol("IP/USDT:USDT").is_some());
        assert!(config.symbol("BTC/USDT:USDT").is_none());
    }
}
