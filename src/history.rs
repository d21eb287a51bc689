//! Append-only trade ledger and its derived views.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::{ClosedTrade, EquitySnapshot};

/// Maximum number of points retained in a derived equity curve.
const EQUITY_CURVE_CAP: usize = 1000;

/// Per-symbol aggregate over the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolBreakdown {
    pub symbol: String,
    pub trades: u32,
    pub wins: u32,
    pub win_rate: f64,
    pub total_pnl: f64,
}

/// Chronological record of settled trades. Records are only ever appended;
/// order is close order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeLedger {
    trades: Vec<ClosedTrade>,
}

impl TradeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, trade: ClosedTrade) {
        self.trades.push(trade);
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    /// All trades in close order (oldest first).
    pub fn trades(&self) -> &[ClosedTrade] {
        &self.trades
    }

    /// All trades, most recent exit first.
    pub fn recent_first(&self) -> Vec<&ClosedTrade> {
        let mut out: Vec<&ClosedTrade> = self.trades.iter().collect();
        out.sort_by(|a, b| b.exit_time.cmp(&a.exit_time));
        out
    }

    /// Trades for one symbol, in close order.
    pub fn for_symbol(&self, symbol: &str) -> Vec<&ClosedTrade> {
        self.trades.iter().filter(|t| t.symbol == symbol).collect()
    }

    /// Cumulative net PnL over the whole ledger.
    pub fn total_pnl(&self) -> f64 {
        self.trades.iter().map(|t| t.pnl_usd).sum()
    }

    /// Aggregate counts and PnL per symbol, ordered by first appearance.
    pub fn symbol_breakdown(&self) -> Vec<SymbolBreakdown> {
        let mut out: Vec<SymbolBreakdown> = Vec::new();
        for trade in &self.trades {
            let entry = match out.iter_mut().find(|b| b.symbol == trade.symbol) {
                Some(entry) => entry,
                None => {
                    out.push(SymbolBreakdown {
                        symbol: trade.symbol.clone(),
                        trades: 0,
                        wins: 0,
                        win_rate: 0.0,
                        total_pnl: 0.0,
                    });
                    out.last_mut().unwrap()
                }
            };
            entry.trades += 1;
            if trade.is_win() {
                entry.wins += 1;
            }
            entry.total_pnl += trade.pnl_usd;
        }
        for entry in &mut out {
            entry.win_rate = entry.wins as f64 / entry.trades as f64 * 100.0;
        }
        out
    }

    /// Equity curve anchored at `initial_capital`, one point per settled
    /// trade, capped to the most recent [`EQUITY_CURVE_CAP`] points.
    pub fn equity_curve(&self, initial_capital: f64) -> Vec<EquitySnapshot> {
        let mut curve = Vec::with_capacity(self.trades.len());
        let mut equity = initial_capital;
        let mut peak = initial_capital;
        let mut total_pnl = 0.0;

        for trade in &self.trades {
            equity += trade.pnl_usd;
            total_pnl += trade.pnl_usd;
            if equity > peak {
                peak = equity;
            }
            curve.push(EquitySnapshot {
                timestamp: trade.exit_time,
                equity,
                drawdown: (equity - peak) / peak * 100.0,
                total_pnl,
            });
        }

        if curve.len() > EQUITY_CURVE_CAP {
            curve.drain(..curve.len() - EQUITY_CURVE_CAP);
        }
        curve
    }

    /// Serialize the full ledger to a JSON file.
    pub fn export_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.trades)
            .context("failed to serialize trade ledger")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write ledger to {}", path.display()))?;
        Ok(())
    }

    /// Load a ledger previously written by [`TradeLedger::export_json`].
    pub fn import_json(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read ledger from {}", path.display()))?;
        let trades: Vec<ClosedTrade> =
            serde_json::from_str(&json).context("failed to parse trade ledger")?;
        Ok(Self { trades })
    }

    /// Write the ledger as CSV, one row per trade in close order.
    pub fn export_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("failed to create {}", path.display()))?;

        writer.write_record([
            "id",
            "symbol",
            "side",
            "entry_price",
            "exit_price",
            "pnl_pct",
            "pnl_usd",
            "reason",
            "bars_held",
            "entry_time",
            "exit_time",
            "margin",
            "fees",
        ])?;

        for t in &self.trades {
            writer.write_record([
                t.id.clone(),
                t.symbol.clone(),
                t.side.to_string(),
                t.entry_price.to_string(),
                t.exit_price.to_string(),
                format!("{:.4}", t.pnl_pct),
                format!("{:.4}", t.pnl_usd),
                t.reason.to_string(),
                t.bars_held.to_string(),
                t.entry_time.to_rfc3339(),
                t.exit_time.to_rfc3339(),
                t.margin.to_string(),
                format!("{:.4}", t.fees),
            ])?;
        }

        writer.flush().context("failed to flush csv writer")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CloseReason, PositionSide};
    use chrono::{Duration, Utc};

    fn trade(symbol: &str, pnl_usd: f64, offset_hours: i64) -> ClosedTrade {
        ClosedTrade {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side: PositionSide::Long,
            entry_price: 1.0,
            exit_price: 1.1,
            pnl_pct: pnl_usd / 250.0 * 100.0,
            pnl_usd,
            reason: CloseReason::SignalFlip,
            bars_held: 4,
            entry_time: Utc::now() + Duration::hours(offset_hours) - Duration::hours(4),
            exit_time: Utc::now() + Duration::hours(offset_hours),
            margin: 250.0,
            fees: 1.0,
        }
    }

    #[test]
    fn test_recent_first_ordering() {
        let mut ledger = TradeLedger::new();
        ledger.append(trade("IP/USDT:USDT", 10.0, 0));
        ledger.append(trade("IP/USDT:USDT", -5.0, 2));
        ledger.append(trade("IP/USDT:USDT", 7.0, 1));

        let recent = ledger.recent_first();
        assert!((recent[0].pnl_usd - -5.0).abs() < 1e-12);
        assert!((recent[2].pnl_usd - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_symbol_filter_and_breakdown() {
        let mut ledger = TradeLedger::new();
        ledger.append(trade("IP/USDT:USDT", 10.0, 0));
        ledger.append(trade("PEOPLE/USDT:USDT", -4.0, 1));
        ledger.append(trade("IP/USDT:USDT", -2.0, 2));

        assert_eq!(ledger.for_symbol("IP/USDT:USDT").len(), 2);
        assert_eq!(ledger.for_symbol("AVNT/USDT:USDT").len(), 0);

        let breakdown = ledger.symbol_breakdown();
        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown[0].symbol, "IP/USDT:USDT");
        assert_eq!(breakdown[0].trades, 2);
        assert_eq!(breakdown[0].wins, 1);
        assert!((breakdown[0].win_rate - 50.0).abs() < 1e-9);
        assert!((breakdown[0].total_pnl - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_equity_curve_anchored_at_initial_capital() {
        let mut ledger = TradeLedger::new();
        ledger.append(trade("IP/USDT:USDT", 100.0, 0));
        ledger.append(trade("IP/USDT:USDT", -220.0, 1));

        let curve = ledger.equity_curve(1000.0);
        assert_eq!(curve.len(), 2);
        assert!((curve[0].equity - 1100.0).abs() < 1e-9);
        assert_eq!(curve[0].drawdown, 0.0);
        assert!((curve[1].equity - 880.0).abs() < 1e-9);
        assert!((curve[1].drawdown - (880.0 - 1100.0) / 1100.0 * 100.0).abs() < 1e-9);
        assert!((curve[1].total_pnl - -120.0).abs() < 1e-9);
    }

    #[test]
    fn test_equity_curve_capped_to_most_recent_points() {
        let mut ledger = TradeLedger::new();
        for i in 0..1100 {
            ledger.append(trade("IP/USDT:USDT", 1.0, i));
        }
        let curve = ledger.equity_curve(1000.0);
        assert_eq!(curve.len(), 1000);
        // the retained tail ends at the full cumulative sum
        assert!((curve.last().unwrap().total_pnl - 1100.0).abs() < 1e-9);
    }

    #[test]
    fn test_json_round_trip() {
        let mut ledger = TradeLedger::new();
        ledger.append(trade("IP/USDT:USDT", 12.5, 0));
        ledger.append(trade("PEOPLE/USDT:USDT", -3.25, 1));

        let dir = std::env::temp_dir().join(format!("ledger-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("trades.json");

        ledger.export_json(&path).unwrap();
        let restored = TradeLedger::import_json(&path).unwrap();

        assert_eq!(restored.len(), 2);
        assert!((restored.total_pnl() - ledger.total_pnl()).abs() < 1e-12);
        assert_eq!(restored.trades()[0].symbol, "IP/USDT:USDT");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_csv_export_writes_header_and_rows() {
        let mut ledger = TradeLedger::new();
        ledger.append(trade("IP/USDT:USDT", 12.5, 0));

        let dir = std::env::temp_dir().join(format!("ledger-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("trades.csv");

        ledger.export_csv(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("id,symbol,side"));
        assert!(lines[1].contains("IP/USDT:USDT"));
        assert!(lines[1].contains("SIGNAL_FLIP"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
