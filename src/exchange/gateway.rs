//! Exchange gateway abstraction shared by the live trader and tests.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::{Candle, PositionSide};

/// Futures account balance summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub equity: f64,
    pub available: f64,
    pub used_margin: f64,
    pub unrealized_pnl: f64,
}

/// A position as reported by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: PositionSide,
    pub contracts: f64,
    pub entry_price: f64,
    pub notional: f64,
    pub unrealized_pnl: f64,
}

/// Trading fee rates for one symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeeRates {
    pub maker: f64,
    pub taker: f64,
}

/// Acknowledgement for a submitted market order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub qty: f64,
    /// Average fill price when the venue reports one
    pub fill_price: Option<f64>,
}

/// Exchange operations the trader depends on. Implemented by the REST
/// gateway in production and by in-memory mocks in tests.
pub trait ExchangeGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch up to `limit` most recent candles for `symbol`, oldest first.
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Candle>>> + Send;

    fn account_info(&self) -> impl std::future::Future<Output = Result<AccountInfo>> + Send;

    /// Current open position for `symbol`, if any.
    fn position_for(
        &self,
        symbol: &str,
    ) -> impl std::future::Future<Output = Result<Option<ExchangePosition>>> + Send;

    fn fee_rates(&self, symbol: &str)
        -> impl std::future::Future<Output = Result<FeeRates>> + Send;

    fn set_leverage(
        &self,
        symbol: &str,
        leverage: f64,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Submit a market order. `reduce_only` orders close existing exposure.
    fn place_market_order(
        &self,
        symbol: &str,
        side: PositionSide,
        qty: f64,
        reduce_only: bool,
    ) -> impl std::future::Future<Output = Result<OrderReceipt>> + Send;
}

/// Severity buckets for the account health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Ok,
    Warning,
    Critical,
}

/// Result of inspecting account margin usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// used_margin / equity, 0 when equity is non-positive
    pub margin_ratio: f64,
    pub equity: f64,
    pub available: f64,
}

const MARGIN_WARNING_RATIO: f64 = 0.7;
const MARGIN_CRITICAL_RATIO: f64 = 0.9;

/// Classify account margin usage.
pub fn account_health(info: &AccountInfo) -> HealthReport {
    let margin_ratio = if info.equity > 0.0 {
        info.used_margin / info.equity
    } else {
        0.0
    };

    let status = if info.equity <= 0.0 || margin_ratio >= MARGIN_CRITICAL_RATIO {
        HealthStatus::Critical
    } else if margin_ratio >= MARGIN_WARNING_RATIO {
        HealthStatus::Warning
    } else {
        HealthStatus::Ok
    };

    HealthReport {
        status,
        margin_ratio,
        equity: info.equity,
        available: info.available,
    }
}

/// Contract quantity for a target notional at `price`.
pub fn order_qty(notional: f64, price: f64) -> Result<f64> {
    if price <= 0.0 {
        anyhow::bail!("cannot size order at non-positive price {}", price);
    }
    Ok(notional / price)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(equity: f64, used: f64) -> AccountInfo {
        AccountInfo {
            equity,
            available: equity - used,
            used_margin: used,
            unrealized_pnl: 0.0,
        }
    }

    #[test]
    fn test_health_ok_below_warning_ratio() {
        let report = account_health(&info(1000.0, 500.0));
        assert_eq!(report.status, HealthStatus::Ok);
        assert!((report.margin_ratio - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_health_warning_and_critical_thresholds() {
        assert_eq!(account_health(&info(1000.0, 700.0)).status, HealthStatus::Warning);
        assert_eq!(account_health(&info(1000.0, 900.0)).status, HealthStatus::Critical);
    }

    #[test]
    fn test_health_critical_on_wiped_equity() {
        let report = account_health(&info(0.0, 0.0));
        assert_eq!(report.status, HealthStatus::Critical);
        assert_eq!(report.margin_ratio, 0.0);
    }

    #[test]
    fn test_order_qty() {
        assert!((order_qty(1250.0, 2.0).unwrap() - 625.0).abs() < 1e-12);
        assert!(order_qty(1250.0, 0.0).is_err());
    }
}
