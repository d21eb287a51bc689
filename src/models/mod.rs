//! Data models for candles, positions, closed trades, and metrics.

mod candle;
mod metrics;
mod position;
mod trade;

pub use candle::Candle;
pub use metrics::{EquitySnapshot, MetricsSnapshot};
pub use position::{Position, PositionSide};
pub use trade::{CloseReason, ClosedTrade};
