//! OHLCV candle model.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A single price bar. Candle sequences are ordered by strictly
/// increasing `time`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time
    pub time: DateTime<Utc>,

    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Build a candle from the wire representation `[ts_ms, o, h, l, c, v]`.
    pub fn from_raw(raw: &[f64]) -> Option<Self> {
        if raw.len() < 6 {
            return None;
        }
        let time = Utc.timestamp_millis_opt(raw[0] as i64).single()?;
        Some(Self {
            time,
            open: raw[1],
            high: raw[2],
            low: raw[3],
            close: raw[4],
            volume: raw[5],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw() {
        let candle = Candle::from_raw(&[1_700_000_000_000.0, 1.0, 2.0, 0.5, 1.5, 100.0]).unwrap();
        assert_eq!(candle.open, 1.0);
        assert_eq!(candle.close, 1.5);
        assert_eq!(candle.time.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_from_raw_short_row() {
        assert!(Candle::from_raw(&[1.0, 2.0, 3.0]).is_none());
    }
}
