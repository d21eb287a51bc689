//! Performance metrics derived from the trade ledger.

mod calculator;

pub use calculator::MetricsCalculator;
