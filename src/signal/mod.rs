//! Indicator engine and crossover detection.

mod cross;
mod indicator;

pub use cross::{detect_cross, Cross};
pub use indicator::{ema, oscillator, OscillatorSeries};
