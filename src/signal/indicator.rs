//! Exponential moving averages and the derived oscillator triad.

/// Exponential moving average over `values` with smoothing `k = 2/(period+1)`.
///
/// The output has the same length as the input and is seeded with the first
/// value. No warm-up trimming is applied here; callers are expected to skip
/// indices before the slowest period has stabilized (the cross detector uses
/// `slow + 2` as its margin).
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = values[0];
    out.push(prev);
    for &v in &values[1..] {
        let cur = v * k + prev * (1.0 - k);
        out.push(cur);
        prev = cur;
    }
    out
}

/// Oscillator series: main line (fast EMA minus slow EMA), its signal line,
/// and the histogram between them.
#[derive(Debug, Clone)]
pub struct OscillatorSeries {
    pub main: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// Compute the oscillator triad over a close-price series. Pure function;
/// deterministic given identical floating-point inputs.
pub fn oscillator(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> OscillatorSeries {
    let ema_fast = ema(closes, fast);
    let ema_slow = ema(closes, slow);
    let main: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();
    let signal = ema(&main, signal_period);
    let histogram: Vec<f64> = main.iter().zip(&signal).map(|(m, s)| m - s).collect();
    OscillatorSeries {
        main,
        signal,
        histogram,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_length_and_seed() {
        let values = vec![3.0, 5.0, 8.0, 2.0, 9.0];
        let out = ema(&values, 4);
        assert_eq!(out.len(), values.len());
        assert_eq!(out[0], values[0]);
    }

    #[test]
    fn test_ema_empty_input() {
        assert!(ema(&[], 12).is_empty());
    }

    #[test]
    fn test_ema_recurrence() {
        // k = 2/(2+1) = 2/3
        let out = ema(&[1.0, 4.0, 4.0], 2);
        let k = 2.0 / 3.0;
        let e1 = 4.0 * k + 1.0 * (1.0 - k);
        let e2 = 4.0 * k + e1 * (1.0 - k);
        assert!((out[1] - e1).abs() < 1e-12);
        assert!((out[2] - e2).abs() < 1e-12);
    }

    #[test]
    fn test_ema_constant_series_is_constant() {
        let out = ema(&[7.5; 50], 12);
        assert!(out.iter().all(|&v| (v - 7.5).abs() < 1e-12));
    }

    #[test]
    fn test_oscillator_histogram_identity() {
        let closes: Vec<f64> = (0..100).map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0).collect();
        let series = oscillator(&closes, 12, 26, 9);
        assert_eq!(series.main.len(), closes.len());
        assert_eq!(series.signal.len(), closes.len());
        for i in 0..closes.len() {
            assert!((series.histogram[i] - (series.main[i] - series.signal[i])).abs() < 1e-12);
        }
    }

    #[test]
    fn test_oscillator_flat_series_is_zero() {
        let series = oscillator(&[42.0; 60], 12, 26, 9);
        assert!(series.main.iter().all(|&v| v.abs() < 1e-12));
        assert!(series.histogram.iter().all(|&v| v.abs() < 1e-12));
    }
}
