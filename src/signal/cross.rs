//! Crossover classification between the oscillator main and signal lines.

/// Outcome of comparing two consecutive main/signal pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cross {
    /// Main line crossed above the signal line
    Bull,
    /// Main line crossed below the signal line
    Bear,
    /// No crossover on this bar
    None,
}

impl Cross {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cross::Bull => "BULL",
            Cross::Bear => "BEAR",
            Cross::None => "NONE",
        }
    }
}

impl std::fmt::Display for Cross {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify the transition between the previous and current bar.
///
/// Both comparisons are strict: a bar where the lines touch exactly
/// produces `Cross::None`, never a signal.
pub fn detect_cross(prev_main: f64, prev_signal: f64, main: f64, signal: f64) -> Cross {
    if prev_main < prev_signal && main > signal {
        Cross::Bull
    } else if prev_main > prev_signal && main < signal {
        Cross::Bear
    } else {
        Cross::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bull_cross() {
        assert_eq!(detect_cross(-0.5, 0.1, 0.3, 0.2), Cross::Bull);
    }

    #[test]
    fn test_bear_cross() {
        assert_eq!(detect_cross(0.5, 0.1, -0.3, 0.2), Cross::Bear);
    }

    #[test]
    fn test_no_cross_when_staying_on_one_side() {
        assert_eq!(detect_cross(0.5, 0.1, 0.6, 0.2), Cross::None);
        assert_eq!(detect_cross(-0.5, 0.1, -0.6, 0.2), Cross::None);
    }

    #[test]
    fn test_exact_touch_is_none() {
        // Equality on either bar must not fire
        assert_eq!(detect_cross(0.2, 0.2, 0.3, 0.2), Cross::None);
        assert_eq!(detect_cross(0.1, 0.2, 0.2, 0.2), Cross::None);
        assert_eq!(detect_cross(0.2, 0.2, 0.2, 0.2), Cross::None);
    }

    #[test]
    fn test_scale_invariance() {
        let cases = [
            (-0.5, 0.1, 0.3, 0.2),
            (0.5, 0.1, -0.3, 0.2),
            (0.5, 0.1, 0.6, 0.2),
        ];
        for (pm, ps, m, s) in cases {
            for scale in [0.001, 1.0, 1_000.0] {
                assert_eq!(
                    detect_cross(pm * scale, ps * scale, m * scale, s * scale),
                    detect_cross(pm, ps, m, s)
                );
            }
        }
    }
}
