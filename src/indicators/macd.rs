// =============================================================================
// MACD (Moving Average Convergence Divergence)
// =============================================================================
//
// MACD line  = EMA(fast) - EMA(slow)
// Signal     = EMA(signal) of the MACD line
// Histogram  = MACD line - signal
//
// Defaults 12 / 26 / 9. The MACD line exists from close `slow - 1`; the signal
// needs `signal` MACD values on top of that, so the first full reading lands
// on close `slow + signal - 2` (34 closes with the defaults).
// =============================================================================

use serde::{Deserialize, Serialize};

use super::ema::{calculate_ema, EmaState};

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

impl MacdValue {
    fn new(macd: f64, signal: f64) -> Self {
        Self {
            macd,
            signal,
            histogram: macd - signal,
        }
    }
}

/// Minimum number of closes before [`compute_macd_with`] yields a value.
pub fn warmup(slow: usize, signal: usize) -> usize {
    (slow + signal).saturating_sub(1)
}

/// Every period positive and `fast < slow`.
fn valid_periods(fast: usize, slow: usize, signal: usize) -> bool {
    fast > 0 && slow > 0 && signal > 0 && fast < slow
}

/// MACD with the standard 12 / 26 / 9 parameters.
pub fn compute_macd(closes: &[f64]) -> Option<MacdValue> {
    compute_macd_with(closes, DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL)
}

pub fn compute_macd_with(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Option<MacdValue> {
    if !valid_periods(fast, slow, signal) {
        return None;
    }
    if closes.len() < warmup(slow, signal) {
        return None;
    }

    let ema_fast = calculate_ema(closes, fast);
    let ema_slow = calculate_ema(closes, slow);

    // ema_fast[0] is close `fast - 1`; align it with ema_slow[0] at `slow - 1`.
    let macd_line: Vec<f64> = ema_fast
        .get(slow - fast..)?
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_line = calculate_ema(&macd_line, signal);
    let sig = *signal_line.last()?;
    let macd = *macd_line.get(signal_line.len() + signal - 2)?;
    Some(MacdValue::new(macd, sig))
}

/// Streaming MACD built from three [`EmaState`]s. Rejects the same periods
/// as [`compute_macd_with`]: such a state never yields a value.
#[derive(Debug, Clone)]
pub struct MacdState {
    fast: EmaState,
    slow: EmaState,
    signal: EmaState,
    valid: bool,
    value: Option<MacdValue>,
}

impl MacdState {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: EmaState::new(fast),
            slow: EmaState::new(slow),
            signal: EmaState::new(signal),
            valid: valid_periods(fast, slow, signal),
            value: None,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<MacdValue> {
        if !self.valid {
            return None;
        }
        let fast = self.fast.update(close);
        let slow = self.slow.update(close);
        self.value = match (fast, slow) {
            (Some(f), Some(s)) => {
                let macd = f - s;
                self.signal.update(macd).map(|sig| MacdValue::new(macd, sig))
            }
            _ => None,
        };
        self.value
    }

    pub fn peek(&self, close: f64) -> Option<MacdValue> {
        if !self.valid {
            return None;
        }
        let macd = self.fast.peek(close)? - self.slow.peek(close)?;
        let sig = self.signal.peek(macd)?;
        Some(MacdValue::new(macd, sig))
    }

    pub fn value(&self) -> Option<MacdValue> {
        self.value
    }
}

impl Default for MacdState {
    fn default() -> Self {
        Self::new(DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_needs_full_warmup() {
        let closes: Vec<f64> = (1..=33).map(|x| x as f64).collect();
        assert!(compute_macd(&closes).is_none());
        let closes: Vec<f64> = (1..=34).map(|x| x as f64).collect();
        assert!(compute_macd(&closes).is_some());
    }

    #[test]
    fn macd_flat_series_is_zero() {
        let closes = vec![250.0; 60];
        let v = compute_macd(&closes).expect("warm");
        assert!(v.macd.abs() < 1e-9);
        assert!(v.signal.abs() < 1e-9);
        assert!(v.histogram.abs() < 1e-9);
    }

    #[test]
    fn macd_rising_series_is_positive() {
        let closes: Vec<f64> = (1..=80).map(|x| x as f64 * 1.5).collect();
        let v = compute_macd(&closes).unwrap();
        assert!(v.macd > 0.0);
        assert!((v.histogram - (v.macd - v.signal)).abs() < 1e-12);
    }

    #[test]
    fn invalid_parameters_yield_none() {
        let closes = vec![1.0; 100];
        assert!(compute_macd_with(&closes, 26, 12, 9).is_none());
        assert!(compute_macd_with(&closes, 0, 26, 9).is_none());
    }

    #[test]
    fn invalid_parameters_never_warm_incrementally() {
        for (fast, slow, signal) in [(26, 12, 9), (12, 12, 9), (0, 26, 9), (12, 26, 0)] {
            let mut state = MacdState::new(fast, slow, signal);
            let closes: Vec<f64> = (0..100).map(|i| 100.0 + i as f64).collect();
            for (i, &c) in closes.iter().enumerate() {
                assert!(state.peek(c).is_none(), "{fast}/{slow}/{signal} bar {i}");
                assert!(state.update(c).is_none(), "{fast}/{slow}/{signal} bar {i}");
            }
            assert!(state.value().is_none());
            assert!(compute_macd_with(&closes, fast, slow, signal).is_none());
        }
    }

    #[test]
    fn incremental_matches_batch() {
        let closes: Vec<f64> = (0..90).map(|i| 100.0 + (i as f64 * 0.3).sin() * 4.0 + i as f64 * 0.1).collect();
        let mut state = MacdState::default();
        for i in 0..closes.len() {
            let peeked = state.peek(closes[i]);
            let inc = state.update(closes[i]);
            let batch = compute_macd(&closes[..=i]);
            assert_eq!(inc.is_some(), batch.is_some(), "bar {i}");
            assert_eq!(peeked.is_some(), batch.is_some(), "bar {i}");
            if let (Some(a), Some(b)) = (inc, batch) {
                assert!((a.macd - b.macd).abs() < 1e-9, "bar {i}");
                assert!((a.signal - b.signal).abs() < 1e-9, "bar {i}");
                assert!((a.histogram - b.histogram).abs() < 1e-9, "bar {i}");
            }
        }
    }
}
