// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
// SMA_t = (close_{t-period+1} + ... + close_t) / period
//
// The incremental form keeps the trailing window and a running sum, so each
// committed bar costs O(1). The sum is rebuilt from the window once per full
// rotation to stop floating-point drift from accumulating.
// =============================================================================

use std::collections::VecDeque;

/// Arithmetic mean of the last `period` closes, or `None` during warm-up.
pub fn compute_sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    mean.is_finite().then_some(mean)
}

/// Full SMA series; element `i` corresponds to close `i + period - 1`.
pub fn calculate_sma(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }
    closes
        .windows(period)
        .map(|w| w.iter().sum::<f64>() / period as f64)
        .collect()
}

/// Streaming SMA over committed closes.
#[derive(Debug, Clone)]
pub struct SmaState {
    period: usize,
    window: VecDeque<f64>,
    sum: f64,
    since_resync: usize,
}

impl SmaState {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            window: VecDeque::with_capacity(period + 1),
            sum: 0.0,
            since_resync: 0,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Commit a closed bar and return the new average.
    pub fn update(&mut self, close: f64) -> Option<f64> {
        if self.period == 0 {
            return None;
        }
        self.window.push_back(close);
        self.sum += close;
        if self.window.len() > self.period {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
            }
            self.since_resync += 1;
            if self.since_resync >= self.period {
                self.sum = self.window.iter().sum();
                self.since_resync = 0;
            }
        }
        self.value()
    }

    /// Average as if `close` were committed, without changing the state.
    pub fn peek(&self, close: f64) -> Option<f64> {
        if self.period == 0 || self.window.len() + 1 < self.period {
            return None;
        }
        let mut sum = self.sum + close;
        if self.window.len() == self.period {
            sum -= self.window.front().copied().unwrap_or(0.0);
        }
        Some(sum / self.period as f64)
    }

    pub fn value(&self) -> Option<f64> {
        (self.period > 0 && self.window.len() == self.period)
            .then(|| self.sum / self.period as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_last_window() {
        assert_eq!(compute_sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3), Some(4.0));
    }

    #[test]
    fn sma_insufficient_data() {
        assert_eq!(compute_sma(&[1.0, 2.0], 5), None);
        assert_eq!(compute_sma(&[1.0, 2.0], 0), None);
    }

    #[test]
    fn sma_series_alignment() {
        let series = calculate_sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(series, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn incremental_matches_batch() {
        let closes: Vec<f64> = (0..200).map(|i| 100.0 + (i as f64 * 0.37).sin() * 5.0).collect();
        let mut state = SmaState::new(7);
        for (i, &c) in closes.iter().enumerate() {
            let inc = state.update(c);
            let batch = compute_sma(&closes[..=i], 7);
            match (inc, batch) {
                (Some(a), Some(b)) => assert!((a - b).abs() < 1e-9, "bar {i}: {a} vs {b}"),
                (None, None) => {}
                other => panic!("bar {i}: mismatch {other:?}"),
            }
        }
    }

    #[test]
    fn peek_does_not_commit() {
        let mut state = SmaState::new(3);
        state.update(1.0);
        state.update(2.0);
        state.update(3.0);
        assert_eq!(state.peek(6.0), Some((2.0 + 3.0 + 6.0) / 3.0));
        assert_eq!(state.value(), Some(2.0));
        assert_eq!(state.update(6.0), state.value());
        assert_eq!(state.value(), Some((2.0 + 3.0 + 6.0) / 3.0));
    }

    #[test]
    fn peek_during_warmup() {
        let mut state = SmaState::new(3);
        assert_eq!(state.peek(1.0), None);
        state.update(1.0);
        state.update(2.0);
        assert_eq!(state.peek(3.0), Some(2.0));
        assert_eq!(state.value(), None);
    }
}
