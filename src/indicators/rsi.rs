// =============================================================================
// Relative Strength Index (RSI) — Wilder's Smoothing
// =============================================================================
//
// Step 1 — Compute price changes (deltas) from consecutive closes.
// Step 2 — Seed average gain / average loss with the simple mean of the first
//          `period` gains / losses.
// Step 3 — Apply Wilder's smoothing:
//            avg_gain = (prev_avg_gain * (period - 1) + current_gain) / period
//            avg_loss = (prev_avg_loss * (period - 1) + current_loss) / period
// Step 4 — RS  = avg_gain / avg_loss
//          RSI = 100 - 100 / (1 + RS),  or 100 when avg_loss is zero.
// =============================================================================

/// Compute the full RSI series for the given `closes` and `period`.
///
/// The returned vector has one RSI value for each close starting at index
/// `period` (the first `period` closes are consumed to seed the averages).
///
/// # Edge cases
/// - `period == 0` => empty vec
/// - `closes.len() < period + 1` => empty vec (need at least `period` deltas)
/// - Non-finite results truncate the series.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let (sum_gain, sum_loss) = deltas[..period]
        .iter()
        .fold((0.0_f64, 0.0_f64), |(g, l), &d| split_delta(d, g, l));

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    let Some(first) = rsi_from_averages(avg_gain, avg_loss) else {
        return Vec::new();
    };

    let mut result = Vec::with_capacity(deltas.len() - period + 1);
    result.push(first);

    for &delta in &deltas[period..] {
        (avg_gain, avg_loss) = wilder_step(avg_gain, avg_loss, delta, period_f);
        match rsi_from_averages(avg_gain, avg_loss) {
            Some(rsi) => result.push(rsi),
            None => break,
        }
    }

    result
}

/// Latest RSI value, or `None` when fewer than `period + 1` closes exist.
pub fn compute_rsi(closes: &[f64], period: usize) -> Option<f64> {
    calculate_rsi(closes, period).last().copied()
}

/// Streaming RSI holding only the running Wilder averages.
#[derive(Debug, Clone)]
pub struct RsiState {
    period: usize,
    prev_close: Option<f64>,
    seen: usize,
    avg_gain: f64,
    avg_loss: f64,
    value: Option<f64>,
}

impl RsiState {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            seen: 0,
            avg_gain: 0.0,
            avg_loss: 0.0,
            value: None,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        if self.period == 0 {
            return None;
        }
        let Some(prev) = self.prev_close.replace(close) else {
            return None;
        };
        let (gain, loss, seen) = self.advance(close - prev);
        self.avg_gain = gain;
        self.avg_loss = loss;
        self.seen = seen;
        self.value = if seen >= self.period {
            rsi_from_averages(gain, loss)
        } else {
            None
        };
        self.value
    }

    pub fn peek(&self, close: f64) -> Option<f64> {
        let prev = self.prev_close?;
        if self.period == 0 {
            return None;
        }
        let (gain, loss, seen) = self.advance(close - prev);
        if seen >= self.period {
            rsi_from_averages(gain, loss)
        } else {
            None
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// During warm-up the averages hold running sums; they become means on
    /// the `period`-th delta and are Wilder-smoothed from then on.
    fn advance(&self, delta: f64) -> (f64, f64, usize) {
        let period_f = self.period as f64;
        let seen = self.seen + 1;
        if seen < self.period {
            let (g, l) = split_delta(delta, self.avg_gain, self.avg_loss);
            (g, l, seen)
        } else if seen == self.period {
            let (g, l) = split_delta(delta, self.avg_gain, self.avg_loss);
            (g / period_f, l / period_f, seen)
        } else {
            let (g, l) = wilder_step(self.avg_gain, self.avg_loss, delta, period_f);
            (g, l, seen)
        }
    }
}

// =============================================================================
// Internal helpers
// =============================================================================

fn split_delta(delta: f64, gain: f64, loss: f64) -> (f64, f64) {
    if delta > 0.0 {
        (gain + delta, loss)
    } else {
        (gain, loss + delta.abs())
    }
}

fn wilder_step(avg_gain: f64, avg_loss: f64, delta: f64, period: f64) -> (f64, f64) {
    let gain = if delta > 0.0 { delta } else { 0.0 };
    let loss = if delta < 0.0 { delta.abs() } else { 0.0 };
    (
        (avg_gain * (period - 1.0) + gain) / period,
        (avg_loss * (period - 1.0) + loss) / period,
    )
}

/// Convert average gain / average loss into an RSI value in [0, 100].
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };

    rsi.is_finite().then_some(rsi)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_empty_input() {
        assert!(calculate_rsi(&[], 14).is_empty());
        assert_eq!(compute_rsi(&[], 14), None);
    }

    #[test]
    fn rsi_insufficient_data() {
        // 14 closes => 13 deltas < 14.
        let closes: Vec<f64> = (1..=14).map(|x| x as f64).collect();
        assert_eq!(compute_rsi(&closes, 14), None);
    }

    #[test]
    fn rsi_strictly_increasing_is_100() {
        let closes: Vec<f64> = (1..=15).map(|x| x as f64).collect();
        assert_eq!(compute_rsi(&closes, 14), Some(100.0));
        let longer: Vec<f64> = (1..=40).map(|x| x as f64).collect();
        for v in calculate_rsi(&longer, 14) {
            assert_eq!(v, 100.0);
        }
    }

    #[test]
    fn rsi_all_losses() {
        let closes: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        for v in calculate_rsi(&closes, 14) {
            assert!(v.abs() < 1e-10, "expected 0.0, got {v}");
        }
    }

    #[test]
    fn rsi_flat_market_has_no_losses() {
        let closes = vec![100.0; 30];
        assert_eq!(compute_rsi(&closes, 14), Some(100.0));
    }

    #[test]
    fn rsi_range_check() {
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08,
            45.89, 46.03, 44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        let series = calculate_rsi(&closes, 14);
        assert_eq!(series.len(), 4);
        for &v in &series {
            assert!((0.0..=100.0).contains(&v), "RSI {v} out of range");
        }
    }

    #[test]
    fn incremental_matches_batch() {
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08,
            45.89, 46.03, 44.18, 44.22, 44.57, 43.42, 42.66, 43.13, 43.90, 44.10,
        ];
        let mut state = RsiState::new(14);
        for i in 0..closes.len() {
            let peeked = state.peek(closes[i]);
            let inc = state.update(closes[i]);
            let batch = compute_rsi(&closes[..=i], 14);
            assert_eq!(peeked.is_some(), batch.is_some(), "bar {i}");
            match (inc, batch) {
                (Some(a), Some(b)) => {
                    assert!((a - b).abs() < 1e-9, "bar {i}: {a} vs {b}");
                    assert!((peeked.unwrap() - b).abs() < 1e-9);
                }
                (None, None) => {}
                other => panic!("bar {i}: mismatch {other:?}"),
            }
        }
    }
}
