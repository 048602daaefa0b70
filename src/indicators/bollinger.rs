// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Bollinger Bands consist of a middle band (SMA), an upper band (SMA + k*σ),
// and a lower band (SMA - k*σ), where σ is the population standard deviation
// of the same window. Band width is the normalised distance
// (upper - lower) / middle * 100.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PERIOD: usize = 20;
pub const DEFAULT_NUM_STD: f64 = 2.0;

/// Result of a Bollinger Band calculation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    /// Band width as a percentage of the middle band; `None` when the middle
    /// band is zero.
    pub fn width(&self) -> Option<f64> {
        if self.middle == 0.0 {
            return None;
        }
        let width = (self.upper - self.lower) / self.middle * 100.0;
        width.is_finite().then_some(width)
    }
}

/// Calculate Bollinger Bands over the last `period` closes.
///
/// Returns `None` when there are fewer than `period` closes or the result is
/// non-finite.
pub fn compute_bollinger(closes: &[f64], period: usize, num_std: f64) -> Option<BollingerBands> {
    if period == 0 || closes.len() < period {
        return None;
    }
    bands_over(closes[closes.len() - period..].iter().copied(), period, num_std)
}

fn bands_over(window: impl Iterator<Item = f64> + Clone, period: usize, num_std: f64) -> Option<BollingerBands> {
    let n = period as f64;
    let middle = window.clone().sum::<f64>() / n;
    let variance = window.map(|x| (x - middle).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let bands = BollingerBands {
        upper: middle + num_std * std_dev,
        middle,
        lower: middle - num_std * std_dev,
    };
    (bands.upper.is_finite() && bands.lower.is_finite()).then_some(bands)
}

/// Streaming Bollinger Bands. The deviation needs the whole window, so the
/// state keeps the last `period` committed closes.
#[derive(Debug, Clone)]
pub struct BollingerState {
    period: usize,
    num_std: f64,
    window: VecDeque<f64>,
    value: Option<BollingerBands>,
}

impl BollingerState {
    pub fn new(period: usize, num_std: f64) -> Self {
        Self {
            period,
            num_std,
            window: VecDeque::with_capacity(period + 1),
            value: None,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<BollingerBands> {
        if self.period == 0 {
            return None;
        }
        self.window.push_back(close);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        self.value = if self.window.len() == self.period {
            bands_over(self.window.iter().copied(), self.period, self.num_std)
        } else {
            None
        };
        self.value
    }

    pub fn peek(&self, close: f64) -> Option<BollingerBands> {
        if self.period == 0 || self.window.len() + 1 < self.period {
            return None;
        }
        let skip = self.window.len() + 1 - self.period;
        let window = self.window.iter().copied().chain(std::iter::once(close)).skip(skip);
        bands_over(window, self.period, self.num_std)
    }

    pub fn value(&self) -> Option<BollingerBands> {
        self.value
    }
}
