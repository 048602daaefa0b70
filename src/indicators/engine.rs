// =============================================================================
// Indicator Engine — incremental indicator set for one symbol+interval
// =============================================================================
//
// Each committed bar costs O(1) per calculator (Bollinger: O(period)). A bar
// is committed once it is closed, or once a newer bar supersedes it; until
// then it is evaluated with `peek` so the still-forming bar never pollutes the
// recurrence state. The batch functions in the sibling modules remain the
// reference the engine is tested against.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::bollinger::{BollingerBands, BollingerState};
use super::ema::EmaState;
use super::macd::{MacdState, MacdValue};
use super::rsi::RsiState;
use super::sma::SmaState;
use crate::market_data::Candle;

fn default_sma_period() -> usize {
    20
}

fn default_ema_period() -> usize {
    21
}

fn default_rsi_period() -> usize {
    14
}

fn default_macd_fast() -> usize {
    super::macd::DEFAULT_FAST
}

fn default_macd_slow() -> usize {
    super::macd::DEFAULT_SLOW
}

fn default_macd_signal() -> usize {
    super::macd::DEFAULT_SIGNAL
}

fn default_bollinger_period() -> usize {
    super::bollinger::DEFAULT_PERIOD
}

fn default_bollinger_num_std() -> f64 {
    super::bollinger::DEFAULT_NUM_STD
}

/// Calculator parameters for an [`IndicatorEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorParams {
    #[serde(default = "default_sma_period")]
    pub sma_period: usize,
    #[serde(default = "default_ema_period")]
    pub ema_period: usize,
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_macd_fast")]
    pub macd_fast: usize,
    #[serde(default = "default_macd_slow")]
    pub macd_slow: usize,
    #[serde(default = "default_macd_signal")]
    pub macd_signal: usize,
    #[serde(default = "default_bollinger_period")]
    pub bollinger_period: usize,
    #[serde(default = "default_bollinger_num_std")]
    pub bollinger_num_std: f64,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            sma_period: default_sma_period(),
            ema_period: default_ema_period(),
            rsi_period: default_rsi_period(),
            macd_fast: default_macd_fast(),
            macd_slow: default_macd_slow(),
            macd_signal: default_macd_signal(),
            bollinger_period: default_bollinger_period(),
            bollinger_num_std: default_bollinger_num_std(),
        }
    }
}

/// Latest indicator readings. `provisional` is set while the reading comes
/// from a bar that is still forming.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub time: Option<i64>,
    pub close: Option<f64>,
    pub sma: Option<f64>,
    pub ema: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<MacdValue>,
    pub bollinger: Option<BollingerBands>,
    pub provisional: bool,
}

#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    params: IndicatorParams,
    sma: SmaState,
    ema: EmaState,
    rsi: RsiState,
    macd: MacdState,
    bollinger: BollingerState,
    pending: Option<Candle>,
    last_committed: Option<i64>,
    committed_bars: usize,
    latest: IndicatorSnapshot,
}

impl IndicatorEngine {
    pub fn new(params: IndicatorParams) -> Self {
        Self {
            sma: SmaState::new(params.sma_period),
            ema: EmaState::new(params.ema_period),
            rsi: RsiState::new(params.rsi_period),
            macd: MacdState::new(params.macd_fast, params.macd_slow, params.macd_signal),
            bollinger: BollingerState::new(params.bollinger_period, params.bollinger_num_std),
            params,
            pending: None,
            last_committed: None,
            committed_bars: 0,
            latest: IndicatorSnapshot::default(),
        }
    }

    pub fn params(&self) -> &IndicatorParams {
        &self.params
    }

    /// Rebuild all state from an ordered history. Every bar but the last is
    /// committed; the last is treated as the bar still forming.
    pub fn seed(&mut self, bars: &[Candle]) -> &IndicatorSnapshot {
        *self = Self::new(self.params.clone());
        if let Some((last, closed)) = bars.split_last() {
            for bar in closed {
                self.commit(bar);
            }
            self.preview(*last);
        }
        debug!(bars = bars.len(), committed = self.committed_bars, "indicator engine seeded");
        &self.latest
    }

    /// Feed one live bar update.
    pub fn on_bar(&mut self, bar: Candle, closed: bool) -> &IndicatorSnapshot {
        if self.last_committed.is_some_and(|t| bar.time <= t) {
            debug!(time = bar.time, "ignoring update for an already committed bar");
            return &self.latest;
        }

        if let Some(pending) = self.pending {
            if bar.time > pending.time {
                self.commit(&pending);
            }
        }

        if closed {
            self.commit(&bar);
        } else {
            self.preview(bar);
        }
        &self.latest
    }

    pub fn snapshot(&self) -> &IndicatorSnapshot {
        &self.latest
    }

    pub fn committed_bars(&self) -> usize {
        self.committed_bars
    }

    fn commit(&mut self, bar: &Candle) {
        let close = bar.close;
        self.latest = IndicatorSnapshot {
            time: Some(bar.time),
            close: Some(close),
            sma: self.sma.update(close),
            ema: self.ema.update(close),
            rsi: self.rsi.update(close),
            macd: self.macd.update(close),
            bollinger: self.bollinger.update(close),
            provisional: false,
        };
        self.pending = None;
        self.last_committed = Some(bar.time);
        self.committed_bars += 1;
    }

    fn preview(&mut self, bar: Candle) {
        let close = bar.close;
        self.latest = IndicatorSnapshot {
            time: Some(bar.time),
            close: Some(close),
            sma: self.sma.peek(close),
            ema: self.ema.peek(close),
            rsi: self.rsi.peek(close),
            macd: self.macd.peek(close),
            bollinger: self.bollinger.peek(close),
            provisional: true,
        };
        self.pending = Some(bar);
    }
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self::new(IndicatorParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{bollinger, ema, macd, rsi, sma};

    fn bar(i: i64, close: f64) -> Candle {
        Candle::new(i * 60, close, close, close, close, 1.0)
    }

    fn closes(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + (i as f64 * 0.4).sin() * 6.0 + i as f64 * 0.05).collect()
    }

    fn assert_close(a: Option<f64>, b: Option<f64>) {
        match (a, b) {
            (Some(x), Some(y)) => assert!((x - y).abs() < 1e-9, "{x} vs {y}"),
            (None, None) => {}
            other => panic!("mismatch {other:?}"),
        }
    }

    fn assert_matches_batch(snap: &IndicatorSnapshot, closes: &[f64], p: &IndicatorParams) {
        assert_close(snap.sma, sma::compute_sma(closes, p.sma_period));
        assert_close(snap.ema, ema::compute_ema(closes, p.ema_period));
        assert_close(snap.rsi, rsi::compute_rsi(closes, p.rsi_period));
        let m = macd::compute_macd_with(closes, p.macd_fast, p.macd_slow, p.macd_signal);
        assert_close(snap.macd.map(|v| v.signal), m.map(|v| v.signal));
        assert_close(snap.macd.map(|v| v.macd), m.map(|v| v.macd));
        let b = bollinger::compute_bollinger(closes, p.bollinger_period, p.bollinger_num_std);
        assert_close(snap.bollinger.map(|v| v.upper), b.map(|v| v.upper));
    }

    #[test]
    fn closed_bars_match_batch() {
        let data = closes(80);
        let mut engine = IndicatorEngine::default();
        let params = engine.params().clone();
        for (i, &c) in data.iter().enumerate() {
            let snap = engine.on_bar(bar(i as i64, c), true).clone();
            assert!(!snap.provisional);
            assert_matches_batch(&snap, &data[..=i], &params);
        }
        assert_eq!(engine.committed_bars(), 80);
    }

    #[test]
    fn forming_bar_is_previewed_not_committed() {
        let data = closes(60);
        let mut engine = IndicatorEngine::default();
        let params = engine.params().clone();
        for (i, &c) in data.iter().enumerate() {
            engine.on_bar(bar(i as i64, c), true);
        }

        // Several ticks on the forming bar 60; state must behave as if only
        // the last tick were appended.
        for tick in [101.0, 97.0, 103.5] {
            let snap = engine.on_bar(bar(60, tick), false).clone();
            assert!(snap.provisional);
            let mut with_tick = data.clone();
            with_tick.push(tick);
            assert_matches_batch(&snap, &with_tick, &params);
        }
        assert_eq!(engine.committed_bars(), 60);

        // Bar 61 arrives without a closing message for 60: 60 is committed
        // with its last seen close.
        let snap = engine.on_bar(bar(61, 104.0), false).clone();
        assert_eq!(engine.committed_bars(), 61);
        let mut expected = data.clone();
        expected.extend([103.5, 104.0]);
        assert_matches_batch(&snap, &expected, &params);
    }

    #[test]
    fn seed_commits_all_but_last() {
        let data = closes(50);
        let bars: Vec<Candle> = data.iter().enumerate().map(|(i, &c)| bar(i as i64, c)).collect();
        let mut engine = IndicatorEngine::default();
        let params = engine.params().clone();
        let snap = engine.seed(&bars).clone();
        assert!(snap.provisional);
        assert_eq!(engine.committed_bars(), 49);
        assert_matches_batch(&snap, &data, &params);

        // Closing the forming bar commits it exactly once.
        engine.on_bar(bars[49], true);
        assert_eq!(engine.committed_bars(), 50);
        engine.on_bar(bars[49], true);
        assert_eq!(engine.committed_bars(), 50);
    }

    #[test]
    fn warmup_returns_none() {
        let mut engine = IndicatorEngine::default();
        let snap = engine.on_bar(bar(0, 10.0), true);
        assert_eq!(snap.close, Some(10.0));
        assert!(snap.sma.is_none());
        assert!(snap.rsi.is_none());
        assert!(snap.macd.is_none());
        assert!(snap.bollinger.is_none());
    }
}
