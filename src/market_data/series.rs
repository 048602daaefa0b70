use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MarketError, MarketResult};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV bar. `time` is the bar open time in seconds and is the
/// unique key inside a [`TimeSeriesStore`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: String,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into().to_uppercase(),
            interval: interval.into(),
        }
    }
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

/// Length in seconds of a kline interval such as `1m`, `4h` or `1w`.
///
/// Month intervals (`1M`) have no fixed length and return `None`, as do
/// counts too large to express in seconds.
pub fn interval_seconds(interval: &str) -> Option<i64> {
    let unit = interval.chars().last()?;
    let count: i64 = interval[..interval.len() - unit.len_utf8()].parse().ok()?;
    let unit_secs = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3_600,
        'd' => 86_400,
        'w' => 604_800,
        _ => return None,
    };
    count.checked_mul(unit_secs).filter(|_| count > 0)
}

/// What [`TimeSeriesStore::upsert`] did with a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Same time as the newest bar: the still-forming bar was replaced.
    Replaced,
    /// Newer than every stored bar.
    Appended,
    /// Appended, and the oldest bar was evicted to respect capacity.
    AppendedWithEviction,
    /// Matched an older stored bar by time and overwrote it in place.
    Corrected,
    /// Older than the newest bar with no exact match; dropped.
    Discarded,
}

// ---------------------------------------------------------------------------
// TimeSeriesStore -- ordered, capacity-bounded bars for one symbol+interval
// ---------------------------------------------------------------------------

/// Authoritative ordered bar sequence for one symbol+interval.
///
/// Invariant: times are unique and strictly ascending, and the store never
/// holds more than `capacity` bars. Ordering wins over completeness: a stale
/// bar that matches nothing is dropped rather than inserted out of order.
#[derive(Debug, Clone)]
pub struct TimeSeriesStore {
    bars: VecDeque<Candle>,
    capacity: usize,
    interval_secs: Option<i64>,
}

impl TimeSeriesStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            bars: VecDeque::with_capacity(capacity + 1),
            capacity,
            interval_secs: None,
        }
    }

    /// Enable gap reporting for a fixed bar length. Non-positive lengths
    /// disable it.
    pub fn with_interval(mut self, interval_secs: Option<i64>) -> Self {
        self.interval_secs = interval_secs.filter(|&step| step > 0);
        self
    }

    /// Replace the buffer with `bars`, keeping only the newest `capacity`.
    ///
    /// Fails without modifying the store when `bars` is not strictly
    /// ascending by time.
    pub fn seed(&mut self, bars: &[Candle]) -> MarketResult<()> {
        if let Some(index) = bars.windows(2).position(|w| w[1].time <= w[0].time) {
            return Err(MarketError::OutOfOrder {
                index: index + 1,
                time: bars[index + 1].time,
                previous: bars[index].time,
            });
        }
        let start = bars.len().saturating_sub(self.capacity);
        self.bars.clear();
        self.bars.extend(bars[start..].iter().copied());
        debug!(
            received = bars.len(),
            kept = self.bars.len(),
            "time series seeded"
        );
        Ok(())
    }

    /// Insert or update a bar keyed by time.
    pub fn upsert(&mut self, bar: Candle) -> UpsertOutcome {
        let Some(last) = self.bars.back_mut() else {
            self.bars.push_back(bar);
            return UpsertOutcome::Appended;
        };

        if bar.time == last.time {
            *last = bar;
            return UpsertOutcome::Replaced;
        }

        if bar.time > last.time {
            let last_time = last.time;
            let missing = self
                .interval_secs
                .and_then(|step| bar.time.checked_sub(last_time).map(|span| span / step - 1));
            if let Some(missing) = missing {
                if missing > 0 {
                    warn!(
                        last_time,
                        time = bar.time,
                        missing,
                        "gap in bar sequence; appending without filler bars"
                    );
                }
            }
            self.bars.push_back(bar);
            if self.bars.len() > self.capacity {
                self.bars.pop_front();
                return UpsertOutcome::AppendedWithEviction;
            }
            return UpsertOutcome::Appended;
        }

        match self.bars.binary_search_by_key(&bar.time, |c| c.time) {
            Ok(idx) => {
                self.bars[idx] = bar;
                UpsertOutcome::Corrected
            }
            Err(_) => {
                debug!(time = bar.time, "discarding stale bar with no stored match");
                UpsertOutcome::Discarded
            }
        }
    }

    /// Point-in-time copy of the bars, oldest first. Restartable: iterate it
    /// as often as needed; later upserts do not affect it.
    pub fn snapshot(&self) -> Vec<Candle> {
        self.bars.iter().copied().collect()
    }

    /// Close prices, oldest first.
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|c| c.close).collect()
    }

    /// Volumes, oldest first.
    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|c| c.volume).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> + '_ {
        self.bars.iter()
    }

    pub fn get(&self, time: i64) -> Option<&Candle> {
        self.bars
            .binary_search_by_key(&time, |c| c.time)
            .ok()
            .map(|idx| &self.bars[idx])
    }

    pub fn last(&self) -> Option<&Candle> {
        self.bars.back()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(time: i64, close: f64) -> Candle {
        Candle::new(time, close, close + 1.0, close - 1.0, close, 10.0)
    }

    fn times(store: &TimeSeriesStore) -> Vec<i64> {
        store.iter().map(|c| c.time).collect()
    }

    #[test]
    fn seed_truncates_to_capacity() {
        let mut store = TimeSeriesStore::new(3);
        let bars: Vec<Candle> = (0..10).map(|i| bar(i * 60, i as f64)).collect();
        store.seed(&bars).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(times(&store), vec![420, 480, 540]);
    }

    #[test]
    fn seed_rejects_unordered_input() {
        let mut store = TimeSeriesStore::new(10);
        store.seed(&[bar(0, 1.0)]).unwrap();
        let err = store.seed(&[bar(60, 1.0), bar(60, 2.0)]).unwrap_err();
        assert!(matches!(err, MarketError::OutOfOrder { index: 1, time: 60, previous: 60 }));
        // Store left untouched.
        assert_eq!(times(&store), vec![0]);
    }

    #[test]
    fn upsert_same_time_replaces_last() {
        let mut store = TimeSeriesStore::new(10);
        store.seed(&[bar(0, 1.0), bar(60, 2.0)]).unwrap();
        assert_eq!(store.upsert(bar(60, 2.5)), UpsertOutcome::Replaced);
        assert_eq!(store.len(), 2);
        assert_eq!(store.last().unwrap().close, 2.5);
    }

    #[test]
    fn upsert_newer_appends_and_evicts() {
        let mut store = TimeSeriesStore::new(2);
        assert_eq!(store.upsert(bar(0, 1.0)), UpsertOutcome::Appended);
        assert_eq!(store.upsert(bar(60, 2.0)), UpsertOutcome::Appended);
        assert_eq!(store.upsert(bar(120, 3.0)), UpsertOutcome::AppendedWithEviction);
        assert_eq!(times(&store), vec![60, 120]);
    }

    #[test]
    fn upsert_older_match_corrects_in_place() {
        let mut store = TimeSeriesStore::new(10);
        store.seed(&[bar(0, 1.0), bar(60, 2.0), bar(120, 3.0)]).unwrap();
        assert_eq!(store.upsert(bar(60, 9.0)), UpsertOutcome::Corrected);
        assert_eq!(store.get(60).unwrap().close, 9.0);
        assert_eq!(times(&store), vec![0, 60, 120]);
    }

    #[test]
    fn upsert_stale_without_match_is_discarded() {
        let mut store = TimeSeriesStore::new(10);
        store.seed(&[bar(0, 1.0), bar(120, 3.0)]).unwrap();
        assert_eq!(store.upsert(bar(60, 2.0)), UpsertOutcome::Discarded);
        assert_eq!(times(&store), vec![0, 120]);
    }

    #[test]
    fn gap_is_appended_without_filler() {
        let mut store = TimeSeriesStore::new(10).with_interval(Some(60));
        store.seed(&[bar(0, 1.0)]).unwrap();
        assert_eq!(store.upsert(bar(300, 2.0)), UpsertOutcome::Appended);
        assert_eq!(times(&store), vec![0, 300]);
    }

    #[test]
    fn snapshot_is_detached() {
        let mut store = TimeSeriesStore::new(10);
        store.seed(&[bar(0, 1.0)]).unwrap();
        let view = store.snapshot();
        store.upsert(bar(0, 5.0));
        assert_eq!(view[0].close, 1.0);
        assert_eq!(store.closes(), vec![5.0]);
        assert_eq!(store.volumes(), vec![10.0]);
    }

    #[test]
    fn length_never_exceeds_capacity() {
        let mut store = TimeSeriesStore::new(5);
        for i in 0..50 {
            store.upsert(bar(i * 60, i as f64));
            store.upsert(bar(i * 60, i as f64 + 0.5));
            assert!(store.len() <= 5);
        }
        let t = times(&store);
        assert!(t.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn interval_parsing() {
        assert_eq!(interval_seconds("1m"), Some(60));
        assert_eq!(interval_seconds("15m"), Some(900));
        assert_eq!(interval_seconds("4h"), Some(14_400));
        assert_eq!(interval_seconds("1d"), Some(86_400));
        assert_eq!(interval_seconds("1M"), None);
        assert_eq!(interval_seconds("m"), None);
        assert_eq!(interval_seconds(""), None);
    }

    #[test]
    fn oversized_interval_has_no_fixed_length() {
        assert_eq!(interval_seconds("99999999999999999w"), None);
        assert_eq!(interval_seconds("9223372036854775807s"), Some(i64::MAX));
        assert_eq!(interval_seconds("-5m"), None);
    }

    #[test]
    fn extreme_times_do_not_break_gap_reporting() {
        let mut store = TimeSeriesStore::new(10).with_interval(Some(60));
        store.seed(&[bar(i64::MIN, 1.0)]).unwrap();
        assert_eq!(store.upsert(bar(i64::MAX, 2.0)), UpsertOutcome::Appended);
        assert_eq!(times(&store), vec![i64::MIN, i64::MAX]);

        let mut store = TimeSeriesStore::new(10).with_interval(Some(0));
        store.seed(&[bar(0, 1.0)]).unwrap();
        assert_eq!(store.upsert(bar(600, 2.0)), UpsertOutcome::Appended);
    }
}
