// =============================================================================
// Market Sessions — wiring history, live feed and stores per symbol
// =============================================================================
//
// A `SeriesSession` owns one symbol+interval: it renders the advisory cache
// first, seeds from REST history, then routes live klines from the hub into
// its TimeSeriesStore and IndicatorEngine. A `BookSession` does the same for
// one order book. Both receive their collaborators through `MarketContext`;
// nothing is process-global.
//
// Lock order inside live handlers: series before indicators.
// =============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::binance::{Connector, HistoryLoader};
use crate::error::MarketResult;
use crate::hub::{ConnectionHub, SubscriptionHandle};
use crate::indicators::{IndicatorEngine, IndicatorParams, IndicatorSnapshot};
use crate::market_data::feed::{depth_stream, kline_stream, parse_depth_diff, parse_kline};
use crate::market_data::{
    interval_seconds, BookSummary, Candle, CandleCache, CandleKey, OrderBookStore, TimeSeriesStore,
    UpsertOutcome,
};
use crate::runtime_config::RuntimeConfig;
use crate::types::ConnectionStatus;

/// Collaborators and sizing shared by every session.
#[derive(Clone, Debug)]
pub struct MarketContext {
    pub hub: ConnectionHub,
    pub loader: HistoryLoader,
    pub cache: Option<CandleCache>,
    pub series_capacity: usize,
    pub history_limit: u32,
    pub indicator_params: IndicatorParams,
    pub book_max_levels: usize,
    pub depth_snapshot_limit: u32,
}

impl MarketContext {
    pub fn from_config(config: &RuntimeConfig, connector: Arc<dyn Connector>) -> MarketResult<Self> {
        Ok(Self {
            hub: ConnectionHub::new(connector, config.ws_base_url.clone(), config.reconnect.clone()),
            loader: HistoryLoader::new(config.rest_base_url.clone(), config.http_timeout())?,
            cache: Some(CandleCache::new(config.cache_dir.clone())),
            series_capacity: config.series_capacity,
            history_limit: config.history_limit,
            indicator_params: config.indicators.clone(),
            book_max_levels: config.book_max_levels,
            depth_snapshot_limit: config.depth_snapshot_limit,
        })
    }
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

/// Where the bars currently in the store came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedSource {
    History,
    Cache,
}

pub struct SeriesSession {
    key: CandleKey,
    series: Arc<Mutex<TimeSeriesStore>>,
    indicators: Arc<Mutex<IndicatorEngine>>,
    hub: ConnectionHub,
    stream: String,
    source: SeedSource,
    subscription: SubscriptionHandle,
}

impl SeriesSession {
    /// Seed and go live. History failure falls back to the cache when there
    /// is one; without either the error propagates.
    pub async fn start(ctx: &MarketContext, symbol: &str, interval: &str) -> MarketResult<Self> {
        let key = CandleKey::new(symbol, interval);
        let series = Arc::new(Mutex::new(
            TimeSeriesStore::new(ctx.series_capacity).with_interval(interval_seconds(interval)),
        ));
        let indicators = Arc::new(Mutex::new(IndicatorEngine::new(ctx.indicator_params.clone())));

        let cached = ctx.cache.as_ref().and_then(|c| c.load(&key));
        let mut seeded_from_cache = false;
        if let Some(cached) = &cached {
            match reseed(&series, &indicators, &cached.candles) {
                Ok(()) => {
                    seeded_from_cache = true;
                    info!(key = %key, bars = cached.candles.len(), "rendered cached series");
                }
                Err(e) => warn!(key = %key, error = %e, "cached series rejected"),
            }
        }

        let source = match ctx.loader.fetch_klines(&key.symbol, &key.interval, ctx.history_limit).await {
            Ok(bars) => {
                reseed(&series, &indicators, &bars)?;
                if let Some(cache) = &ctx.cache {
                    if let Err(e) = cache.save(&key, &bars) {
                        warn!(key = %key, error = %e, "failed to update candle cache");
                    }
                }
                info!(key = %key, bars = bars.len(), "series seeded from history");
                SeedSource::History
            }
            Err(e) if seeded_from_cache => {
                warn!(key = %key, error = %e, "history fetch failed; continuing from cache");
                SeedSource::Cache
            }
            Err(e) => return Err(e),
        };

        let stream = kline_stream(&key.symbol, &key.interval);
        let subscription = {
            let key = key.clone();
            let series = series.clone();
            let indicators = indicators.clone();
            ctx.hub
                .subscribe(stream.clone(), move |msg: &Value| route_kline(&key, &series, &indicators, msg))
        };

        Ok(Self {
            key,
            series,
            indicators,
            hub: ctx.hub.clone(),
            stream,
            source,
            subscription,
        })
    }

    pub fn key(&self) -> &CandleKey {
        &self.key
    }

    pub fn source(&self) -> SeedSource {
        self.source
    }

    pub fn status(&self) -> ConnectionStatus {
        self.hub.status(&self.stream)
    }

    pub fn candles(&self) -> Vec<Candle> {
        self.series.lock().snapshot()
    }

    pub fn indicators(&self) -> IndicatorSnapshot {
        self.indicators.lock().snapshot().clone()
    }

    /// Replace the series with fresh bars, e.g. after a gap.
    pub fn reseed(&self, bars: &[Candle]) -> MarketResult<()> {
        reseed(&self.series, &self.indicators, bars)
    }

    pub fn close(self) {
        self.subscription.unsubscribe();
    }
}

impl std::fmt::Debug for SeriesSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesSession")
            .field("key", &self.key)
            .field("stream", &self.stream)
            .field("source", &self.source)
            .finish()
    }
}

fn reseed(
    series: &Mutex<TimeSeriesStore>,
    indicators: &Mutex<IndicatorEngine>,
    bars: &[Candle],
) -> MarketResult<()> {
    let mut series = series.lock();
    series.seed(bars)?;
    indicators.lock().seed(&series.snapshot());
    Ok(())
}

fn route_kline(
    key: &CandleKey,
    series: &Mutex<TimeSeriesStore>,
    indicators: &Mutex<IndicatorEngine>,
    msg: &Value,
) -> anyhow::Result<()> {
    let event = match parse_kline(msg) {
        Ok(ev) => ev,
        Err(e) => {
            warn!(key = %key, error = %e, "dropping kline message");
            return Ok(());
        }
    };
    if event.symbol != key.symbol || event.interval.as_deref().is_some_and(|iv| iv != key.interval) {
        debug!(key = %key, symbol = %event.symbol, "kline for another series ignored");
        return Ok(());
    }

    let mut series = series.lock();
    match series.upsert(event.candle) {
        UpsertOutcome::Discarded => {}
        UpsertOutcome::Corrected => {
            // A historical bar changed; recurrence state must be rebuilt.
            indicators.lock().seed(&series.snapshot());
        }
        UpsertOutcome::Replaced | UpsertOutcome::Appended | UpsertOutcome::AppendedWithEviction => {
            indicators.lock().on_bar(event.candle, event.closed);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Order book
// ---------------------------------------------------------------------------

pub struct BookSession {
    symbol: String,
    book: Arc<Mutex<OrderBookStore>>,
    hub: ConnectionHub,
    stream: String,
    subscription: SubscriptionHandle,
}

impl BookSession {
    /// Subscribe to diffs, then load the REST snapshot. Diffs that arrive
    /// while the snapshot is in flight are buffered by the book and replayed
    /// after it loads; those already covered are skipped by update id.
    pub async fn start(ctx: &MarketContext, symbol: &str) -> MarketResult<Self> {
        let symbol = symbol.to_uppercase();
        let book = Arc::new(Mutex::new(OrderBookStore::new(symbol.clone(), ctx.book_max_levels)));

        let stream = depth_stream(&symbol);
        let subscription = {
            let book = book.clone();
            let symbol = symbol.clone();
            ctx.hub.subscribe(stream.clone(), move |msg: &Value| {
                match parse_depth_diff(msg) {
                    Ok(diff) => {
                        book.lock().apply(&diff);
                    }
                    Err(e) => warn!(symbol = %symbol, error = %e, "dropping depth message"),
                }
                Ok(())
            })
        };

        let snapshot = ctx.loader.fetch_depth(&symbol, ctx.depth_snapshot_limit).await?;
        book.lock().load(&snapshot);
        info!(symbol = %symbol, last_update_id = snapshot.last_update_id, "order book seeded");

        Ok(Self {
            symbol,
            book,
            hub: ctx.hub.clone(),
            stream,
            subscription,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn status(&self) -> ConnectionStatus {
        self.hub.status(&self.stream)
    }

    pub fn summary(&self) -> BookSummary {
        self.book.lock().summary()
    }

    /// Run `f` against the current book.
    pub fn with_book<R>(&self, f: impl FnOnce(&OrderBookStore) -> R) -> R {
        f(&self.book.lock())
    }

    pub fn close(self) {
        self.subscription.unsubscribe();
    }
}

impl std::fmt::Debug for BookSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookSession")
            .field("symbol", &self.symbol)
            .field("stream", &self.stream)
            .finish()
    }
}
