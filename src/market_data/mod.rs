pub mod cache;
pub mod feed;
pub mod orderbook;
pub mod series;

// Re-export the core types for convenient access (e.g. `use crate::market_data::Candle`).
pub use cache::{CachedSeries, CandleCache};
pub use feed::{DepthDiff, KlineEvent};
pub use orderbook::{BookSummary, DepthSnapshot, OrderBookLevel, OrderBookStore};
pub use series::{interval_seconds, Candle, CandleKey, TimeSeriesStore, UpsertOutcome};
