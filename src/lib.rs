// =============================================================================
// Aurora Market — live and historical market state
// =============================================================================
//
// Ingests klines and depth from Binance, keeps ordered candle series and
// order books current, derives indicators incrementally, and replays a
// moving-average crossover backtest over history.
// =============================================================================

pub mod backtest;
pub mod binance;
pub mod error;
pub mod hub;
pub mod indicators;
pub mod market_data;
pub mod runtime_config;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use backtest::{run_backtest, BacktestParams, BacktestResult, BacktestSimulator, Trade};
pub use error::{MarketError, MarketResult};
pub use hub::{ConnectionHub, SubscriptionHandle};
pub use runtime_config::RuntimeConfig;
pub use session::{BookSession, MarketContext, SeriesSession};
pub use types::ConnectionStatus;
