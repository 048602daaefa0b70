// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Each calculator comes in two forms: a pure batch function over a slice of
// closes (used by tests and the backtester) and a streaming state that holds
// only its recurrence state (the production path, driven by `engine`).
// Every result is an `Option`: `None` is the normal warm-up answer, never an
// error.

pub mod bollinger;
pub mod ema;
pub mod engine;
pub mod macd;
pub mod rsi;
pub mod sma;

pub use bollinger::{compute_bollinger, BollingerBands, BollingerState};
pub use ema::{calculate_ema, compute_ema, EmaState};
pub use engine::{IndicatorEngine, IndicatorParams, IndicatorSnapshot};
pub use macd::{compute_macd, compute_macd_with, MacdState, MacdValue};
pub use rsi::{calculate_rsi, compute_rsi, RsiState};
pub use sma::{calculate_sma, compute_sma, SmaState};
