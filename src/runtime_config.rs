// =============================================================================
// Runtime Configuration — market-state settings with atomic save
// =============================================================================
//
// Every tunable lives here: which feeds to follow, where to fetch history,
// store capacities, reconnect policy, indicator and backtest parameters.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backtest::BacktestParams;
use crate::binance::DEFAULT_REST_BASE;
use crate::hub::ReconnectPolicy;
use crate::indicators::IndicatorParams;
use crate::market_data::orderbook::DEFAULT_MAX_LEVELS;

/// Config file used when `AURORA_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "aurora_market.json";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
}

fn default_intervals() -> Vec<String> {
    vec!["1m".to_string()]
}

fn default_rest_base_url() -> String {
    DEFAULT_REST_BASE.to_string()
}

fn default_ws_base_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}

fn default_history_limit() -> u32 {
    500
}

fn default_series_capacity() -> usize {
    1000
}

fn default_book_max_levels() -> usize {
    DEFAULT_MAX_LEVELS
}

fn default_depth_snapshot_limit() -> u32 {
    100
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".aurora_cache")
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Feeds ---------------------------------------------------------------

    /// Symbols to follow, uppercase (e.g. `BTCUSDT`).
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Kline intervals per symbol (e.g. `1m`, `5m`).
    #[serde(default = "default_intervals")]
    pub intervals: Vec<String>,

    /// Follow the depth stream and keep an order book per symbol.
    #[serde(default)]
    pub order_book: bool,

    // --- Endpoints -----------------------------------------------------------

    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,

    /// Deadline for every REST request.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    // --- Stores --------------------------------------------------------------

    /// Bars requested when seeding a series.
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,

    /// Maximum bars kept per symbol+interval.
    #[serde(default = "default_series_capacity")]
    pub series_capacity: usize,

    /// Levels retained per book side.
    #[serde(default = "default_book_max_levels")]
    pub book_max_levels: usize,

    /// Levels requested in the REST depth snapshot.
    #[serde(default = "default_depth_snapshot_limit")]
    pub depth_snapshot_limit: u32,

    /// Directory of the advisory candle cache.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    // --- Analytics -----------------------------------------------------------

    #[serde(default)]
    pub indicators: IndicatorParams,

    #[serde(default)]
    pub backtest: BacktestParams,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            intervals: default_intervals(),
            order_book: false,
            rest_base_url: default_rest_base_url(),
            ws_base_url: default_ws_base_url(),
            http_timeout_ms: default_http_timeout_ms(),
            reconnect: ReconnectPolicy::default(),
            history_limit: default_history_limit(),
            series_capacity: default_series_capacity(),
            book_max_levels: default_book_max_levels(),
            depth_snapshot_limit: default_depth_snapshot_limit(),
            cache_dir: default_cache_dir(),
            indicators: IndicatorParams::default(),
            backtest: BacktestParams::default(),
        }
    }
}

impl RuntimeConfig {
    /// Path from `AURORA_CONFIG`, or [`DEFAULT_CONFIG_PATH`].
    pub fn path_from_env() -> PathBuf {
        std::env::var("AURORA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            intervals = ?config.intervals,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Configuration for this run: the file at `path` (defaults when it is
    /// missing or invalid) with environment overrides on top. The file itself
    /// is never rewritten.
    pub fn effective(path: impl AsRef<Path>) -> Self {
        let mut config = Self::load(path).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            Self::default()
        });
        config.apply_env_overrides();
        config
    }

    /// Apply `AURORA_SYMBOLS` / `AURORA_INTERVALS` overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(syms) = std::env::var("AURORA_SYMBOLS") {
            self.set_symbols(&syms);
        }
        if let Ok(ivs) = std::env::var("AURORA_INTERVALS") {
            self.set_intervals(&ivs);
        }
    }

    /// Replace the symbol list from a comma-separated value. Empty input
    /// leaves the current list untouched.
    pub fn set_symbols(&mut self, csv: &str) {
        let parsed = split_csv(csv, true);
        if parsed.is_empty() {
            warn!(value = csv, "ignoring empty symbol override");
        } else {
            self.symbols = parsed;
        }
    }

    pub fn set_intervals(&mut self, csv: &str) {
        let parsed = split_csv(csv, false);
        if parsed.is_empty() {
            warn!(value = csv, "ignoring empty interval override");
        } else {
            self.intervals = parsed;
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

fn split_csv(csv: &str, uppercase: bool) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| if uppercase { s.to_uppercase() } else { s.to_string() })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(cfg.intervals, vec!["1m"]);
        assert_eq!(cfg.rest_base_url, "https://api.binance.com/api/v3");
        assert_eq!(cfg.http_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.book_max_levels, 20);
        assert_eq!(cfg.reconnect.max_attempts, None);
        assert_eq!(cfg.indicators.rsi_period, 14);
        assert!(!cfg.backtest.close_open_position_at_end);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.series_capacity, 1000);
        assert_eq!(cfg.history_limit, 500);
        assert_eq!(cfg.indicators.macd_slow, 26);
        assert_eq!(cfg.backtest.long_period, 21);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "symbols": ["SOLUSDT"],
            "reconnect": { "max_attempts": 3 },
            "indicators": { "sma_period": 50 },
            "backtest": { "close_open_position_at_end": true }
        }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec!["SOLUSDT"]);
        assert_eq!(cfg.reconnect.max_attempts, Some(3));
        assert_eq!(cfg.reconnect.initial_delay_ms, 500);
        assert_eq!(cfg.indicators.sma_period, 50);
        assert_eq!(cfg.indicators.ema_period, 21);
        assert!(cfg.backtest.close_open_position_at_end);
        assert_eq!(cfg.backtest.short_period, 9);
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aurora_market.json");
        let mut cfg = RuntimeConfig::default();
        cfg.set_symbols("bnbusdt, xrpusdt");
        cfg.save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.symbols, vec!["BNBUSDT", "XRPUSDT"]);
        assert_eq!(loaded.cache_dir, cfg.cache_dir);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RuntimeConfig::load(dir.path().join("nope.json")).is_err());
    }

    #[test]
    fn csv_overrides_trim_and_skip_empty() {
        let mut cfg = RuntimeConfig::default();
        cfg.set_intervals(" 1m, ,5m ");
        assert_eq!(cfg.intervals, vec!["1m", "5m"]);
        cfg.set_symbols(" , ");
        assert_eq!(cfg.symbols, vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn env_overrides_are_not_written_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aurora_market.json");
        let mut on_disk = RuntimeConfig::default();
        on_disk.set_intervals("1h");
        on_disk.save(&path).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        std::env::set_var("AURORA_INTERVALS", "5m,15m");
        let cfg = RuntimeConfig::effective(&path);
        std::env::remove_var("AURORA_INTERVALS");

        assert_eq!(cfg.intervals, vec!["5m", "15m"]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
        assert_eq!(RuntimeConfig::load(&path).unwrap().intervals, vec!["1h"]);
    }
}
