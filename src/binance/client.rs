// =============================================================================
// History Loader — public Binance REST market data
// =============================================================================
//
// One-shot fetches used to seed the stores: klines for a TimeSeriesStore and a
// depth snapshot for an OrderBookStore. Every request runs under a deadline;
// exceeding it aborts the request and surfaces `NetworkTimeout`. Non-2xx
// answers surface `HttpStatus` with the code and reason phrase.
// =============================================================================

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::error::{MarketError, MarketResult};
use crate::market_data::feed::{parse_levels, parse_string_f64};
use crate::market_data::{Candle, DepthSnapshot};

pub const DEFAULT_REST_BASE: &str = "https://api.binance.com/api/v3";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct HistoryLoader {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HistoryLoader {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a loader for `base_url` (e.g. `https://api.binance.com/api/v3`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> MarketResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MarketError::Transport(format!("failed to build HTTP client: {e}")))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, timeout_ms = timeout.as_millis() as u64, "HistoryLoader initialised");

        Ok(Self {
            base_url,
            timeout,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /klines — historical bars, oldest first.
    #[instrument(skip(self), name = "binance::fetch_klines")]
    pub async fn fetch_klines(&self, symbol: &str, interval: &str, limit: u32) -> MarketResult<Vec<Candle>> {
        let body = self
            .get_json(
                "/klines",
                &[
                    ("symbol", symbol.to_uppercase()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let candles = parse_klines(&body)?;
        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    /// GET /depth — full order-book snapshot.
    #[instrument(skip(self), name = "binance::fetch_depth")]
    pub async fn fetch_depth(&self, symbol: &str, limit: u32) -> MarketResult<DepthSnapshot> {
        let body = self
            .get_json(
                "/depth",
                &[("symbol", symbol.to_uppercase()), ("limit", limit.to_string())],
            )
            .await?;

        let snapshot = parse_depth_snapshot(&body)?;
        debug!(
            symbol,
            last_update_id = snapshot.last_update_id,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "depth snapshot fetched"
        );
        Ok(snapshot)
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> MarketResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let timed_out = || MarketError::NetworkTimeout {
            url: url.clone(),
            timeout_ms: self.timeout.as_millis() as u64,
        };

        let fetch = async {
            let resp = self.client.get(&url).query(query).send().await.map_err(|e| {
                if e.is_timeout() {
                    timed_out()
                } else {
                    MarketError::Transport(format!("GET {path} failed: {e}"))
                }
            })?;

            let status = resp.status();
            if !status.is_success() {
                let reason = status.canonical_reason().unwrap_or("Unknown").to_string();
                warn!(path, status = status.as_u16(), reason = %reason, "REST request rejected");
                return Err(MarketError::HttpStatus {
                    status: status.as_u16(),
                    reason,
                });
            }

            resp.json::<Value>().await.map_err(|e| {
                if e.is_timeout() {
                    timed_out()
                } else {
                    MarketError::MalformedMessage(format!("failed to parse {path} response: {e}"))
                }
            })
        };

        match tokio::time::timeout(self.timeout, fetch).await {
            Ok(result) => result,
            Err(_) => {
                warn!(path, timeout_ms = self.timeout.as_millis() as u64, "REST request timed out");
                Err(timed_out())
            }
        }
    }
}

impl std::fmt::Debug for HistoryLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryLoader")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Parse the klines array-of-arrays response.
///
/// Array indices:
///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
///   [6] closeTime, [7] quoteAssetVolume, [8] numberOfTrades,
///   [9] takerBuyBaseVolume, [10] takerBuyQuoteVolume, [11] ignore
pub fn parse_klines(body: &Value) -> MarketResult<Vec<Candle>> {
    let raw = body
        .as_array()
        .ok_or_else(|| MarketError::MalformedMessage("klines response is not an array".into()))?;

    let mut candles = Vec::with_capacity(raw.len());
    for entry in raw {
        let Some(arr) = entry.as_array().filter(|a| a.len() >= 6) else {
            warn!(entry = %entry, "skipping malformed kline entry");
            continue;
        };
        let open_time = arr[0]
            .as_i64()
            .ok_or_else(|| MarketError::MalformedMessage("kline open time is not an integer".into()))?;

        candles.push(Candle::new(
            open_time / 1000,
            parse_string_f64(&arr[1], "open")?,
            parse_string_f64(&arr[2], "high")?,
            parse_string_f64(&arr[3], "low")?,
            parse_string_f64(&arr[4], "close")?,
            parse_string_f64(&arr[5], "volume")?,
        ));
    }
    Ok(candles)
}

/// Parse `{ lastUpdateId, bids, asks }`.
pub fn parse_depth_snapshot(body: &Value) -> MarketResult<DepthSnapshot> {
    let bids = body
        .get("bids")
        .ok_or_else(|| MarketError::MalformedMessage("depth snapshot missing bids".into()))?;
    let asks = body
        .get("asks")
        .ok_or_else(|| MarketError::MalformedMessage("depth snapshot missing asks".into()))?;

    Ok(DepthSnapshot {
        last_update_id: body.get("lastUpdateId").and_then(Value::as_u64).unwrap_or(0),
        bids: parse_levels(bids, "bids")?,
        asks: parse_levels(asks, "asks")?,
    })
}
