// =============================================================================
// Live feed payloads — kline and depth-diff messages
// =============================================================================
//
// The hub hands every subscriber the parsed JSON value; these helpers turn it
// into typed events. Messages may arrive bare or wrapped in the combined-stream
// envelope `{ "stream": ..., "data": { ... } }`.
// =============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MarketError, MarketResult};
use crate::market_data::series::Candle;

/// One kline update. `closed == false` means the bar may still change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KlineEvent {
    pub symbol: String,
    pub interval: Option<String>,
    pub event_time: Option<i64>,
    pub candle: Candle,
    pub closed: bool,
}

/// A sparse order-book diff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthDiff {
    pub first_update_id: Option<u64>,
    pub final_update_id: Option<u64>,
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

// ---------------------------------------------------------------------------
// Stream names
// ---------------------------------------------------------------------------

pub fn kline_stream(symbol: &str, interval: &str) -> String {
    format!("{}@kline_{interval}", symbol.to_lowercase())
}

pub fn depth_stream(symbol: &str) -> String {
    format!("{}@depth@100ms", symbol.to_lowercase())
}

/// Raw single-stream endpoint, e.g. `wss://host:9443/ws/btcusdt@kline_1m`.
pub fn stream_url(ws_base: &str, stream: &str) -> String {
    format!("{}/ws/{stream}", ws_base.trim_end_matches('/'))
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

fn unwrap_envelope(root: &Value) -> &Value {
    match root.get("data") {
        Some(data) if data.is_object() => data,
        _ => root,
    }
}

/// Parse a kline message.
///
/// Expected shape:
/// ```json
/// { "e": "kline", "E": 1700000001000, "s": "BTCUSDT",
///   "k": { "t": 1700000000000, "T": 1700000059999, "i": "1m",
///          "o": "37000.0", "h": "37050.0", "l": "36990.0", "c": "37020.0",
///          "v": "123.4", "x": false } }
/// ```
pub fn parse_kline(root: &Value) -> MarketResult<KlineEvent> {
    let data = unwrap_envelope(root);

    if let Some(kind) = data.get("e").and_then(Value::as_str) {
        if kind != "kline" {
            return Err(malformed(format!("unexpected event type {kind}")));
        }
    }

    let symbol = data
        .get("s")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing field s"))?
        .to_uppercase();

    let k = data.get("k").ok_or_else(|| malformed("missing field k"))?;

    let open_time = k
        .get("t")
        .and_then(Value::as_i64)
        .ok_or_else(|| malformed("missing field k.t"))?;

    let candle = Candle {
        time: open_time / 1000,
        open: parse_string_f64(&k["o"], "k.o")?,
        high: parse_string_f64(&k["h"], "k.h")?,
        low: parse_string_f64(&k["l"], "k.l")?,
        close: parse_string_f64(&k["c"], "k.c")?,
        volume: parse_string_f64(&k["v"], "k.v")?,
    };

    let closed = k
        .get("x")
        .and_then(Value::as_bool)
        .ok_or_else(|| malformed("missing field k.x"))?;

    Ok(KlineEvent {
        symbol,
        interval: k.get("i").and_then(Value::as_str).map(str::to_string),
        event_time: data.get("E").and_then(Value::as_i64),
        candle,
        closed,
    })
}

/// Parse a depth diff. Accepts the diff stream keys (`b`/`a`, `U`/`u`) and the
/// partial-book keys (`bids`/`asks`, `lastUpdateId`).
pub fn parse_depth_diff(root: &Value) -> MarketResult<DepthDiff> {
    let data = unwrap_envelope(root);

    let bids = data
        .get("b")
        .or_else(|| data.get("bids"))
        .ok_or_else(|| malformed("missing field b"))?;
    let asks = data
        .get("a")
        .or_else(|| data.get("asks"))
        .ok_or_else(|| malformed("missing field a"))?;

    Ok(DepthDiff {
        first_update_id: data.get("U").and_then(Value::as_u64),
        final_update_id: data
            .get("u")
            .or_else(|| data.get("lastUpdateId"))
            .and_then(Value::as_u64),
        bids: parse_levels(bids, "b")?,
        asks: parse_levels(asks, "a")?,
    })
}

/// Parse `[[price, qty], ...]` where each number may be a JSON string.
pub fn parse_levels(val: &Value, name: &str) -> MarketResult<Vec<(f64, f64)>> {
    let rows = val
        .as_array()
        .ok_or_else(|| malformed(format!("field {name} is not an array")))?;
    rows.iter()
        .map(|row| {
            let pair = row
                .as_array()
                .filter(|p| p.len() >= 2)
                .ok_or_else(|| malformed(format!("field {name} has a malformed level")))?;
            Ok((
                parse_string_f64(&pair[0], name)?,
                parse_string_f64(&pair[1], name)?,
            ))
        })
        .collect()
}

/// Binance sends numeric values as JSON strings; accept both forms.
pub fn parse_string_f64(val: &Value, name: &str) -> MarketResult<f64> {
    match val {
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| malformed(format!("failed to parse {name} as f64: {s}"))),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| malformed(format!("field {name} is not a valid f64"))),
        Value::Null => Err(malformed(format!("missing field {name}"))),
        _ => Err(malformed(format!("field {name} has unexpected JSON type"))),
    }
}

fn malformed(msg: impl Into<String>) -> MarketError {
    MarketError::MalformedMessage(msg.into())
}
