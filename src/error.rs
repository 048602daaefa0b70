// =============================================================================
// Error taxonomy for the market-state core
// =============================================================================
//
// Transient feed failures never reach consumers as errors; the hub retries
// them internally and only publishes a status signal. Everything here is what
// propagates to callers of the REST loader, the stores and the backtester.
// =============================================================================

use thiserror::Error;

/// Typed failures surfaced by the library.
#[derive(Debug, Error)]
pub enum MarketError {
    /// A REST fetch exceeded its deadline and was aborted.
    #[error("request to {url} timed out after {timeout_ms} ms")]
    NetworkTimeout { url: String, timeout_ms: u64 },

    /// The upstream answered with a non-2xx status.
    #[error("HTTP {status} {reason}")]
    HttpStatus { status: u16, reason: String },

    /// A payload was missing required fields or had the wrong shape.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Too few samples for the requested computation.
    #[error("insufficient data: have {have} bars, need {need}")]
    InsufficientData { have: usize, need: usize },

    /// The feed for `key` could not be re-established.
    #[error("connection to {key} lost after {attempts} reconnect attempts")]
    ConnectionLost { key: String, attempts: u32 },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Seed input violated the strictly-ascending time invariant.
    #[error("bar {index} has time {time} which is not after {previous}")]
    OutOfOrder { index: usize, time: i64, previous: i64 },

    #[error("transport error: {0}")]
    Transport(String),
}

impl MarketError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkTimeout { .. } | Self::Transport(_) | Self::ConnectionLost { .. } => true,
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type MarketResult<T> = std::result::Result<T, MarketError>;
