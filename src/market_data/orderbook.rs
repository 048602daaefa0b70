// =============================================================================
// Order Book Store — snapshot + sparse diff reconciliation
// =============================================================================
//
// Bids are kept descending and asks ascending by price, so index 0 is always
// the best level on each side. A level with zero quantity is never stored.
// After every snapshot or diff each side is cut back to `max_levels`, which
// drops the levels furthest from the mid.
//
// Diffs that arrive before the first snapshot are buffered and replayed in
// arrival order once it loads, minus those the snapshot already covers.
//
// Crossed books from upstream are passed through untouched.
// =============================================================================

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::market_data::feed::DepthDiff;
use crate::types::Side;

/// Default number of levels retained per side.
pub const DEFAULT_MAX_LEVELS: usize = 20;

/// One aggregated price level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Full-book REST snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub last_update_id: u64,
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

/// Derived top-of-book metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSummary {
    pub symbol: String,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub mid: Option<f64>,
    pub spread_bps: Option<f64>,
    pub bid_depth: f64,
    pub ask_depth: f64,
    /// (bid_depth - ask_depth) / total, in [-1, 1].
    pub imbalance: f64,
    pub last_update_id: Option<u64>,
}

/// Current best-available depth for one symbol.
#[derive(Debug, Clone)]
pub struct OrderBookStore {
    symbol: String,
    bids: Vec<OrderBookLevel>,
    asks: Vec<OrderBookLevel>,
    max_levels: usize,
    last_update_id: Option<u64>,
    seeded: bool,
    pending: Vec<DepthDiff>,
}

impl OrderBookStore {
    pub fn new(symbol: impl Into<String>, max_levels: usize) -> Self {
        Self {
            symbol: symbol.into(),
            bids: Vec::new(),
            asks: Vec::new(),
            max_levels: max_levels.max(1),
            last_update_id: None,
            seeded: false,
            pending: Vec::new(),
        }
    }

    /// Replace the entire book.
    pub fn load_snapshot(&mut self, bids: &[(f64, f64)], asks: &[(f64, f64)]) {
        self.replace_levels(bids, asks);
        self.last_update_id = None;
        self.replay_pending();
    }

    /// Replace the book from a REST snapshot and remember its update id.
    pub fn load(&mut self, snapshot: &DepthSnapshot) {
        self.replace_levels(&snapshot.bids, &snapshot.asks);
        self.last_update_id = Some(snapshot.last_update_id);
        self.replay_pending();
    }

    fn replace_levels(&mut self, bids: &[(f64, f64)], asks: &[(f64, f64)]) {
        self.bids.clear();
        self.asks.clear();
        for &(price, quantity) in bids {
            self.apply_level(Side::Bid, price, quantity);
        }
        for &(price, quantity) in asks {
            self.apply_level(Side::Ask, price, quantity);
        }
        self.truncate();
        self.seeded = true;
        debug!(
            symbol = %self.symbol,
            bids = self.bids.len(),
            asks = self.asks.len(),
            "order book snapshot loaded"
        );
    }

    fn replay_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);
        let replayed = pending.iter().filter(|diff| self.apply(diff)).count();
        debug!(
            symbol = %self.symbol,
            buffered = pending.len(),
            replayed,
            last_update_id = ?self.last_update_id,
            "buffered depth diffs replayed"
        );
    }

    /// Apply sparse `(price, quantity)` updates to each side independently.
    pub fn apply_diff(&mut self, bid_updates: &[(f64, f64)], ask_updates: &[(f64, f64)]) {
        for &(price, quantity) in bid_updates {
            self.apply_level(Side::Bid, price, quantity);
        }
        for &(price, quantity) in ask_updates {
            self.apply_level(Side::Ask, price, quantity);
        }
        self.truncate();
    }

    /// Apply a live diff event. Events whose final update id is not newer than
    /// the last applied one are ignored; returns whether the event was applied.
    /// Before the first snapshot the event is buffered instead.
    pub fn apply(&mut self, diff: &DepthDiff) -> bool {
        if !self.seeded {
            self.pending.push(diff.clone());
            debug!(symbol = %self.symbol, buffered = self.pending.len(), "depth diff buffered until snapshot");
            return false;
        }
        if let (Some(last), Some(final_id)) = (self.last_update_id, diff.final_update_id) {
            if final_id <= last {
                debug!(symbol = %self.symbol, final_id, last, "skipping stale depth diff");
                return false;
            }
        }
        self.apply_diff(&diff.bids, &diff.asks);
        if diff.final_update_id.is_some() {
            self.last_update_id = diff.final_update_id;
        }
        true
    }

    fn apply_level(&mut self, side: Side, price: f64, quantity: f64) {
        if !price.is_finite() || !quantity.is_finite() || quantity < 0.0 {
            warn!(symbol = %self.symbol, %side, price, quantity, "ignoring invalid depth level");
            return;
        }
        let levels = match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        let found = levels.binary_search_by(|l| side_order(side, l.price, price));
        match (found, quantity == 0.0) {
            (Ok(idx), true) => {
                levels.remove(idx);
            }
            (Ok(idx), false) => levels[idx].quantity = quantity,
            (Err(_), true) => {}
            (Err(idx), false) => levels.insert(idx, OrderBookLevel { price, quantity }),
        }
    }

    fn truncate(&mut self) {
        self.bids.truncate(self.max_levels);
        self.asks.truncate(self.max_levels);
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bids(&self) -> &[OrderBookLevel] {
        &self.bids
    }

    pub fn asks(&self) -> &[OrderBookLevel] {
        &self.asks
    }

    pub fn level(&self, side: Side, price: f64) -> Option<&OrderBookLevel> {
        let levels = match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        };
        levels
            .binary_search_by(|l| side_order(side, l.price, price))
            .ok()
            .map(|idx| &levels[idx])
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn last_update_id(&self) -> Option<u64> {
        self.last_update_id
    }

    pub fn max_levels(&self) -> usize {
        self.max_levels
    }

    /// Diffs waiting for the first snapshot.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn summary(&self) -> BookSummary {
        let best_bid = self.best_bid();
        let best_ask = self.best_ask();
        let mid = match (best_bid, best_ask) {
            (Some(b), Some(a)) => Some((b + a) / 2.0),
            _ => None,
        };
        let spread_bps = match (best_bid, best_ask, mid) {
            (Some(b), Some(a), Some(m)) if m > 0.0 => Some(((a - b) / m) * 10_000.0),
            _ => None,
        };

        let bid_depth: f64 = self.bids.iter().map(|l| l.quantity).sum();
        let ask_depth: f64 = self.asks.iter().map(|l| l.quantity).sum();
        let total_depth = bid_depth + ask_depth;
        let imbalance = if total_depth > 0.0 {
            (bid_depth - ask_depth) / total_depth
        } else {
            0.0
        };

        BookSummary {
            symbol: self.symbol.clone(),
            best_bid,
            best_ask,
            mid,
            spread_bps,
            bid_depth,
            ask_depth,
            imbalance,
            last_update_id: self.last_update_id,
        }
    }
}

/// Ordering of a stored level relative to `target` in its side's sort order.
fn side_order(side: Side, level_price: f64, target: f64) -> Ordering {
    match side {
        Side::Bid => target.total_cmp(&level_price),
        Side::Ask => level_price.total_cmp(&target),
    }
}
