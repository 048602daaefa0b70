// =============================================================================
// Backtest Simulator — moving-average crossover replay
// =============================================================================
//
// State machine:  Flat --golden cross--> Long --death cross--> Flat
//
// A cross is only evaluated on bars where both SMAs exist at the current and
// the previous bar:
//   golden: prev_short <= prev_long && short > long
//   death:  prev_short >= prev_long && short < long
//
// Entries go all-in at the bar close; exits realise the full position. A
// position still open at the end of the data is marked to market in the final
// balance but is not counted as a trade, unless `close_open_position_at_end`
// asks for a forced close on the last bar.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MarketError, MarketResult};
use crate::indicators::SmaState;
use crate::market_data::Candle;

fn default_short_period() -> usize {
    9
}

fn default_long_period() -> usize {
    21
}

fn default_initial_balance() -> f64 {
    1000.0
}

/// Strategy and account parameters for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestParams {
    #[serde(default = "default_short_period")]
    pub short_period: usize,
    #[serde(default = "default_long_period")]
    pub long_period: usize,
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    /// Realise a still-open position at the last close and count it.
    #[serde(default)]
    pub close_open_position_at_end: bool,
}

impl Default for BacktestParams {
    fn default() -> Self {
        Self {
            short_period: default_short_period(),
            long_period: default_long_period(),
            initial_balance: default_initial_balance(),
            close_open_position_at_end: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Flat,
    Long,
}

/// A completed round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub pnl: f64,
}

/// A position left open when the data ran out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub entry_time: i64,
    pub entry_price: f64,
    pub quantity: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Number of closed trades.
    pub trades: usize,
    /// Cash plus the marked value of any open position.
    pub final_balance: f64,
    pub profit: f64,
    pub return_pct: f64,
    pub ledger: Vec<Trade>,
    pub open_position: Option<OpenPosition>,
}

#[derive(Debug, Clone)]
pub struct BacktestSimulator {
    params: BacktestParams,
}

impl BacktestSimulator {
    pub fn new(params: BacktestParams) -> MarketResult<Self> {
        if params.short_period == 0 || params.long_period == 0 {
            return Err(MarketError::InvalidParameter("SMA periods must be positive".into()));
        }
        if params.short_period >= params.long_period {
            return Err(MarketError::InvalidParameter(format!(
                "short period {} must be below long period {}",
                params.short_period, params.long_period
            )));
        }
        if !params.initial_balance.is_finite() || params.initial_balance <= 0.0 {
            return Err(MarketError::InvalidParameter(format!(
                "initial balance {} must be positive",
                params.initial_balance
            )));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &BacktestParams {
        &self.params
    }

    /// Replay ordered bars, using each bar's time in the ledger.
    pub fn run(&self, bars: &[Candle]) -> MarketResult<BacktestResult> {
        self.replay(bars.iter().map(|b| (b.time, b.close)), bars.len())
    }

    /// Replay bare closes; the bar index stands in for time.
    pub fn run_closes(&self, closes: &[f64]) -> MarketResult<BacktestResult> {
        self.replay(
            closes.iter().enumerate().map(|(i, &c)| (i as i64, c)),
            closes.len(),
        )
    }

    fn replay(
        &self,
        bars: impl Iterator<Item = (i64, f64)>,
        len: usize,
    ) -> MarketResult<BacktestResult> {
        let p = &self.params;
        if len < p.long_period {
            return Err(MarketError::InsufficientData {
                have: len,
                need: p.long_period,
            });
        }

        let mut short = SmaState::new(p.short_period);
        let mut long = SmaState::new(p.long_period);
        let mut prev: Option<(f64, f64)> = None;

        let mut state = PositionState::Flat;
        let mut cash = p.initial_balance;
        let mut quantity = 0.0;
        let mut entry = (0_i64, 0.0_f64);
        let mut last = (0_i64, 0.0_f64);
        let mut ledger = Vec::new();

        for (time, close) in bars {
            last = (time, close);
            let (Some(s), Some(l)) = (short.update(close), long.update(close)) else {
                continue;
            };

            if let Some((ps, pl)) = prev {
                let golden = ps <= pl && s > l;
                let death = ps >= pl && s < l;

                match state {
                    PositionState::Flat if golden => {
                        quantity = cash / close;
                        cash = 0.0;
                        entry = (time, close);
                        state = PositionState::Long;
                        debug!(time, price = close, quantity, "golden cross: entering long");
                    }
                    PositionState::Long if death => {
                        let trade = close_position(entry, (time, close), quantity);
                        cash = trade.exit_price * trade.quantity;
                        debug!(time, price = close, pnl = trade.pnl, "death cross: exiting to flat");
                        ledger.push(trade);
                        quantity = 0.0;
                        state = PositionState::Flat;
                    }
                    _ => {}
                }
            }
            prev = Some((s, l));
        }

        let mut open_position = None;
        if state == PositionState::Long {
            if p.close_open_position_at_end {
                let trade = close_position(entry, last, quantity);
                cash = trade.exit_price * trade.quantity;
                debug!(time = last.0, price = last.1, pnl = trade.pnl, "end of data: closing position");
                ledger.push(trade);
            } else {
                let mark = quantity * last.1;
                open_position = Some(OpenPosition {
                    entry_time: entry.0,
                    entry_price: entry.1,
                    quantity,
                    mark_price: last.1,
                    unrealized_pnl: mark - quantity * entry.1,
                });
                cash += mark;
            }
        }

        let final_balance = cash;
        let profit = final_balance - p.initial_balance;
        let result = BacktestResult {
            trades: ledger.len(),
            final_balance,
            profit,
            return_pct: profit / p.initial_balance * 100.0,
            ledger,
            open_position,
        };

        info!(
            bars = len,
            trades = result.trades,
            final_balance = result.final_balance,
            return_pct = result.return_pct,
            open = result.open_position.is_some(),
            "backtest complete"
        );
        Ok(result)
    }
}

fn close_position(entry: (i64, f64), exit: (i64, f64), quantity: f64) -> Trade {
    Trade {
        entry_time: entry.0,
        exit_time: exit.0,
        entry_price: entry.1,
        exit_price: exit.1,
        quantity,
        pnl: quantity * (exit.1 - entry.1),
    }
}

/// Convenience wrapper over [`BacktestSimulator`] with mark-to-market end of data.
///
/// A position still open after the last close is valued at that close but not
/// counted in `trades`; on the rising leg of a V-shaped path this gives 0
/// trades. To realise it as a closed trade instead, build the simulator with
/// [`BacktestParams::close_open_position_at_end`] set.
pub fn run_backtest(
    closes: &[f64],
    short_period: usize,
    long_period: usize,
    initial_balance: f64,
) -> MarketResult<BacktestResult> {
    BacktestSimulator::new(BacktestParams {
        short_period,
        long_period,
        initial_balance,
        close_open_position_at_end: false,
    })?
    .run_closes(closes)
}
