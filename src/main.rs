// =============================================================================
// Aurora Market — Main Entry Point
// =============================================================================
//
//   aurora-market            follow the configured feeds until Ctrl+C
//   aurora-market backtest   replay the crossover strategy over history
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use aurora_market::backtest::BacktestSimulator;
use aurora_market::binance::{HistoryLoader, WsConnector};
use aurora_market::runtime_config::RuntimeConfig;
use aurora_market::session::{BookSession, MarketContext, SeriesSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Aurora Market — Starting Up                      ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path = RuntimeConfig::path_from_env();
    let config = RuntimeConfig::effective(&config_path);

    info!(symbols = ?config.symbols, intervals = ?config.intervals, "Configured feeds");

    if std::env::args().nth(1).as_deref() == Some("backtest") {
        return run_backtests(&config).await;
    }

    // ── 2. Shared collaborators ──────────────────────────────────────────
    let ctx = MarketContext::from_config(&config, Arc::new(WsConnector))?;

    // ── 3. Seed and subscribe ────────────────────────────────────────────
    let mut series = Vec::new();
    for symbol in &config.symbols {
        for interval in &config.intervals {
            match SeriesSession::start(&ctx, symbol, interval).await {
                Ok(session) => series.push(session),
                Err(e) => error!(symbol = %symbol, interval = %interval, error = %e, "Series session failed to start"),
            }
        }
    }

    let mut books = Vec::new();
    if config.order_book {
        for symbol in &config.symbols {
            match BookSession::start(&ctx, symbol).await {
                Ok(session) => books.push(session),
                Err(e) => error!(symbol = %symbol, error = %e, "Order book session failed to start"),
            }
        }
    }

    info!(
        series = series.len(),
        books = books.len(),
        connections = ctx.hub.active_keys().len(),
        "All feeds running. Press Ctrl+C to stop."
    );

    // ── 4. Periodic state report until shutdown ──────────────────────────
    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = ticker.tick() => report(&series, &books),
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }
    warn!("Shutdown signal received — stopping gracefully");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    for session in series {
        session.close();
    }
    for session in books {
        session.close();
    }

    info!("Aurora Market shut down complete.");
    Ok(())
}

fn report(series: &[SeriesSession], books: &[BookSession]) {
    for session in series {
        let snap = session.indicators();
        info!(
            key = %session.key(),
            status = %session.status(),
            bars = session.candles().len(),
            close = ?snap.close,
            sma = ?snap.sma,
            ema = ?snap.ema,
            rsi = ?snap.rsi,
            macd = ?snap.macd.map(|m| m.macd),
            "series state"
        );
    }
    for session in books {
        let summary = session.summary();
        info!(
            symbol = %session.symbol(),
            status = %session.status(),
            best_bid = ?summary.best_bid,
            best_ask = ?summary.best_ask,
            spread_bps = ?summary.spread_bps,
            imbalance = summary.imbalance,
            "book state"
        );
    }
}

async fn run_backtests(config: &RuntimeConfig) -> anyhow::Result<()> {
    let loader = HistoryLoader::new(config.rest_base_url.clone(), config.http_timeout())?;
    let simulator = BacktestSimulator::new(config.backtest.clone())?;

    for symbol in &config.symbols {
        for interval in &config.intervals {
            let bars = match loader.fetch_klines(symbol, interval, config.history_limit).await {
                Ok(bars) => bars,
                Err(e) => {
                    error!(symbol = %symbol, interval = %interval, error = %e, "History fetch failed");
                    continue;
                }
            };
            match simulator.run(&bars) {
                Ok(result) => info!(
                    symbol = %symbol,
                    interval = %interval,
                    trades = result.trades,
                    final_balance = result.final_balance,
                    profit = result.profit,
                    return_pct = result.return_pct,
                    open = result.open_position.is_some(),
                    "Backtest summary"
                ),
                Err(e) => error!(symbol = %symbol, interval = %interval, error = %e, "Backtest failed"),
            }
        }
    }
    Ok(())
}
