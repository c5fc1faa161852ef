// =============================================================================
// Feed Ingestor: one upstream aggTrade stream per symbol
// =============================================================================
//
// Each streaming session runs two concurrent activities:
//   1. the decode loop, folding every valid trade into the BarAccumulator;
//   2. a spawned interval timer that cuts the symbol's bar and queues it on
//      the broadcast router.
// They only meet inside the accumulator, so message volume can never delay a
// bar cut. When a session ends, however it ends, the timer is stopped and the
// live bar is cut and queued, so no bar spans two sessions.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{Stream, StreamExt};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, trace, warn};

use super::bar_accumulator::BarAccumulator;
use crate::broadcast::BarSender;
use crate::types::{FeedState, Tick};

/// Ingests trades for a single symbol.
pub struct FeedIngestor {
    symbol: String,
    url: String,
    bar_interval: Duration,
    accumulator: Arc<BarAccumulator>,
    bars: BarSender,
    state: RwLock<FeedState>,
}

impl FeedIngestor {
    pub fn new(
        symbol: impl Into<String>,
        url: impl Into<String>,
        bar_interval: Duration,
        accumulator: Arc<BarAccumulator>,
        bars: BarSender,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            url: url.into(),
            bar_interval,
            accumulator,
            bars,
            state: RwLock::new(FeedState::Connecting),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn state(&self) -> FeedState {
        *self.state.read()
    }

    fn set_state(&self, state: FeedState) {
        *self.state.write() = state;
        debug!(symbol = %self.symbol, state = %state, "feed state changed");
    }

    /// Connect to the upstream trade stream and ingest until it closes or
    /// fails.
    ///
    /// `Ok(())` means the stream ended cleanly (`Closed`); an error means the
    /// connection could not be established or broke (`Failed`). Either way the
    /// connection has been released when this returns.
    pub async fn run(&self) -> Result<()> {
        self.set_state(FeedState::Connecting);
        info!(url = %self.url, symbol = %self.symbol, "connecting to trade WebSocket");

        let ws_stream = match connect_async(&self.url).await {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                self.set_state(FeedState::Failed);
                error!(symbol = %self.symbol, error = %e, "trade WebSocket connect failed");
                return Err(e).context("failed to connect to trade WebSocket");
            }
        };

        info!(symbol = %self.symbol, "trade WebSocket connected");
        let (_write, read) = ws_stream.split();
        self.stream(read).await
    }

    /// Drive one streaming session over an already-open message stream.
    pub async fn stream<S>(&self, mut read: S) -> Result<()>
    where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        self.set_state(FeedState::Streaming);
        let _session = BarSession::start(
            self.symbol.clone(),
            self.bar_interval,
            self.accumulator.clone(),
            self.bars.clone(),
        );

        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.ingest(&text);
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(symbol = %self.symbol, frame = ?frame, "trade WebSocket close frame received");
                }
                Some(Ok(_)) => {
                    // Ping / Pong / Binary -- tungstenite answers pings itself.
                }
                Some(Err(e)) => {
                    self.set_state(FeedState::Failed);
                    error!(symbol = %self.symbol, error = %e, "trade WebSocket read error");
                    return Err(e.into());
                }
                None => {
                    self.set_state(FeedState::Closed);
                    warn!(symbol = %self.symbol, "trade WebSocket stream ended");
                    return Ok(());
                }
            }
        }
    }

    /// Decode one message and fold it in. Returns whether the trade was
    /// applied.
    fn ingest(&self, text: &str) -> bool {
        let tick = match parse_agg_trade(text) {
            Ok(tick) => tick,
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "failed to parse aggTrade message");
                return false;
            }
        };

        if !self.accumulator.tracks(&tick.symbol) {
            warn!(symbol = %self.symbol, tick_symbol = %tick.symbol, "trade for untracked symbol dropped");
            return false;
        }

        match self.accumulator.apply(&tick.symbol, tick.price) {
            Ok(()) => {
                trace!(symbol = %tick.symbol, price = tick.price, trade_time = tick.time, "trade applied");
                true
            }
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "trade rejected by accumulator");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Bar timer
// ---------------------------------------------------------------------------

/// Bar cutting for one streaming session.
///
/// On drop the interval timer is aborted and whatever is still live in the
/// slot is cut and queued as a partial bar.
struct BarSession {
    symbol: String,
    accumulator: Arc<BarAccumulator>,
    bars: BarSender,
    timer: JoinHandle<()>,
}

impl BarSession {
    fn start(
        symbol: String,
        period: Duration,
        accumulator: Arc<BarAccumulator>,
        bars: BarSender,
    ) -> Self {
        let timer = tokio::spawn(run_bar_timer(
            symbol.clone(),
            period,
            accumulator.clone(),
            bars.clone(),
        ));
        Self {
            symbol,
            accumulator,
            bars,
            timer,
        }
    }
}

impl Drop for BarSession {
    fn drop(&mut self) {
        self.timer.abort();

        let Some(bar) = self.accumulator.take_and_reset(&self.symbol) else {
            return;
        };
        info!(symbol = %self.symbol, open_time = bar.open_time, "flushing partial bar at session end");
        if let Err(e) = self.bars.send(bar) {
            warn!(symbol = %self.symbol, error = %e, "partial bar dropped");
        }
    }
}

async fn run_bar_timer(
    symbol: String,
    period: Duration,
    accumulator: Arc<BarAccumulator>,
    bars: BarSender,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(bar) = accumulator.take_and_reset(&symbol) else {
            debug!(symbol = %symbol, "no trades this interval");
            continue;
        };

        if let Err(e) = bars.send(bar) {
            warn!(symbol = %symbol, error = %e, "bar timer stopping");
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Message decoding
// ---------------------------------------------------------------------------

/// Parse a Binance aggTrade message into a canonical [`Tick`].
///
/// Expected shape:
/// ```json
/// { "e": "aggTrade", "s": "BTCUSDT", "p": "37000.00", "q": "0.123", "T": 1700000000000 }
/// ```
fn parse_agg_trade(text: &str) -> Result<Tick> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse aggTrade JSON")?;

    let symbol = root["s"]
        .as_str()
        .context("missing field s")?
        .trim()
        .to_lowercase();
    anyhow::ensure!(!symbol.is_empty(), "empty symbol");

    let price = parse_price(&root["p"])?;
    let time = root["T"].as_i64().unwrap_or_default();

    Ok(Tick { symbol, price, time })
}

/// Prices arrive as JSON strings, occasionally as numbers. Only finite,
/// strictly positive values are accepted.
fn parse_price(val: &serde_json::Value) -> Result<f64> {
    let price = match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse price as f64: {s}"))?,
        serde_json::Value::Number(n) => n.as_f64().context("price is not a valid f64")?,
        serde_json::Value::Null => anyhow::bail!("missing field p"),
        _ => anyhow::bail!("price has unexpected JSON type"),
    };

    anyhow::ensure!(
        price.is_finite() && price > 0.0,
        "price {price} is not a finite positive number"
    );
    Ok(price)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
