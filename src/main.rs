// =============================================================================
// OHLC Relay: Main Entry Point
// =============================================================================
//
// One feed ingestor per configured symbol folds trades into shared OHLC
// accumulators; completed bars flow through a single broadcast router to every
// connected websocket subscriber.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod broadcast;
mod market_data;
mod runtime_config;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::runtime_config::RelayConfig;

const CONFIG_PATH: &str = "relay_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = RelayConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RelayConfig::default()
    });
    config.apply_env();
    config.normalize();
    if config.symbols.is_empty() {
        warn!("No symbols configured, falling back to defaults");
        config.symbols = RelayConfig::default().symbols;
    }

    info!(
        symbols = ?config.symbols,
        bar_interval_secs = config.bar_interval_secs,
        "Configured instruments"
    );

    // ── 2. Build pipeline ────────────────────────────────────────────────
    let (state, router) = AppState::new(config);
    let state = Arc::new(state);

    // ── 3. Broadcast router ──────────────────────────────────────────────
    tokio::spawn(async move {
        let routed = router.run().await;
        error!(routed, "Broadcast router exited");
    });

    // ── 4. Feed ingestors (one supervised task per symbol) ───────────────
    let reconnect_delay = state.config.reconnect_delay();
    for feed in &state.feeds {
        let feed = feed.clone();
        tokio::spawn(async move {
            loop {
                match feed.run().await {
                    Ok(()) => warn!(symbol = %feed.symbol(), "Trade stream closed"),
                    Err(e) => error!(symbol = %feed.symbol(), error = %e, "Trade stream failed"),
                }
                let Some(delay) = reconnect_delay else {
                    warn!(symbol = %feed.symbol(), "Reconnect disabled; ingestion stopped");
                    return;
                };
                info!(symbol = %feed.symbol(), delay_secs = delay.as_secs(), "Restarting trade stream");
                tokio::time::sleep(delay).await;
            }
        });
    }

    info!(count = state.feeds.len(), "Feed ingestors launched");

    // ── 5. Subscriber-facing server ──────────────────────────────────────
    let bind_addr = state.config.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind subscriber listener on {bind_addr}"))?;
    info!(addr = %bind_addr, "Websocket server listening");

    let app = api::rest::router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            warn!("Shutdown signal received");
        })
        .await
        .context("subscriber server failed")?;

    info!("OHLC relay shut down.");
    Ok(())
}
