// =============================================================================
// HTTP Surface: Axum 0.7
// =============================================================================
//
// `/ws` is the subscriber upgrade endpoint (kept at the root for existing
// dashboard clients); `/api/v1/health` reports pipeline status.
//
// CORS is fully permissive, matching the accept-any-origin websocket upgrade.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;
use crate::types::{Bar, FeedState};

// =============================================================================
// Router construction
// =============================================================================

/// Build the HTTP router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(crate::api::ws::ws_handler))
        .route("/api/v1/health", get(health))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    symbols: Vec<String>,
    bar_interval_secs: u64,
    subscribers: usize,
    feeds: BTreeMap<String, FeedState>,
    /// In-progress bars for symbols that have traded this interval.
    live_bars: BTreeMap<String, Bar>,
    uptime_secs: u64,
    /// Unix milliseconds; bar timestamps are unix seconds.
    server_time_ms: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let feeds = state
        .feeds
        .iter()
        .map(|f| (f.symbol().to_string(), f.state()))
        .collect();
    let live_bars = state
        .config
        .symbols
        .iter()
        .filter_map(|s| state.accumulator.peek(s).map(|bar| (s.clone(), bar)))
        .collect();

    Json(HealthResponse {
        status: "ok",
        symbols: state.config.symbols.clone(),
        bar_interval_secs: state.config.bar_interval_secs,
        subscribers: state.registry.len().await,
        feeds,
        live_bars,
        uptime_secs: state.start_time.elapsed().as_secs(),
        server_time_ms: chrono::Utc::now().timestamp_millis(),
    })
}
