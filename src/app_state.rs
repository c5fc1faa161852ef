// =============================================================================
// Central Application State: OHLC relay
// =============================================================================
//
// Ties the pipeline together: one BarAccumulator shared by every feed, one
// FeedIngestor per symbol, and the subscriber registry the broadcast router
// delivers into. The router itself is handed back to the caller to spawn.
// =============================================================================

use std::sync::Arc;

use crate::api::ws::WsSubscriber;
use crate::broadcast::{self, BroadcastRouter, SubscriberRegistry};
use crate::market_data::{BarAccumulator, FeedIngestor};
use crate::runtime_config::RelayConfig;

/// Shared state handed to the HTTP layer via `Arc<AppState>`.
pub struct AppState {
    pub config: RelayConfig,
    pub accumulator: Arc<BarAccumulator>,
    pub registry: Arc<SubscriberRegistry<WsSubscriber>>,
    pub feeds: Vec<Arc<FeedIngestor>>,
    /// Instant when the relay was started. Used for uptime reporting.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Build the pipeline for `config`. The returned router must be spawned
    /// for bars to reach subscribers.
    pub fn new(config: RelayConfig) -> (Self, BroadcastRouter<WsSubscriber>) {
        let accumulator = Arc::new(BarAccumulator::new(config.symbols.iter().cloned()));
        let registry = Arc::new(SubscriberRegistry::new(config.write_timeout()));
        let (router, bars) = broadcast::channel(registry.clone());

        let feeds = config
            .symbols
            .iter()
            .map(|symbol| {
                Arc::new(FeedIngestor::new(
                    symbol.clone(),
                    config.feed_url(symbol),
                    config.bar_interval(),
                    accumulator.clone(),
                    bars.clone(),
                ))
            })
            .collect();

        let state = Self {
            config,
            accumulator,
            registry,
            feeds,
            start_time: std::time::Instant::now(),
        };
        (state, router)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeedState;

    #[test]
    fn one_feed_per_symbol() {
        let (state, _router) = AppState::new(RelayConfig::default());
        let symbols: Vec<&str> = state.feeds.iter().map(|f| f.symbol()).collect();
        assert_eq!(symbols, vec!["btcusdt", "ethusdt", "pepeusdt"]);
        assert!(state.feeds.iter().all(|f| f.state() == FeedState::Connecting));
        assert!(state.accumulator.tracks("pepeusdt"));
    }
}
