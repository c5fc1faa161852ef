// =============================================================================
// Broadcast Router: single consumer of completed bars
// =============================================================================
//
// Every feed ingestor holds a `BarSender`; the router drains the shared queue
// in order and drives one registry delivery per bar. Because there is exactly
// one consumer, outbound writes are serialised and delivery order follows
// dequeue order.
// =============================================================================

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::registry::{Subscriber, SubscriberRegistry};
use crate::types::Bar;

/// Cloneable producer handle onto the router's queue.
#[derive(Clone)]
pub struct BarSender(pub(crate) mpsc::UnboundedSender<Bar>);

impl BarSender {
    /// Queue a completed bar. Never blocks; fails only once the router has
    /// stopped.
    pub fn send(&self, bar: Bar) -> Result<()> {
        self.0
            .send(bar)
            .map_err(|e| anyhow!("broadcast router has stopped; dropped bar for {}", e.0.symbol))
    }
}

pub struct BroadcastRouter<S> {
    bars: mpsc::UnboundedReceiver<Bar>,
    registry: Arc<SubscriberRegistry<S>>,
}

/// Create a router over `registry` together with the first producer handle.
pub fn channel<S: Subscriber>(
    registry: Arc<SubscriberRegistry<S>>,
) -> (BroadcastRouter<S>, BarSender) {
    let (tx, rx) = mpsc::unbounded_channel();
    let router = BroadcastRouter { bars: rx, registry };
    (router, BarSender(tx))
}

impl<S: Subscriber> BroadcastRouter<S> {
    /// Consume bars until every `BarSender` is dropped. Returns the number of
    /// bars routed.
    pub async fn run(mut self) -> u64 {
        let mut routed = 0u64;

        while let Some(bar) = self.bars.recv().await {
            info!(
                symbol = %bar.symbol,
                open = bar.open,
                high = bar.high,
                low = bar.low,
                close = bar.close,
                timestamp = bar.timestamp,
                "broadcasting bar"
            );

            let payload = match serde_json::to_string(&bar) {
                Ok(json) => json,
                Err(e) => {
                    warn!(symbol = %bar.symbol, error = %e, "failed to serialise bar; skipping");
                    continue;
                }
            };

            let report = self.registry.deliver_to_all(&payload).await;
            routed += 1;
            debug!(
                symbol = %bar.symbol,
                delivered = report.delivered,
                pruned = report.pruned,
                "bar delivered"
            );
        }

        info!(routed, "all bar producers closed; broadcast router stopping");
        routed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
