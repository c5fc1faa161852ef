// =============================================================================
// Shared types used across the OHLC relay
// =============================================================================

use serde::{Deserialize, Serialize};

/// One observed trade, already decoded and canonicalised.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    /// Lower-cased instrument identifier, e.g. `btcusdt`.
    pub symbol: String,
    pub price: f64,
    /// Feed-supplied trade time (ms). Informational only.
    pub time: i64,
}

/// A completed OHLC bar as pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Bar-completion time, unix seconds.
    pub timestamp: i64,
    /// Wall-clock unix seconds of the first trade folded into this bar.
    #[serde(default)]
    pub open_time: i64,
}

/// Lifecycle of a single upstream feed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedState {
    Connecting,
    Streaming,
    Closed,
    Failed,
}

impl std::fmt::Display for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Closed => write!(f, "Closed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}
