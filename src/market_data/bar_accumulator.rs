use std::collections::HashMap;

use anyhow::{bail, Result};
use chrono::Utc;
use parking_lot::Mutex;

use crate::types::Bar;

// ---------------------------------------------------------------------------
// Live bar
// ---------------------------------------------------------------------------

/// In-progress OHLC state for one symbol. Never leaves the accumulator; only
/// finished [`Bar`] snapshots are handed out.
#[derive(Debug, Clone, Copy)]
struct LiveBar {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    opened_at: i64,
}

impl LiveBar {
    fn new(price: f64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
            opened_at: Utc::now().timestamp(),
        }
    }

    fn fold(&mut self, price: f64) {
        self.close = price;
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
    }

    fn finish(&self, symbol: &str, completed_at: i64) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            timestamp: completed_at,
            open_time: self.opened_at,
        }
    }
}

// ---------------------------------------------------------------------------
// BarAccumulator
// ---------------------------------------------------------------------------

/// Thread-safe OHLC accumulator holding at most one live bar per tracked
/// symbol.
///
/// The symbol set is fixed at construction, so the outer map is never mutated
/// and needs no lock of its own. Each slot has its own mutex: `apply` and
/// `take_and_reset` on the same symbol are mutually exclusive, while different
/// symbols never contend.
pub struct BarAccumulator {
    slots: HashMap<String, Mutex<Option<LiveBar>>>,
}

impl BarAccumulator {
    /// Create an accumulator with one empty slot per symbol.
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots = symbols
            .into_iter()
            .map(|s| (s.into(), Mutex::new(None)))
            .collect();
        Self { slots }
    }

    /// Whether `symbol` has a slot.
    pub fn tracks(&self, symbol: &str) -> bool {
        self.slots.contains_key(symbol)
    }

    /// Fold a trade price into the symbol's live bar, creating the bar if the
    /// slot is empty.
    pub fn apply(&self, symbol: &str, price: f64) -> Result<()> {
        let Some(slot) = self.slots.get(symbol) else {
            bail!("symbol {symbol} is not tracked");
        };

        let mut live = slot.lock();
        match live.as_mut() {
            Some(bar) => bar.fold(price),
            None => *live = Some(LiveBar::new(price)),
        }
        Ok(())
    }

    /// Detach the symbol's live bar and leave the slot empty.
    ///
    /// Returns `None` when no trade arrived since the last cut, which is the
    /// normal outcome for a quiet interval.
    pub fn take_and_reset(&self, symbol: &str) -> Option<Bar> {
        let slot = self.slots.get(symbol)?;
        let live = slot.lock().take()?;
        Some(live.finish(symbol, Utc::now().timestamp()))
    }

    /// Copy of the in-progress bar, stamped with the current time, without
    /// resetting it.
    pub fn peek(&self, symbol: &str) -> Option<Bar> {
        let slot = self.slots.get(symbol)?;
        let live = (*slot.lock())?;
        Some(live.finish(symbol, Utc::now().timestamp()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
