// =============================================================================
// Relay Configuration: static settings loaded once at startup
// =============================================================================
//
// All fields carry `#[serde(default)]` so that a partial (or empty) JSON file
// still loads. Environment variables override the file for the settings that
// are most often changed per deployment.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec![
        "btcusdt".to_string(),
        "ethusdt".to_string(),
        "pepeusdt".to_string(),
    ]
}

fn default_bar_interval_secs() -> u64 {
    60
}

fn default_bind_addr() -> String {
    "0.0.0.0:8081".to_string()
}

fn default_feed_endpoint() -> String {
    "wss://stream.binance.com:9443/ws/".to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_write_timeout_ms() -> u64 {
    5_000
}

// =============================================================================
// RelayConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Instruments to aggregate, one upstream connection each.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Bar length in seconds, shared by every instrument.
    #[serde(default = "default_bar_interval_secs")]
    pub bar_interval_secs: u64,

    /// Listen address for subscriber connections and the health endpoint.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Base URL of the upstream trade stream; `{symbol}@aggTrade` is appended.
    #[serde(default = "default_feed_endpoint")]
    pub feed_endpoint: String,

    /// Delay before a stopped feed is restarted. 0 leaves it stopped.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Upper bound on a single subscriber write before it counts as failed.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            bar_interval_secs: default_bar_interval_secs(),
            bind_addr: default_bind_addr(),
            feed_endpoint: default_feed_endpoint(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// Returns an error if the file is missing or malformed so the caller can
    /// fall back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read relay config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse relay config from {}", path.display()))?;

        info!(path = %path.display(), symbols = ?config.symbols, "relay config loaded");
        Ok(config)
    }

    /// Apply `RELAY_SYMBOLS` / `RELAY_BIND_ADDR` overrides.
    pub fn apply_env(&mut self) {
        if let Ok(syms) = std::env::var("RELAY_SYMBOLS") {
            self.symbols = syms.split(',').map(str::to_string).collect();
        }
        if let Ok(addr) = std::env::var("RELAY_BIND_ADDR") {
            if !addr.trim().is_empty() {
                self.bind_addr = addr.trim().to_string();
            }
        }
    }

    /// Canonicalise symbols (trimmed, lower-case, de-duplicated, order kept)
    /// and clamp the bar interval to at least one second.
    pub fn normalize(&mut self) {
        let mut seen = Vec::with_capacity(self.symbols.len());
        for sym in &self.symbols {
            let sym = sym.trim().to_lowercase();
            if !sym.is_empty() && !seen.contains(&sym) {
                seen.push(sym);
            }
        }
        self.symbols = seen;
        self.bar_interval_secs = self.bar_interval_secs.max(1);
    }

    pub fn bar_interval(&self) -> Duration {
        Duration::from_secs(self.bar_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Option<Duration> {
        (self.reconnect_delay_secs > 0).then(|| Duration::from_secs(self.reconnect_delay_secs))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn feed_url(&self, symbol: &str) -> String {
        format!("{}{symbol}@aggTrade", self.feed_endpoint)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.symbols, vec!["btcusdt", "ethusdt", "pepeusdt"]);
        assert_eq!(cfg.bar_interval(), Duration::from_secs(60));
        assert_eq!(cfg.bind_addr, "0.0.0.0:8081");
        assert_eq!(cfg.reconnect_delay(), Some(Duration::from_secs(5)));
        assert_eq!(cfg.write_timeout(), Duration::from_millis(5_000));
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RelayConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.symbols.len(), 3);
        assert_eq!(cfg.bar_interval_secs, 60);
        assert_eq!(cfg.feed_endpoint, "wss://stream.binance.com:9443/ws/");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbols": ["SOLUSDT"], "reconnect_delay_secs": 0 }"#;
        let cfg: RelayConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec!["SOLUSDT"]);
        assert_eq!(cfg.reconnect_delay(), None);
        assert_eq!(cfg.bind_addr, "0.0.0.0:8081");
    }

    #[test]
    fn normalize_canonicalises_symbols() {
        let mut cfg = RelayConfig {
            symbols: vec![" BTCUSDT".into(), "btcusdt".into(), "".into(), "EthUsdt ".into()],
            bar_interval_secs: 0,
            ..RelayConfig::default()
        };
        cfg.normalize();
        assert_eq!(cfg.symbols, vec!["btcusdt", "ethusdt"]);
        assert_eq!(cfg.bar_interval_secs, 1);
    }

    #[test]
    fn feed_url_appends_stream_name() {
        let cfg = RelayConfig::default();
        assert_eq!(
            cfg.feed_url("btcusdt"),
            "wss://stream.binance.com:9443/ws/btcusdt@aggTrade"
        );
    }

    #[test]
    fn load_missing_file_is_an_error() {
        assert!(RelayConfig::load("/definitely/not/here/relay_config.json").is_err());
    }
}
