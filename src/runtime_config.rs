// =============================================================================
// RuntimeConfig — the one config value threaded into every agent (spec §6/§9)
// =============================================================================
//
// The source mutates a module-wide config object; here it is a value owned
// by the Coordinator and handed to agents at construction. Persistence is an
// explicit load/save pair on a universe-scoped path, atomic via tmp+rename.
// Every field carries a serde default so an older on-disk config never fails
// to deserialize when a field is added.
// =============================================================================

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_strategy() -> String {
    "momentum".to_string()
}

fn default_watchlist() -> Vec<String> {
    vec!["AAPL".to_string(), "MSFT".to_string(), "GOOGL".to_string(), "AMZN".to_string()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchlistMode {
    Static,
    TopGainers,
}

impl Default for WatchlistMode {
    fn default() -> Self {
        WatchlistMode::Static
    }
}

fn default_top_gainers_count() -> usize {
    10
}
fn default_top_gainers_universe() -> Vec<String> {
    Vec::new()
}
fn default_top_gainers_min_price() -> f64 {
    5.0
}
fn default_top_gainers_min_volume() -> f64 {
    1_000_000.0
}
fn default_lookback_days() -> usize {
    30
}
fn default_momentum_threshold() -> f64 {
    0.02
}
fn default_sell_threshold() -> f64 {
    -0.02
}
fn default_stop_loss_pct() -> f64 {
    0.05
}
fn default_max_position_pct() -> f64 {
    0.1
}
fn default_min_trade_value() -> f64 {
    100.0
}
fn default_max_daily_trades() -> u32 {
    20
}
fn default_max_open_positions() -> usize {
    10
}
fn default_daily_loss_limit_pct() -> f64 {
    0.03
}
fn default_max_drawdown_pct() -> f64 {
    0.15
}
fn default_max_sector_exposure_pct() -> f64 {
    0.3
}
fn default_max_correlated_exposure_pct() -> f64 {
    0.4
}
fn default_correlation_threshold() -> f64 {
    0.7
}
fn default_correlation_lookback_days() -> usize {
    30
}
fn default_trade_interval() -> u64 {
    5
}
fn default_market_timezone() -> String {
    "America/New_York".to_string()
}

/// Strict boolean parse for `auto_trade`: the source had a real bug where
/// Python's `bool("false")` evaluates truthy. Accepts a fixed vocabulary,
/// case-insensitively, and rejects everything else rather than guessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrictBoolParseError(pub String);

impl fmt::Display for StrictBoolParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not a recognized boolean (expected true/false, yes/no, on/off, 1/0)", self.0)
    }
}

impl std::error::Error for StrictBoolParseError {}

pub fn parse_strict_bool(raw: &str) -> Result<bool, StrictBoolParseError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(StrictBoolParseError(other.to_string())),
    }
}

/// Wraps a `bool` but deserializes from either a JSON boolean or a string
/// via [`parse_strict_bool`], matching the config surface's documented
/// tolerance for `"yes"/"no"`-style operator input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StrictBool(pub bool);

impl<'de> Deserialize<'de> for StrictBool {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bool(b) => Ok(StrictBool(b)),
            Raw::Str(s) => parse_strict_bool(&s).map(StrictBool).map_err(serde::de::Error::custom),
        }
    }
}

impl FromStr for StrictBool {
    type Err = StrictBoolParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_strict_bool(s).map(StrictBool)
    }
}

fn default_auto_trade() -> StrictBool {
    StrictBool(false)
}

/// Top-level runtime configuration threaded into every agent at
/// construction and persisted at `data/<universe>/config_state.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_strategy")]
    pub strategy: String,

    #[serde(default = "default_watchlist")]
    pub watchlist: Vec<String>,
    #[serde(default)]
    pub watchlist_mode: WatchlistMode,
    #[serde(default = "default_top_gainers_count")]
    pub top_gainers_count: usize,
    #[serde(default = "default_top_gainers_universe")]
    pub top_gainers_universe: Vec<String>,
    #[serde(default = "default_top_gainers_min_price")]
    pub top_gainers_min_price: f64,
    #[serde(default = "default_top_gainers_min_volume")]
    pub top_gainers_min_volume: f64,

    #[serde(default = "default_lookback_days")]
    pub lookback_days: usize,
    #[serde(default = "default_momentum_threshold")]
    pub momentum_threshold: f64,
    #[serde(default = "default_sell_threshold")]
    pub sell_threshold: f64,

    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,
    #[serde(default = "default_min_trade_value")]
    pub min_trade_value: f64,

    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,

    #[serde(default = "default_daily_loss_limit_pct")]
    pub daily_loss_limit_pct: f64,
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,

    #[serde(default = "default_max_sector_exposure_pct")]
    pub max_sector_exposure_pct: f64,
    #[serde(default = "default_max_correlated_exposure_pct")]
    pub max_correlated_exposure_pct: f64,
    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: f64,
    #[serde(default = "default_correlation_lookback_days")]
    pub correlation_lookback_days: usize,

    /// Minutes between DataAgent ticks.
    #[serde(default = "default_trade_interval")]
    pub trade_interval: u64,
    #[serde(default = "default_auto_trade")]
    pub auto_trade: StrictBool,

    #[serde(default = "default_market_timezone")]
    pub market_timezone: String,
    #[serde(default)]
    pub sector_map_path: Option<String>,
    #[serde(default)]
    pub sector_map_json: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            watchlist: default_watchlist(),
            watchlist_mode: WatchlistMode::default(),
            top_gainers_count: default_top_gainers_count(),
            top_gainers_universe: default_top_gainers_universe(),
            top_gainers_min_price: default_top_gainers_min_price(),
            top_gainers_min_volume: default_top_gainers_min_volume(),
            lookback_days: default_lookback_days(),
            momentum_threshold: default_momentum_threshold(),
            sell_threshold: default_sell_threshold(),
            stop_loss_pct: default_stop_loss_pct(),
            max_position_pct: default_max_position_pct(),
            min_trade_value: default_min_trade_value(),
            max_daily_trades: default_max_daily_trades(),
            max_open_positions: default_max_open_positions(),
            daily_loss_limit_pct: default_daily_loss_limit_pct(),
            max_drawdown_pct: default_max_drawdown_pct(),
            max_sector_exposure_pct: default_max_sector_exposure_pct(),
            max_correlated_exposure_pct: default_max_correlated_exposure_pct(),
            correlation_threshold: default_correlation_threshold(),
            correlation_lookback_days: default_correlation_lookback_days(),
            trade_interval: default_trade_interval(),
            auto_trade: default_auto_trade(),
            market_timezone: default_market_timezone(),
            sector_map_path: None,
            sector_map_json: None,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`. Callers should fall
    /// back to `RuntimeConfig::default()` with a `tracing::warn!` when this
    /// errors — a missing config on first run is not fatal.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;
        info!(path = %path.display(), strategy = %config.strategy, "runtime config loaded");
        Ok(config)
    }

    /// Persist via an atomic tmp+rename so a crash mid-write never corrupts
    /// the on-disk config.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("failed to serialize runtime config")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config into place at {}", path.display()))?;
        info!(path = %path.display(), "runtime config saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.strategy, "momentum");
        assert_eq!(cfg.watchlist_mode, WatchlistMode::Static);
        assert_eq!(cfg.auto_trade, StrictBool(false));
        assert_eq!(cfg.market_timezone, "America/New_York");
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.strategy, "momentum");
        assert_eq!(cfg.max_daily_trades, 20);
        assert_eq!(cfg.correlation_lookback_days, 30);
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "strategy": "mean_reversion", "watchlist": ["TSLA"] }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.strategy, "mean_reversion");
        assert_eq!(cfg.watchlist, vec!["TSLA".to_string()]);
        assert_eq!(cfg.max_open_positions, 10);
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.watchlist, cfg2.watchlist);
        assert_eq!(cfg.auto_trade, cfg2.auto_trade);
    }

    #[test]
    fn strict_bool_accepts_vocabulary() {
        for s in ["true", "TRUE", "yes", "on", "1"] {
            assert_eq!(parse_strict_bool(s), Ok(true), "{s}");
        }
        for s in ["false", "FALSE", "no", "off", "0"] {
            assert_eq!(parse_strict_bool(s), Ok(false), "{s}");
        }
    }

    #[test]
    fn strict_bool_rejects_unknown_strings() {
        assert!(parse_strict_bool("enabled").is_err());
        assert!(parse_strict_bool("").is_err());
        assert!(parse_strict_bool("maybe").is_err());
    }

    #[test]
    fn auto_trade_deserializes_from_string_or_bool() {
        let cfg: RuntimeConfig = serde_json::from_str(r#"{"auto_trade": "yes"}"#).unwrap();
        assert_eq!(cfg.auto_trade, StrictBool(true));

        let cfg: RuntimeConfig = serde_json::from_str(r#"{"auto_trade": false}"#).unwrap();
        assert_eq!(cfg.auto_trade, StrictBool(false));

        let err = serde_json::from_str::<RuntimeConfig>(r#"{"auto_trade": "enabled"}"#);
        assert!(err.is_err());
    }
}
