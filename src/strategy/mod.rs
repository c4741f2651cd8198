// =============================================================================
// Strategy — pluggable signal-generation interface
// =============================================================================
//
// The source treats a strategy as a single operation (`analyze`) producing a
// value; the interface here is two read-only methods plus the operation,
// with a small named registry so `RuntimeConfig.strategy` can select among
// them. Reproducing every strategy's specific formula is explicitly a
// non-goal — only the interface and a momentum default are fully built out.
// =============================================================================

mod momentum;

pub use momentum::MomentumStrategy;

use std::fmt;

use serde_json::Value;

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A time-ordered (oldest first) sequence of bars, the Rust stand-in for the
/// source's pandas DataFrame.
#[derive(Debug, Clone, Default)]
pub struct Bars(pub Vec<Bar>);

impl Bars {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.0.iter().map(|b| b.close).collect()
    }

    /// Serializes to the `{close: {"0": ..}, open: {...}, ...}` shape
    /// `from_value` parses, indexed by position so order round-trips.
    pub fn to_value(&self) -> Value {
        let mut open = serde_json::Map::new();
        let mut high = serde_json::Map::new();
        let mut low = serde_json::Map::new();
        let mut close = serde_json::Map::new();
        let mut volume = serde_json::Map::new();
        for (i, bar) in self.0.iter().enumerate() {
            let idx = i.to_string();
            open.insert(idx.clone(), serde_json::json!(bar.open));
            high.insert(idx.clone(), serde_json::json!(bar.high));
            low.insert(idx.clone(), serde_json::json!(bar.low));
            close.insert(idx.clone(), serde_json::json!(bar.close));
            volume.insert(idx, serde_json::json!(bar.volume));
        }
        serde_json::json!({ "open": open, "high": high, "low": low, "close": close, "volume": volume })
    }

    /// Parses the `{close: {...}, open: {...}, ...}` shape that DataAgent
    /// publishes (sorted-index JSON maps, mirroring `_convert_bars_to_dataframe`).
    /// Returns `None` if there's no usable `close` series.
    pub fn from_value(value: &Value) -> Option<Self> {
        let close_map = value.get("close")?.as_object()?;
        if close_map.is_empty() {
            return None;
        }

        let mut indices: Vec<&String> = close_map.keys().collect();
        indices.sort();

        let get = |field: &str, idx: &str, fallback: f64| -> f64 {
            value
                .get(field)
                .and_then(|m| m.get(idx))
                .and_then(Value::as_f64)
                .unwrap_or(fallback)
        };

        let bars = indices
            .into_iter()
            .map(|idx| {
                let close = close_map.get(idx).and_then(Value::as_f64).unwrap_or(0.0);
                Bar {
                    close,
                    open: get("open", idx, close),
                    high: get("high", idx, close),
                    low: get("low", idx, close),
                    volume: get("volume", idx, 0.0),
                }
            })
            .collect();

        Some(Bars(bars))
    }
}

/// Current position info handed to a strategy, if one is held.
#[derive(Debug, Clone, Copy)]
pub struct PositionInfo {
    pub quantity: f64,
    pub entry_price: f64,
    pub unrealized_pnl_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone)]
pub struct TradingSignal {
    pub symbol: String,
    pub action: SignalAction,
    pub strength: f64,
    pub reason: String,
    pub current_price: f64,
    pub momentum: f64,
}

/// A strategy's analysis step failed; SignalAgent turns this into a hold
/// signal (spec §4.8) rather than aborting the tick for other symbols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    Analysis(String),
}

impl fmt::Display for StrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyError::Analysis(reason) => write!(f, "strategy analysis failed: {reason}"),
        }
    }
}

impl std::error::Error for StrategyError {}

/// A pluggable trading strategy: pure function of bars, price, and position.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Minimum number of bars required before `analyze` can produce a
    /// non-trivial signal.
    fn required_history(&self) -> usize;

    fn analyze(
        &self,
        symbol: &str,
        bars: &Bars,
        current_price: f64,
        current_position: Option<PositionInfo>,
    ) -> Result<TradingSignal, StrategyError>;

    /// Introspection accessor for the dashboard/API layer.
    fn parameters(&self) -> Value;
}

/// Resolve a strategy by name, falling back to momentum for an unknown or
/// blank name (mirrors `strategies.get_strategy` defaulting behavior).
///
/// `lookback`/`momentum_threshold`/`sell_threshold` come straight from
/// `RuntimeConfig` so a config PATCH changes live signal generation instead
/// of only being persisted.
pub fn strategy_by_name(name: &str, lookback: usize, momentum_threshold: f64, sell_threshold: f64) -> Box<dyn Strategy> {
    let momentum = || MomentumStrategy { lookback, momentum_threshold, sell_threshold };
    match name.to_ascii_lowercase().as_str() {
        "momentum" | "" => Box::new(momentum()),
        _ => {
            tracing::warn!(strategy = name, "unknown strategy name, falling back to momentum");
            Box::new(momentum())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bars_from_value_parses_sorted_close_series() {
        let value = json!({
            "close": {"0": 100.0, "1": 101.0, "2": 99.0},
            "volume": {"0": 1000.0, "1": 1100.0, "2": 900.0},
        });
        let bars = Bars::from_value(&value).unwrap();
        assert_eq!(bars.closes(), vec![100.0, 101.0, 99.0]);
        assert_eq!(bars.0[0].volume, 1000.0);
        // open/high/low default to close when absent.
        assert_eq!(bars.0[1].open, 101.0);
    }

    #[test]
    fn bars_round_trips_through_value() {
        let bars = Bars(vec![
            Bar { open: 10.0, high: 11.0, low: 9.5, close: 10.5, volume: 500.0 },
            Bar { open: 10.5, high: 12.0, low: 10.0, close: 11.5, volume: 600.0 },
        ]);
        let value = bars.to_value();
        let parsed = Bars::from_value(&value).unwrap();
        assert_eq!(parsed.closes(), vec![10.5, 11.5]);
    }

    #[test]
    fn bars_from_value_none_without_close() {
        assert!(Bars::from_value(&json!({"volume": {"0": 1.0}})).is_none());
    }

    #[test]
    fn unknown_strategy_name_falls_back_to_momentum() {
        assert_eq!(strategy_by_name("not-a-real-strategy", 20, 0.02, -0.02).name(), "momentum");
        assert_eq!(strategy_by_name("", 20, 0.02, -0.02).name(), "momentum");
    }

    #[test]
    fn strategy_by_name_threads_config_overrides_into_momentum_params() {
        let strat = strategy_by_name("momentum", 10, 0.05, -0.1);
        let params = strat.parameters();
        assert_eq!(params["lookback"], 10);
        assert_eq!(params["momentum_threshold"], 0.05);
        assert_eq!(params["sell_threshold"], -0.1);
    }
}
