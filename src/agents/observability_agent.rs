// =============================================================================
// ObservabilityAgent — event stream → classified, rotated system log (§4.12)
// =============================================================================
//
// Subscribes to every event. Each is classified into a (reason_code,
// outcome) pair, annotated with a market-context snapshot derived from the
// last MarketDataReady, and appended as one JSON line to a universe-scoped
// system log. The log rotates by size, keeping exactly one backup.
// =============================================================================

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::json;

use crate::event_bus::EventBus;
use crate::events::{Event, MarketDataReady};
use crate::universe::{log_path, UniverseContext};

const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;

fn classify(event: &Event) -> (&'static str, &'static str) {
    match event {
        Event::MarketDataReady(_) => ("market_data_ready", "info"),
        Event::SignalGenerated(_) => ("signal_generated", "info"),
        Event::SignalsUpdated(_) => ("signals_updated", "info"),
        Event::RiskCheckPassed(_) => ("risk_check_passed", "success"),
        Event::RiskCheckFailed(failed) => {
            // Leak a static-lifetime copy of the dynamic reason code is not
            // worth it here; callers needing the exact code read it off the
            // event itself. This classification only fixes the broad outcome.
            let _ = failed;
            ("risk_check_failed", "fail")
        }
        Event::OrderExecuted(_) => ("order_executed", "success"),
        Event::OrderFailed(_) => ("order_failed", "fail"),
        Event::StopLossTriggered(_) => ("stop_loss_triggered", "triggered"),
        Event::LogEvent(_) => ("log", "info"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VolatilityRegime {
    Low,
    Normal,
    High,
}

impl VolatilityRegime {
    fn as_str(self) -> &'static str {
        match self {
            VolatilityRegime::Low => "low",
            VolatilityRegime::Normal => "normal",
            VolatilityRegime::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionBias {
    Bullish,
    Bearish,
    Mixed,
}

impl DirectionBias {
    fn as_str(self) -> &'static str {
        match self {
            DirectionBias::Bullish => "bullish",
            DirectionBias::Bearish => "bearish",
            DirectionBias::Mixed => "mixed",
        }
    }
}

/// A point-in-time read of market breadth derived from the last
/// MarketDataReady, annotated onto every subsequent log line until the next
/// one arrives.
fn market_context(last: &MarketDataReady) -> serde_json::Value {
    let symbol_count = last.symbols.len();
    let coverage_ratio = if symbol_count == 0 { 0.0 } else { last.prices.len() as f64 / symbol_count as f64 };

    let changes: Vec<f64> = last.market_indices.values().copied().collect();
    let avg_abs_change = if changes.is_empty() {
        0.0
    } else {
        changes.iter().map(|c| c.abs()).sum::<f64>() / changes.len() as f64
    };
    let regime = if avg_abs_change < 0.01 {
        VolatilityRegime::Low
    } else if avg_abs_change < 0.02 {
        VolatilityRegime::Normal
    } else {
        VolatilityRegime::High
    };

    let bias = if changes.is_empty() {
        DirectionBias::Mixed
    } else {
        let up = changes.iter().filter(|&&c| c > 0.0).count() as f64 / changes.len() as f64;
        let down = changes.iter().filter(|&&c| c < 0.0).count() as f64 / changes.len() as f64;
        if up >= 0.7 {
            DirectionBias::Bullish
        } else if down >= 0.7 {
            DirectionBias::Bearish
        } else {
            DirectionBias::Mixed
        }
    };

    json!({
        "symbol_count": symbol_count,
        "coverage_ratio": coverage_ratio,
        "volatility_regime": regime.as_str(),
        "direction_bias": bias.as_str(),
    })
}

pub struct ObservabilityAgent {
    ctx: UniverseContext,
    bus: Arc<EventBus>,
    log_path: PathBuf,
    write_lock: Mutex<()>,
    last_market_data: RwLock<Option<MarketDataReady>>,
}

impl ObservabilityAgent {
    pub fn new(ctx: UniverseContext, bus: Arc<EventBus>) -> Self {
        let log_path = log_path(ctx.universe, "system/observability.jsonl");
        Self { ctx, bus, log_path, write_lock: Mutex::new(()), last_market_data: RwLock::new(None) }
    }

    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        self.bus.subscribe_all(Arc::new(move |event| {
            let this = this.clone();
            Box::pin(async move { this.handle(event) })
        }));
    }

    fn handle(&self, event: Event) {
        if let Event::MarketDataReady(ready) = &event {
            *self.last_market_data.write() = Some(ready.clone());
        }

        let (reason_code, outcome) = classify(&event);
        let context = self.last_market_data.read().as_ref().map(market_context).unwrap_or(json!(null));

        let record = json!({
            "timestamp": event.provenance().timestamp.to_rfc3339(),
            "universe": self.ctx.universe.to_string(),
            "session_id": self.ctx.session_id,
            "event_type": format!("{:?}", event.kind()),
            "reason_code": reason_code,
            "outcome": outcome,
            "market_context": context,
        });

        self.append(&record);
    }

    fn append(&self, record: &serde_json::Value) {
        let _guard = self.write_lock.lock();
        if let Some(parent) = self.log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(meta) = std::fs::metadata(&self.log_path) {
            if meta.len() > ROTATE_AT_BYTES {
                let backup = self.log_path.with_extension("1.jsonl");
                let _ = std::fs::rename(&self.log_path, backup);
            }
        }
        match OpenOptions::new().create(true).append(true).open(&self.log_path) {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{record}") {
                    tracing::error!(error = %e, "failed to append observability record");
                }
            }
            Err(e) => {
                tracing::error!(path = %self.log_path.display(), error = %e, "failed to open observability log");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Provenance, Side};
    use crate::universe::Universe;
    use std::collections::HashMap;

    fn market_data(indices: HashMap<String, f64>) -> MarketDataReady {
        let ctx = UniverseContext::new(Universe::Simulation);
        MarketDataReady {
            prov: Provenance::new(&ctx, "data_agent"),
            symbols: vec!["AAPL".to_string(), "MSFT".to_string()],
            prices: HashMap::from([("AAPL".to_string(), 100.0)]),
            bars: HashMap::new(),
            account: json!({}),
            positions: json!({}),
            top_gainers: vec![],
            market_indices: indices,
            market_open: true,
        }
    }

    #[test]
    fn classifies_order_failed_as_fail_outcome() {
        let ctx = UniverseContext::new(Universe::Simulation);
        let event = Event::OrderFailed(crate::events::OrderFailed {
            prov: Provenance::new(&ctx, "execution_agent"),
            symbol: "AAPL".to_string(),
            side: Side::Buy,
            reason: "rejected".to_string(),
        });
        assert_eq!(classify(&event), ("order_failed", "fail"));
    }

    #[test]
    fn volatility_regime_and_bias_from_indices() {
        let indices = HashMap::from([
            ("SPY".to_string(), 0.025),
            ("QQQ".to_string(), 0.03),
            ("DIA".to_string(), 0.028),
        ]);
        let context = market_context(&market_data(indices));
        assert_eq!(context["volatility_regime"], json!("high"));
        assert_eq!(context["direction_bias"], json!("bullish"));
        assert_eq!(context["coverage_ratio"], json!(0.5));
    }

    #[test]
    fn mixed_bias_when_no_clear_majority() {
        let indices = HashMap::from([("SPY".to_string(), 0.005), ("QQQ".to_string(), -0.004)]);
        let context = market_context(&market_data(indices));
        assert_eq!(context["direction_bias"], json!("mixed"));
        assert_eq!(context["volatility_regime"], json!("low"));
    }
}
