// =============================================================================
// AlertAgent — human-readable log ring buffer + UI broadcast fan-out (§4.12)
// =============================================================================
//
// Subscribes to every event, same as ObservabilityAgent and AnalyticsAgent,
// but with a different job: render each event into a short human-readable
// entry, keep the most recent MAX_LOG_SIZE of them, and hand each one to an
// injected broadcast callback the UI layer supplies. Hold signals are not
// logged — they would dominate the feed with noise.
// =============================================================================

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};

use crate::event_bus::EventBus;
use crate::events::{Event, SignalAction};

const MAX_LOG_SIZE: usize = 100;

pub type BroadcastFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type BroadcastCallback = Arc<dyn Fn(Value) -> BroadcastFuture + Send + Sync>;

fn action_label(action: SignalAction) -> &'static str {
    match action {
        SignalAction::Buy => "buy",
        SignalAction::Sell => "sell",
        SignalAction::Hold => "hold",
    }
}

/// Renders one event into a `{timestamp, type, message, data}` log entry,
/// mirroring `alert_agent.py::_event_to_log`. Returns `None` for events that
/// are not worth surfacing to a human (e.g. hold signals).
fn event_to_log(event: &Event) -> Option<Value> {
    let timestamp = event.provenance().timestamp.to_rfc3339();

    let entry = match event {
        Event::MarketDataReady(ready) => json!({
            "timestamp": timestamp,
            "type": "info",
            "message": format!("Market data fetched for {} symbols", ready.symbols.len()),
            "data": {"symbols": ready.symbols, "market_open": ready.market_open},
        }),
        Event::SignalGenerated(signal) => {
            if signal.action == SignalAction::Hold {
                return None;
            }
            json!({
                "timestamp": timestamp,
                "type": "signal",
                "message": format!(
                    "{} signal: {} - {}",
                    action_label(signal.action).to_uppercase(),
                    signal.symbol,
                    signal.reason
                ),
                "data": {
                    "symbol": signal.symbol,
                    "action": action_label(signal.action),
                    "price": signal.current_price,
                    "momentum": signal.momentum,
                },
            })
        }
        Event::SignalsUpdated(_) => return None,
        Event::RiskCheckPassed(passed) => json!({
            "timestamp": timestamp,
            "type": "info",
            "message": format!(
                "Risk approved: {} {} ${:.2}",
                passed.action.to_string().to_uppercase(),
                passed.symbol,
                passed.trade_value
            ),
            "data": {"symbol": passed.symbol, "action": passed.action.to_string(), "trade_value": passed.trade_value},
        }),
        Event::RiskCheckFailed(failed) => json!({
            "timestamp": timestamp,
            "type": "warning",
            "message": format!("Risk rejected: {} - {}", failed.symbol, failed.reason),
            "data": {"symbol": failed.symbol, "action": action_label(failed.action), "reason": failed.reason},
        }),
        Event::OrderExecuted(executed) => json!({
            "timestamp": timestamp,
            "type": "trade",
            "message": format!("Order executed: {} {}", executed.side.to_string().to_uppercase(), executed.symbol),
            "data": {"symbol": executed.symbol, "action": executed.side.to_string(), "order_id": executed.order_id},
        }),
        Event::OrderFailed(failed) => json!({
            "timestamp": timestamp,
            "type": "error",
            "message": format!("Order failed: {} - {}", failed.symbol, failed.reason),
            "data": {"symbol": failed.symbol, "action": failed.side.to_string(), "reason": failed.reason},
        }),
        Event::StopLossTriggered(triggered) => json!({
            "timestamp": timestamp,
            "type": "warning",
            "message": format!("STOP LOSS: {} down {:.1}%", triggered.symbol, triggered.loss_pct * 100.0),
            "data": {
                "symbol": triggered.symbol,
                "entry_price": triggered.entry_price,
                "current_price": triggered.current_price,
                "loss_pct": triggered.loss_pct,
            },
        }),
        Event::LogEvent(log) => json!({
            "timestamp": timestamp,
            "type": "info",
            "message": log.message,
            "data": {"source": log.prov.source},
        }),
    };

    Some(entry)
}

pub struct AlertAgent {
    bus: Arc<EventBus>,
    log: Mutex<VecDeque<Value>>,
    callback: RwLock<Option<BroadcastCallback>>,
}

impl AlertAgent {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus, log: Mutex::new(VecDeque::with_capacity(MAX_LOG_SIZE)), callback: RwLock::new(None) }
    }

    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        self.bus.subscribe_all(Arc::new(move |event| {
            let this = this.clone();
            Box::pin(async move { this.handle(event).await })
        }));
    }

    /// Injected by the caller (the UI layer); replaces any previously set
    /// callback.
    pub fn set_broadcast_callback(&self, callback: BroadcastCallback) {
        *self.callback.write() = Some(callback);
    }

    async fn handle(&self, event: Event) {
        let Some(entry) = event_to_log(&event) else { return };

        {
            let mut log = self.log.lock();
            log.push_back(entry.clone());
            while log.len() > MAX_LOG_SIZE {
                log.pop_front();
            }
        }

        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(json!({"event": "log", "entry": entry})).await;
        }
    }

    /// Most recent `count` log entries, oldest first.
    pub fn get_logs(&self, count: usize) -> Vec<Value> {
        let log = self.log.lock();
        let start = log.len().saturating_sub(count);
        log.iter().skip(start).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Provenance, RiskCheckFailed, Side, SignalAction as Action, SignalGenerated};
    use crate::universe::{Universe, UniverseContext};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> UniverseContext {
        UniverseContext::new(Universe::Simulation)
    }

    #[tokio::test]
    async fn hold_signals_are_not_logged() {
        let ctx = ctx();
        let bus = Arc::new(EventBus::new(ctx.clone()));
        let agent = Arc::new(AlertAgent::new(bus.clone()));
        agent.start();

        let event = Event::SignalGenerated(SignalGenerated {
            prov: Provenance::new(&ctx, "signal_agent"),
            symbol: "AAPL".to_string(),
            action: Action::Hold,
            strength: 0.0,
            reason: "within band".to_string(),
            current_price: 100.0,
            momentum: 0.0,
        });
        bus.publish(event).await.unwrap();

        assert!(agent.get_logs(10).is_empty());
    }

    #[tokio::test]
    async fn risk_check_failed_is_logged_as_warning() {
        let ctx = ctx();
        let bus = Arc::new(EventBus::new(ctx.clone()));
        let agent = Arc::new(AlertAgent::new(bus.clone()));
        agent.start();

        let event = Event::RiskCheckFailed(RiskCheckFailed {
            prov: Provenance::new(&ctx, "risk_agent"),
            symbol: "AAPL".to_string(),
            action: Action::Buy,
            reason_code: "risk_daily_limit".to_string(),
            reason: "daily trade limit reached".to_string(),
        });
        bus.publish(event).await.unwrap();

        let logs = agent.get_logs(10);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["type"], json!("warning"));
    }

    #[tokio::test]
    async fn log_ring_buffer_caps_at_max_size() {
        let ctx = ctx();
        let bus = Arc::new(EventBus::new(ctx.clone()));
        let agent = Arc::new(AlertAgent::new(bus.clone()));
        agent.start();

        for i in 0..150 {
            let event = Event::RiskCheckFailed(RiskCheckFailed {
                prov: Provenance::new(&ctx, "risk_agent"),
                symbol: format!("SYM{i}"),
                action: Action::Buy,
                reason_code: "risk_daily_limit".to_string(),
                reason: "daily trade limit reached".to_string(),
            });
            bus.publish(event).await.unwrap();
        }

        assert_eq!(agent.get_logs(1000).len(), MAX_LOG_SIZE);
        assert_eq!(agent.get_logs(1000)[0]["data"]["symbol"], json!("SYM50"));
    }

    #[tokio::test]
    async fn broadcast_callback_invoked_with_log_envelope() {
        let ctx = ctx();
        let bus = Arc::new(EventBus::new(ctx.clone()));
        let agent = Arc::new(AlertAgent::new(bus.clone()));
        agent.start();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        agent.set_broadcast_callback(Arc::new(move |payload| {
            let calls2 = calls2.clone();
            Box::pin(async move {
                assert_eq!(payload["event"], json!("log"));
                calls2.fetch_add(1, Ordering::SeqCst);
            })
        }));

        let event = Event::OrderFailed(crate::events::OrderFailed {
            prov: Provenance::new(&ctx, "execution_agent"),
            symbol: "AAPL".to_string(),
            side: Side::Buy,
            reason: "rejected".to_string(),
        });
        bus.publish(event).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
