// =============================================================================
// AnalyticsAgent — event stream → AnalyticsStore rows (spec §4.12)
// =============================================================================
//
// Subscribes to every event. MarketDataReady becomes an equity snapshot row;
// OrderExecuted becomes a trade row. Every other variant is ignored — this
// agent's only job is durable analytics persistence, not the human-readable
// log (that's AlertAgent) or the system log (ObservabilityAgent).
// =============================================================================

use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use crate::analytics_store::AnalyticsStore;
use crate::event_bus::EventBus;
use crate::events::Event;

/// Mirrors the original's `setdefault`-only-on-presence behavior: a genuinely
/// unset lineage id (the common case, since `UniverseContext::new` carries
/// an empty one) is left out of the record entirely so the store can apply
/// its own `"unknown_lineage"` default, rather than writing a present-but-
/// empty field that would fail schema validation.
fn insert_lineage(record: &mut serde_json::Value, lineage: &Option<String>) {
    if let Some(lineage) = lineage {
        if !lineage.is_empty() {
            record["data_lineage_id"] = json!(lineage);
        }
    }
}

pub struct AnalyticsAgent {
    bus: Arc<EventBus>,
    store: Arc<AnalyticsStore>,
}

impl AnalyticsAgent {
    pub fn new(bus: Arc<EventBus>, store: Arc<AnalyticsStore>) -> Self {
        Self { bus, store }
    }

    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        self.bus.subscribe_all(Arc::new(move |event| {
            let this = this.clone();
            Box::pin(async move { this.handle(event).await })
        }));
    }

    async fn handle(&self, event: Event) {
        match event {
            Event::MarketDataReady(ready) => {
                let account = &ready.account;
                let mut record = json!({
                    "session_id": ready.prov.session_id,
                    "timestamp": ready.prov.timestamp.to_rfc3339(),
                    "equity": account.get("equity"),
                    "portfolio_value": account.get("portfolio_value"),
                    "cash": account.get("cash"),
                    "buying_power": account.get("buying_power"),
                    "market_open": ready.market_open,
                });
                insert_lineage(&mut record, &ready.prov.data_lineage_id);
                if let Err(e) = self.store.record_equity(record).await {
                    warn!(error = %e, "failed to record equity snapshot");
                }
            }
            Event::OrderExecuted(executed) => {
                let source = executed.client_order_id.split('-').next().unwrap_or("auto").to_string();
                let submitted_at = executed.prov.timestamp.to_rfc3339();
                let mut record = json!({
                    "session_id": executed.prov.session_id,
                    "timestamp": submitted_at,
                    "symbol": executed.symbol,
                    "side": executed.side.to_string(),
                    "qty": executed.qty,
                    "filled_avg_price": executed.filled_avg_price,
                    "notional": executed.notional,
                    "status": "filled",
                    "submitted_at": submitted_at.clone(),
                    "filled_at": submitted_at,
                    "order_id": executed.order_id,
                    "source": source,
                    "time_in_force": "day",
                    "order_type": "market",
                });
                insert_lineage(&mut record, &executed.prov.data_lineage_id);
                if let Err(e) = self.store.record_trade(record).await {
                    warn!(error = %e, "failed to record trade");
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MarketDataReady, OrderExecuted, Provenance, Side};
    use crate::universe::{Universe, UniverseContext};
    use std::collections::HashMap;

    fn ctx() -> UniverseContext {
        UniverseContext::new(Universe::Simulation)
    }

    #[tokio::test]
    async fn market_data_ready_records_equity_snapshot() {
        let universe_ctx = ctx();
        let bus = Arc::new(EventBus::new(universe_ctx.clone()));
        let store = Arc::new(AnalyticsStore::new(Universe::Simulation));
        let agent = Arc::new(AnalyticsAgent::new(bus.clone(), store.clone()));
        agent.start();

        let event = Event::MarketDataReady(MarketDataReady {
            prov: Provenance::new(&universe_ctx, "data_agent"),
            symbols: vec!["AAPL".to_string()],
            prices: HashMap::new(),
            bars: HashMap::new(),
            account: json!({"equity": 100000.0, "portfolio_value": 100000.0, "cash": 50000.0, "buying_power": 50000.0}),
            positions: json!({}),
            top_gainers: vec![],
            market_indices: HashMap::new(),
            market_open: true,
        });
        bus.publish(event).await.unwrap();

        let rows = store.load_equity("all");
        let row = rows
            .iter()
            .find(|r| r["session_id"] == json!(universe_ctx.session_id))
            .expect("equity snapshot should be recorded even though UniverseContext::new leaves data_lineage_id empty");
        assert_eq!(row["data_lineage_id"], json!("unknown_lineage"));
    }

    #[tokio::test]
    async fn order_executed_records_trade_with_expected_side() {
        let universe_ctx = ctx();
        let bus = Arc::new(EventBus::new(universe_ctx.clone()));
        let store = Arc::new(AnalyticsStore::new(Universe::Simulation));
        let agent = Arc::new(AnalyticsAgent::new(bus.clone(), store.clone()));
        agent.start();

        let event = Event::OrderExecuted(OrderExecuted {
            prov: Provenance::new(&universe_ctx, "execution_agent"),
            symbol: "AAPL".to_string(),
            side: Side::Buy,
            client_order_id: "auto-AAPL-123".to_string(),
            order_id: Some("o1".to_string()),
            qty: 10.0,
            filled_avg_price: 150.0,
            notional: 1500.0,
        });
        bus.publish(event).await.unwrap();

        let rows = store.load_trades("all", None);
        let matching = rows.iter().find(|r| r["session_id"] == json!(universe_ctx.session_id));
        let row = matching.expect("trade should be recorded even though UniverseContext::new leaves data_lineage_id empty");
        assert_eq!(row["side"], json!("buy"));
        assert_eq!(row["symbol"], json!("AAPL"));
        assert_eq!(row["data_lineage_id"], json!("unknown_lineage"));
    }
}
