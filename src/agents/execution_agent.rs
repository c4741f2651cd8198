// =============================================================================
// ExecutionAgent — order submission & client_order_id hygiene (spec §4.10)
// =============================================================================
//
// Listens to RiskCheckPassed, gated by the `auto_trade` flag. Pipeline and
// manual trades both funnel through `submit`, which builds the order,
// submits it, and emits OrderExecuted/OrderFailed. A successful fill calls
// back into RiskAgent's trade counter — the only place it advances.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::broker::{Broker, OrderQuantity, OrderSide, OrderStatus};
use crate::event_bus::EventBus;
use crate::events::{Event, EventKind, OrderExecuted, OrderFailed, RiskCheckPassed, Side};
use crate::runtime_config::RuntimeConfig;
use crate::universe::UniverseContext;

use super::provenance;
use super::risk_agent::RiskAgent;

/// Amount specification for a manual trade, mirroring the pipeline's
/// notional-for-buys / qty-for-sells convention while allowing either for
/// an operator-initiated order.
#[derive(Debug, Clone, Copy)]
pub enum ManualAmount {
    Qty(f64),
    Notional(f64),
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Builds `client_order_id` values, appending a monotonic suffix only when
/// the same (prefix, symbol) pair would otherwise collide within the same
/// millisecond (DESIGN.md open-question resolution).
struct OrderIdGenerator {
    last: Mutex<HashMap<(String, String), (i64, u32)>>,
}

impl OrderIdGenerator {
    fn new() -> Self {
        Self { last: Mutex::new(HashMap::new()) }
    }

    fn generate(&self, prefix: &str, symbol: &str, unix_ms: i64) -> String {
        let key = (prefix.to_string(), symbol.to_string());
        let mut last = self.last.lock();
        let entry = last.entry(key).or_insert((unix_ms, 0));
        if entry.0 == unix_ms {
            entry.1 += 1;
            format!("{prefix}-{symbol}-{unix_ms}-{}", entry.1)
        } else {
            *entry = (unix_ms, 0);
            format!("{prefix}-{symbol}-{unix_ms}")
        }
    }
}

pub struct ExecutionAgent {
    ctx: UniverseContext,
    bus: Arc<EventBus>,
    broker: Arc<dyn Broker>,
    config: Arc<RwLock<RuntimeConfig>>,
    risk_agent: Arc<RiskAgent>,
    order_ids: OrderIdGenerator,
}

impl ExecutionAgent {
    pub fn new(
        ctx: UniverseContext,
        bus: Arc<EventBus>,
        broker: Arc<dyn Broker>,
        config: Arc<RwLock<RuntimeConfig>>,
        risk_agent: Arc<RiskAgent>,
    ) -> Self {
        Self { ctx, bus, broker, config, risk_agent, order_ids: OrderIdGenerator::new() }
    }

    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        self.bus.subscribe(
            EventKind::RiskCheckPassed,
            Arc::new(move |event| {
                let this = this.clone();
                Box::pin(async move {
                    if let Event::RiskCheckPassed(passed) = event {
                        this.handle(passed).await;
                    }
                })
            }),
        );
    }

    async fn handle(&self, passed: RiskCheckPassed) {
        if !self.config.read().auto_trade.0 {
            return;
        }

        let quantity = match passed.action {
            Side::Buy => OrderQuantity::Notional(round2(passed.trade_value)),
            Side::Sell => match self.broker.get_position(&passed.symbol).await {
                Ok(Some(pos)) => OrderQuantity::Qty(pos.quantity),
                _ => {
                    self.fail(&passed.symbol, passed.action, "no position to sell").await;
                    return;
                }
            },
        };

        let _ = self.submit(&passed.symbol, passed.action, quantity, "auto").await;
    }

    /// Bypasses risk checks entirely; used by the manual-trade API surface.
    /// Sells specified as a notional `amount` are converted to a share
    /// quantity at the current price, falling back to the full held
    /// position if the price lookup fails.
    pub async fn execute_manual_trade(&self, symbol: &str, side: Side, amount: ManualAmount) -> Result<(), String> {
        let quantity = match (side, amount) {
            (Side::Buy, ManualAmount::Notional(n)) => OrderQuantity::Notional(round2(n)),
            (Side::Buy, ManualAmount::Qty(q)) => OrderQuantity::Qty(q),
            (Side::Sell, ManualAmount::Qty(q)) => OrderQuantity::Qty(q),
            (Side::Sell, ManualAmount::Notional(amount)) => {
                let qty = match self.broker.get_current_price(symbol).await {
                    Ok(price) if price > 0.0 => amount / price,
                    _ => match self.broker.get_position(symbol).await {
                        Ok(Some(pos)) => pos.quantity,
                        _ => return Err("no position to size a notional sell against".to_string()),
                    },
                };
                OrderQuantity::Qty(qty)
            }
        };

        self.submit(symbol, side, quantity, "manual").await.map(|_| ())
    }

    async fn submit(
        &self,
        symbol: &str,
        side: Side,
        quantity: OrderQuantity,
        prefix: &str,
    ) -> Result<(), String> {
        let client_order_id = self.order_ids.generate(prefix, symbol, Utc::now().timestamp_millis());
        let order_side = match side {
            Side::Buy => OrderSide::Buy,
            Side::Sell => OrderSide::Sell,
        };

        match self.broker.submit_order(symbol, order_side, quantity, &client_order_id).await {
            Ok(fill) if fill.status == OrderStatus::Filled => {
                let filled_avg_price = fill.filled_avg_price.unwrap_or_else(|| match fill.notional {
                    Some(n) if fill.qty != 0.0 => n / fill.qty,
                    _ => 0.0,
                });
                let notional = fill.notional.unwrap_or(fill.qty * filled_avg_price);

                let event = Event::OrderExecuted(OrderExecuted {
                    prov: provenance(&self.ctx, "execution_agent"),
                    symbol: symbol.to_string(),
                    side,
                    client_order_id,
                    order_id: Some(fill.order_id),
                    qty: fill.qty,
                    filled_avg_price,
                    notional,
                });
                if let Err(e) = self.bus.publish(event).await {
                    warn!(error = %e, "failed to publish OrderExecuted");
                }
                self.risk_agent.increment_trade_count();
                Ok(())
            }
            Ok(fill) => {
                let reason = format!("order not filled, status={:?}", fill.status);
                self.fail(symbol, side, &reason).await;
                Err(reason)
            }
            Err(e) => {
                self.fail(symbol, side, &e.to_string()).await;
                Err(e.to_string())
            }
        }
    }

    async fn fail(&self, symbol: &str, side: Side, reason: &str) {
        let event = Event::OrderFailed(OrderFailed {
            prov: provenance(&self.ctx, "execution_agent"),
            symbol: symbol.to_string(),
            side,
            reason: reason.to_string(),
        });
        if let Err(e) = self.bus.publish(event).await {
            warn!(error = %e, "failed to publish OrderFailed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SimBroker;
    use crate::universe::Universe;

    #[test]
    fn client_order_id_has_no_suffix_on_first_use() {
        let gen = OrderIdGenerator::new();
        assert_eq!(gen.generate("auto", "AAPL", 1_700_000_000_000), "auto-AAPL-1700000000000");
    }

    #[test]
    fn client_order_id_appends_counter_on_same_ms_collision() {
        let gen = OrderIdGenerator::new();
        let first = gen.generate("auto", "AAPL", 1_700_000_000_000);
        let second = gen.generate("auto", "AAPL", 1_700_000_000_000);
        let third = gen.generate("auto", "AAPL", 1_700_000_000_000);
        assert_eq!(first, "auto-AAPL-1700000000000");
        assert_eq!(second, "auto-AAPL-1700000000000-1");
        assert_eq!(third, "auto-AAPL-1700000000000-2");
    }

    #[test]
    fn client_order_id_resets_counter_on_new_ms() {
        let gen = OrderIdGenerator::new();
        gen.generate("auto", "AAPL", 1_700_000_000_000);
        gen.generate("auto", "AAPL", 1_700_000_000_000);
        let next_ms = gen.generate("auto", "AAPL", 1_700_000_000_001);
        assert_eq!(next_ms, "auto-AAPL-1700000000001");
    }

    #[test]
    fn client_order_id_is_independent_per_symbol() {
        let gen = OrderIdGenerator::new();
        let a = gen.generate("auto", "AAPL", 1_700_000_000_000);
        let b = gen.generate("auto", "MSFT", 1_700_000_000_000);
        assert_eq!(a, "auto-AAPL-1700000000000");
        assert_eq!(b, "auto-MSFT-1700000000000");
    }

    #[tokio::test]
    async fn manual_buy_emits_order_executed_and_increments_trade_count() {
        let ctx = UniverseContext::new(Universe::Simulation);
        let bus = Arc::new(EventBus::new(ctx.clone()));
        let broker = SimBroker::new(Universe::Simulation).unwrap();
        broker.seed_price("AAPL", 150.0);
        let broker: Arc<dyn Broker> = Arc::new(broker);

        let config = Arc::new(RwLock::new(RuntimeConfig::default()));
        let risk_agent = Arc::new(RiskAgent::new(ctx.clone(), bus.clone(), broker.clone(), config.clone()));
        let agent = ExecutionAgent::new(ctx, bus.clone(), broker, config, risk_agent.clone());

        agent.execute_manual_trade("AAPL", Side::Buy, ManualAmount::Notional(1000.0)).await.unwrap();

        let recent = bus.recent_events();
        let last = recent.last().expect("an event should have been published");
        assert!(matches!(last, Event::OrderExecuted(_)));
        risk_agent.increment_trade_count();
    }

    #[tokio::test]
    async fn manual_sell_without_position_fails() {
        let ctx = UniverseContext::new(Universe::Simulation);
        let bus = Arc::new(EventBus::new(ctx.clone()));
        let broker = SimBroker::new(Universe::Simulation).unwrap();
        let broker: Arc<dyn Broker> = Arc::new(broker);

        let config = Arc::new(RwLock::new(RuntimeConfig::default()));
        let risk_agent = Arc::new(RiskAgent::new(ctx.clone(), bus.clone(), broker.clone(), config.clone()));
        let agent = ExecutionAgent::new(ctx, bus.clone(), broker, config, risk_agent);

        let result = agent.execute_manual_trade("ZZZ", Side::Sell, ManualAmount::Qty(1.0)).await;
        assert!(result.is_err());

        let recent = bus.recent_events();
        let last = recent.last().expect("an event should have been published");
        assert!(matches!(last, Event::OrderFailed(_)));
    }

    #[tokio::test]
    async fn pipeline_trade_skipped_when_auto_trade_disabled() {
        let ctx = UniverseContext::new(Universe::Simulation);
        let bus = Arc::new(EventBus::new(ctx.clone()));
        let broker = SimBroker::new(Universe::Simulation).unwrap();
        broker.seed_price("AAPL", 150.0);
        let broker: Arc<dyn Broker> = Arc::new(broker);

        let config = Arc::new(RwLock::new(RuntimeConfig::default()));
        let risk_agent = Arc::new(RiskAgent::new(ctx.clone(), bus.clone(), broker.clone(), config.clone()));
        let agent = ExecutionAgent::new(ctx.clone(), bus.clone(), broker, config, risk_agent);

        let passed = RiskCheckPassed {
            prov: provenance(&ctx, "test"),
            symbol: "AAPL".to_string(),
            action: Side::Buy,
            trade_value: 1000.0,
            position_pct: 0.01,
            reason: "sized".to_string(),
        };
        agent.handle(passed).await;

        assert!(bus.recent_events().is_empty());
    }
}
