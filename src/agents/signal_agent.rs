// =============================================================================
// SignalAgent — bars → actionable signals (spec §4.8)
// =============================================================================
//
// Subscribes to MarketDataReady. Per symbol with enough history, delegates
// to the pluggable Strategy. Actionable (buy/sell) signals publish
// SignalGenerated individually; a batch SignalsUpdated (including holds)
// always follows. A strategy error becomes a hold so the pipeline never
// stalls on one bad symbol.
// =============================================================================

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::event_bus::EventBus;
use crate::events::{Event, EventKind, MarketDataReady, SignalGenerated, SignalSummary, SignalsUpdated};
use crate::events::SignalAction as EventSignalAction;
use crate::strategy::{Bars, PositionInfo, SignalAction as StrategySignalAction, Strategy};
use crate::universe::{Universe, UniverseContext};

use super::provenance;

pub struct SignalAgent {
    ctx: UniverseContext,
    bus: Arc<EventBus>,
    strategy: Box<dyn Strategy>,
}

impl SignalAgent {
    pub fn new(ctx: UniverseContext, bus: Arc<EventBus>, strategy: Box<dyn Strategy>) -> Self {
        Self { ctx, bus, strategy }
    }

    /// Registers this agent's MarketDataReady handler on the bus. The
    /// returned handler closure can be fed to `EventBus::unsubscribe` at
    /// shutdown (the bus retains handlers by identity via `Arc`).
    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        self.bus.subscribe(
            EventKind::MarketDataReady,
            Arc::new(move |event| {
                let this = this.clone();
                Box::pin(async move {
                    if let Event::MarketDataReady(ready) = event {
                        this.handle(ready).await;
                    }
                })
            }),
        );
    }

    async fn handle(&self, ready: MarketDataReady) {
        if !ready.market_open && self.ctx.universe != Universe::Simulation {
            return;
        }

        let positions: std::collections::HashMap<String, Value> =
            ready.positions.as_object().map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()).unwrap_or_default();

        let mut summaries = Vec::new();

        for symbol in &ready.symbols {
            let Some(&current_price) = ready.prices.get(symbol) else { continue };
            let Some(bars_value) = ready.bars.get(symbol) else { continue };
            let Some(bars) = Bars::from_value(bars_value) else { continue };

            if bars.len() < self.strategy.required_history() {
                continue;
            }

            let current_position = positions.get(symbol).and_then(|p| {
                Some(PositionInfo {
                    quantity: p.get("quantity")?.as_f64()?,
                    entry_price: p.get("avg_entry_price")?.as_f64()?,
                    unrealized_pnl_pct: p.get("unrealized_pnl_pct").and_then(Value::as_f64).unwrap_or(0.0),
                })
            });

            let signal = match self.strategy.analyze(symbol, &bars, current_price, current_position) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "strategy failed, emitting hold");
                    crate::strategy::TradingSignal {
                        symbol: symbol.clone(),
                        action: StrategySignalAction::Hold,
                        strength: 0.0,
                        reason: "error".to_string(),
                        current_price,
                        momentum: 0.0,
                    }
                }
            };

            let action = match signal.action {
                StrategySignalAction::Buy => EventSignalAction::Buy,
                StrategySignalAction::Sell => EventSignalAction::Sell,
                StrategySignalAction::Hold => EventSignalAction::Hold,
            };

            summaries.push(SignalSummary {
                symbol: symbol.clone(),
                action,
                strength: signal.strength,
                reason: signal.reason.clone(),
                current_price: signal.current_price,
                momentum: signal.momentum,
            });

            if action.is_actionable() {
                let event = Event::SignalGenerated(SignalGenerated {
                    prov: provenance(&self.ctx, "signal_agent"),
                    symbol: symbol.clone(),
                    action,
                    strength: signal.strength,
                    reason: signal.reason,
                    current_price: signal.current_price,
                    momentum: signal.momentum,
                });
                if let Err(e) = self.bus.publish(event).await {
                    warn!(error = %e, "failed to publish SignalGenerated");
                }
            }
        }

        let batch = Event::SignalsUpdated(SignalsUpdated { prov: provenance(&self.ctx, "signal_agent"), signals: summaries });
        if let Err(e) = self.bus.publish(batch).await {
            warn!(error = %e, "failed to publish SignalsUpdated");
        }
    }
}
