// =============================================================================
// MonitorAgent — periodic stop-loss surveillance (spec §4.11)
// =============================================================================
//
// Same scheduling shape as DataAgent: one task, cancelled cooperatively via
// a watch channel. On each tick, while the market is open, scans every held
// position for a loss beyond `stop_loss_pct` and emits StopLossTriggered —
// the Coordinator, not this agent, turns that into a risk-bypassing sell.
// =============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broker::Broker;
use crate::event_bus::EventBus;
use crate::events::{Event, StopLossTriggered};
use crate::runtime_config::RuntimeConfig;
use crate::universe::UniverseContext;

use super::provenance;

const DEFAULT_CHECK_INTERVAL_SECS: u64 = 120;

pub struct MonitorAgent {
    ctx: UniverseContext,
    bus: Arc<EventBus>,
    broker: Arc<dyn Broker>,
    task: Mutex<Option<(JoinHandle<()>, watch::Sender<bool>)>>,
}

impl MonitorAgent {
    pub fn new(ctx: UniverseContext, bus: Arc<EventBus>, broker: Arc<dyn Broker>) -> Self {
        Self { ctx, bus, broker, task: Mutex::new(None) }
    }

    pub fn start(self: &Arc<Self>, config: Arc<parking_lot::RwLock<RuntimeConfig>>) {
        let (tx, mut rx) = watch::channel(false);
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS)) => {}
                    _ = rx.changed() => break,
                }
                if *rx.borrow() {
                    break;
                }
                let stop_loss_pct = config.read().stop_loss_pct;
                if let Err(e) = this.tick(stop_loss_pct).await {
                    warn!(error = %e, "monitor agent tick failed");
                }
            }
            info!("monitor agent task wound down");
        });
        *self.task.lock() = Some((handle, tx));
    }

    pub async fn stop(&self) {
        if let Some((handle, tx)) = self.task.lock().take() {
            let _ = tx.send(true);
            let _ = handle.await;
        }
    }

    async fn tick(&self, stop_loss_pct: f64) -> anyhow::Result<()> {
        if !self.broker.is_market_open() && !self.ctx.universe.allows_market_hours_override() {
            return Ok(());
        }

        let positions = self.broker.get_positions().await?;
        for (symbol, position) in positions {
            if position.avg_entry_price <= 0.0 {
                continue;
            }
            let loss_pct = (position.current_price - position.avg_entry_price) / position.avg_entry_price;
            if loss_pct <= -stop_loss_pct {
                let event = Event::StopLossTriggered(StopLossTriggered {
                    prov: provenance(&self.ctx, "monitor_agent"),
                    symbol: symbol.clone(),
                    loss_pct: -loss_pct,
                    entry_price: position.avg_entry_price,
                    current_price: position.current_price,
                });
                if let Err(e) = self.bus.publish(event).await {
                    warn!(error = %e, "failed to publish StopLossTriggered");
                }
            }
        }
        Ok(())
    }
}
