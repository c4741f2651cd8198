// =============================================================================
// Coordinator & AppState — agent wiring and the destructive universe
// transition protocol (spec §4.13)
// =============================================================================
//
// Coordinator owns one EventBus and every agent, all bound to one
// UniverseContext for its whole lifetime. AppState wraps a Coordinator
// (plus its broker and analytics store) behind a transition protocol: a
// universe is never toggled in place — the old components are stopped and
// dropped, then a full new set is built by caller-injected factories and
// asserted to carry the requested universe before it replaces the old one.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::agents::alert_agent::{BroadcastCallback, BroadcastFuture};
use crate::agents::execution_agent::ManualAmount;
use crate::agents::{
    provenance, AlertAgent, AnalyticsAgent, DataAgent, ExecutionAgent, MonitorAgent, ObservabilityAgent, RiskAgent,
    SignalAgent,
};
use crate::analytics_store::AnalyticsStore;
use crate::broker::Broker;
use crate::event_bus::{EventBus, Handler};
use crate::events::{Event, EventKind, LogEvent, RiskCheckPassed, Side, StopLossTriggered};
use crate::runtime_config::RuntimeConfig;
use crate::strategy::strategy_by_name;
use crate::universe::{data_path, validate_universe_transition, Universe, UniverseContext};

// =============================================================================
// Coordinator
// =============================================================================

/// Owns the event bus and every agent for exactly one Universe. Constructed
/// only through [`Coordinator::new`], which requires an explicit universe —
/// there is no constructor that infers one.
pub struct Coordinator {
    pub ctx: UniverseContext,
    bus: Arc<EventBus>,
    broker: Arc<dyn Broker>,
    config: Arc<RwLock<RuntimeConfig>>,

    data_agent: Arc<DataAgent>,
    signal_agent: Arc<SignalAgent>,
    risk_agent: Arc<RiskAgent>,
    execution_agent: Arc<ExecutionAgent>,
    monitor_agent: Arc<MonitorAgent>,
    observability_agent: Arc<ObservabilityAgent>,
    analytics_agent: Arc<AnalyticsAgent>,
    alert_agent: Arc<AlertAgent>,

    stop_loss_handler: RwLock<Option<Handler>>,
    running: RwLock<bool>,
    state_version: AtomicU64,
    start_time: Instant,
}

impl Coordinator {
    pub fn new(
        ctx: UniverseContext,
        broker: Arc<dyn Broker>,
        store: Arc<AnalyticsStore>,
        config: Arc<RwLock<RuntimeConfig>>,
    ) -> Arc<Self> {
        let bus = Arc::new(EventBus::new(ctx.clone()));
        let strategy = {
            let cfg = config.read();
            strategy_by_name(&cfg.strategy, cfg.lookback_days, cfg.momentum_threshold, cfg.sell_threshold)
        };

        let data_agent = Arc::new(DataAgent::new(ctx.clone(), bus.clone(), broker.clone()));
        let signal_agent = Arc::new(SignalAgent::new(ctx.clone(), bus.clone(), strategy));
        let risk_agent = Arc::new(RiskAgent::new(ctx.clone(), bus.clone(), broker.clone(), config.clone()));
        let execution_agent =
            Arc::new(ExecutionAgent::new(ctx.clone(), bus.clone(), broker.clone(), config.clone(), risk_agent.clone()));
        let monitor_agent = Arc::new(MonitorAgent::new(ctx.clone(), bus.clone(), broker.clone()));
        let observability_agent = Arc::new(ObservabilityAgent::new(ctx.clone(), bus.clone()));
        let analytics_agent = Arc::new(AnalyticsAgent::new(bus.clone(), store));
        let alert_agent = Arc::new(AlertAgent::new(bus.clone()));

        Arc::new(Self {
            ctx,
            bus,
            broker,
            config,
            data_agent,
            signal_agent,
            risk_agent,
            execution_agent,
            monitor_agent,
            observability_agent,
            analytics_agent,
            alert_agent,
            stop_loss_handler: RwLock::new(None),
            running: RwLock::new(false),
            state_version: AtomicU64::new(0),
            start_time: Instant::now(),
        })
    }

    pub fn universe(&self) -> Universe {
        self.ctx.universe
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    /// Registers the stop-loss-to-sell conversion handler and starts every
    /// agent. A second `start()` on an already-running Coordinator is a
    /// no-op — callers transition by building a new Coordinator instead.
    pub fn start(self: &Arc<Self>) {
        if *self.running.read() {
            return;
        }

        let this = self.clone();
        let handler: Handler = Arc::new(move |event| {
            let this = this.clone();
            Box::pin(async move {
                if let Event::StopLossTriggered(triggered) = event {
                    this.convert_stop_loss_to_sell(triggered).await;
                }
            })
        });
        self.bus.subscribe(EventKind::StopLossTriggered, handler.clone());
        *self.stop_loss_handler.write() = Some(handler);

        self.data_agent.start(self.config.clone());
        self.monitor_agent.start(self.config.clone());
        self.signal_agent.start();
        self.risk_agent.start();
        self.execution_agent.start();
        self.observability_agent.start();
        self.analytics_agent.start();
        self.alert_agent.start();

        *self.running.write() = true;
        self.increment_version();
        info!(universe = %self.ctx.universe, session_id = %self.ctx.session_id, "coordinator started");
    }

    /// Unsubscribes handlers, cancels the scheduled agents' tasks, awaits
    /// their wind-down, and publishes a final shutdown log line. A second
    /// call is a no-op (spec §5).
    pub async fn stop(self: &Arc<Self>) {
        if !*self.running.read() {
            return;
        }

        if let Some(handler) = self.stop_loss_handler.write().take() {
            self.bus.unsubscribe(EventKind::StopLossTriggered, &handler);
        }

        self.data_agent.stop().await;
        self.monitor_agent.stop().await;

        let event = Event::LogEvent(LogEvent {
            prov: provenance(&self.ctx, "coordinator"),
            message: "shutting down".to_string(),
            data: json!({}),
        });
        if let Err(e) = self.bus.publish(event).await {
            warn!(error = %e, "failed to publish shutdown log event");
        }

        *self.running.write() = false;
        self.increment_version();
        info!(universe = %self.ctx.universe, "coordinator stopped");
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    /// Converts a stop-loss breach directly into a sell, bypassing
    /// RiskAgent — the breach itself is the risk decision (spec §4.11).
    async fn convert_stop_loss_to_sell(&self, triggered: StopLossTriggered) {
        let trade_value = match self.broker.get_position(&triggered.symbol).await {
            Ok(Some(position)) => position.market_value,
            _ => {
                warn!(symbol = %triggered.symbol, "stop loss triggered but position vanished before conversion");
                return;
            }
        };

        let event = Event::RiskCheckPassed(RiskCheckPassed {
            prov: provenance(&self.ctx, "coordinator"),
            symbol: triggered.symbol,
            action: Side::Sell,
            trade_value,
            position_pct: 0.0,
            reason: "stop loss".to_string(),
        });
        if let Err(e) = self.bus.publish(event).await {
            warn!(error = %e, "failed to publish synthesized stop-loss sell");
        }
    }

    pub async fn manual_trade(&self, symbol: &str, side: Side, amount: ManualAmount) -> Result<(), String> {
        let result = self.execution_agent.execute_manual_trade(symbol, side, amount).await;
        self.increment_version();
        result
    }

    pub fn reset_circuit_breaker(&self) {
        self.risk_agent.reset_circuit_breaker();
        self.increment_version();
    }

    pub fn set_broadcast_callback(&self, callback: BroadcastCallback) {
        self.alert_agent.set_broadcast_callback(callback);
    }

    pub fn recent_alert_logs(&self, count: usize) -> Vec<Value> {
        self.alert_agent.get_logs(count)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Builds the UI-facing status shape (spec §6):
    /// `{account, positions, bot:{...}, top_gainers, market_indices}`.
    pub async fn status(&self) -> Value {
        let account = match self.broker.get_account().await {
            Ok(acct) => serde_json::to_value(acct).unwrap_or(json!({})),
            Err(e) => {
                warn!(error = %e, "status: account fetch failed");
                json!({})
            }
        };
        let positions = match self.broker.get_positions().await {
            Ok(ps) => {
                let map: std::collections::HashMap<String, _> = ps.into_iter().collect();
                serde_json::to_value(map).unwrap_or(json!({}))
            }
            Err(e) => {
                warn!(error = %e, "status: positions fetch failed");
                json!({})
            }
        };

        let config = self.config.read().clone();
        let market_open = self.broker.is_market_open() || self.ctx.universe.allows_market_hours_override();

        json!({
            "account": account,
            "positions": positions,
            "bot": {
                "running": self.is_running(),
                "auto_trade": config.auto_trade.0,
                "market_open": market_open,
                "universe": self.ctx.universe.to_string(),
                "trading_mode": if config.auto_trade.0 { "auto" } else { "manual" },
                "error": Value::Null,
                "daily_trades": self.risk_agent.daily_trade_count(),
                "max_daily_trades": config.max_daily_trades,
            },
            "top_gainers": Value::Array(vec![]),
            "market_indices": Value::Object(Default::default()),
        })
    }
}

// =============================================================================
// AppState — destructive universe transitions
// =============================================================================

pub type BrokerFactory = Arc<dyn Fn(Universe) -> Result<Arc<dyn Broker>> + Send + Sync>;
pub type AnalyticsFactory = Arc<dyn Fn(Universe) -> Arc<AnalyticsStore> + Send + Sync>;
pub type CoordinatorFactory = Arc<
    dyn Fn(UniverseContext, Arc<dyn Broker>, Arc<AnalyticsStore>, Arc<RwLock<RuntimeConfig>>) -> Arc<Coordinator>
        + Send
        + Sync,
>;

struct Bound {
    ctx: UniverseContext,
    broker: Arc<dyn Broker>,
    store: Arc<AnalyticsStore>,
    coordinator: Arc<Coordinator>,
}

/// Wraps the currently-bound Coordinator (plus its broker/store) behind the
/// destructive-transition protocol. No event bus, broker, or store here
/// ever observes more than one universe across its own lifetime — a
/// transition always builds an entirely new set via the injected
/// factories.
pub struct AppState {
    bound: RwLock<Bound>,
    config: Arc<RwLock<RuntimeConfig>>,
    broker_factory: BrokerFactory,
    analytics_factory: AnalyticsFactory,
    coordinator_factory: CoordinatorFactory,
    start_time: Instant,
    last_error: RwLock<Option<String>>,
    ws_tx: tokio::sync::broadcast::Sender<Value>,
}

const WS_CHANNEL_CAPACITY: usize = 256;

/// Forwards every AlertAgent broadcast onto `tx`, so every live WS
/// connection's own receiver sees it regardless of which universe's
/// coordinator is currently bound. Installed on every coordinator built
/// across the lifetime of an AppState, including ones built mid-transition.
fn ws_forwarding_callback(tx: tokio::sync::broadcast::Sender<Value>) -> BroadcastCallback {
    Arc::new(move |payload| {
        let tx = tx.clone();
        let fut: BroadcastFuture = Box::pin(async move {
            let _ = tx.send(payload);
        });
        fut
    })
}

impl AppState {
    /// Constructs the initial binding for `universe`. Subsequent universe
    /// changes go through [`AppState::transition_to`], never this.
    pub fn new(
        universe: Universe,
        broker_factory: BrokerFactory,
        analytics_factory: AnalyticsFactory,
        coordinator_factory: CoordinatorFactory,
    ) -> Result<Arc<Self>> {
        let config = Arc::new(RwLock::new(load_or_default_config(universe)));
        let ctx = UniverseContext::new(universe);

        let broker = (broker_factory)(universe).with_context(|| format!("failed to construct broker for {universe}"))?;
        assert_universe(broker.universe(), universe, "broker")?;

        let store = (analytics_factory)(universe);
        assert_universe(store.universe, universe, "analytics store")?;

        let coordinator = (coordinator_factory)(ctx.clone(), broker.clone(), store.clone(), config.clone());
        assert_universe(coordinator.universe(), universe, "coordinator")?;

        let (ws_tx, _) = tokio::sync::broadcast::channel(WS_CHANNEL_CAPACITY);
        coordinator.set_broadcast_callback(ws_forwarding_callback(ws_tx.clone()));

        Ok(Arc::new(Self {
            bound: RwLock::new(Bound { ctx, broker, store, coordinator }),
            config,
            broker_factory,
            analytics_factory,
            coordinator_factory,
            start_time: Instant::now(),
            last_error: RwLock::new(None),
            ws_tx,
        }))
    }

    /// Subscribes a new WebSocket connection to the AlertAgent log stream.
    /// The returned receiver stays valid across universe transitions — it is
    /// backed by the same channel every coordinator built by this AppState
    /// forwards onto.
    pub fn subscribe_ws(&self) -> tokio::sync::broadcast::Receiver<Value> {
        self.ws_tx.subscribe()
    }

    pub fn current_universe(&self) -> Universe {
        self.bound.read().ctx.universe
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        self.bound.read().coordinator.clone()
    }

    pub fn config(&self) -> Arc<RwLock<RuntimeConfig>> {
        self.config.clone()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
    }

    pub async fn start(&self) {
        self.bound.read().coordinator.clone().start();
    }

    pub async fn stop(&self) {
        self.bound.read().coordinator.clone().stop().await;
    }

    /// Tears down the currently-bound broker/coordinator/store and rebuilds
    /// an entirely new set for `to`, per the destructive-transition
    /// protocol (spec §4.13).
    pub async fn transition_to(&self, to: Universe, reason: &str) -> Result<()> {
        let old = {
            let bound = self.bound.read();
            Bound {
                ctx: bound.ctx.clone(),
                broker: bound.broker.clone(),
                store: bound.store.clone(),
                coordinator: bound.coordinator.clone(),
            }
        };

        let metadata =
            validate_universe_transition(old.ctx.universe, to, reason).map_err(|e| anyhow!(e.to_string()))?;
        warn!(warning = %metadata.warning, transition_id = %metadata.transition_id, "destructive universe transition starting");

        old.coordinator.stop().await;
        drop(old.broker);
        drop(old.store);

        let new_ctx = UniverseContext::new(to);

        let new_broker =
            (self.broker_factory)(to).with_context(|| format!("failed to construct broker for {to}"))?;
        assert_universe(new_broker.universe(), to, "broker")?;

        let new_store = (self.analytics_factory)(to);
        assert_universe(new_store.universe, to, "analytics store")?;

        {
            let mut config = self.config.write();
            *config = load_or_default_config(to);
        }

        let new_coordinator =
            (self.coordinator_factory)(new_ctx.clone(), new_broker.clone(), new_store.clone(), self.config.clone());
        assert_universe(new_coordinator.universe(), to, "coordinator")?;
        new_coordinator.set_broadcast_callback(ws_forwarding_callback(self.ws_tx.clone()));
        new_coordinator.start();

        *self.bound.write() = Bound { ctx: new_ctx, broker: new_broker, store: new_store, coordinator: new_coordinator };

        info!(from = %old.ctx.universe, to = %to, reason, "destructive universe transition complete");
        Ok(())
    }

    pub async fn manual_trade(&self, symbol: &str, side: Side, amount: ManualAmount) -> Result<(), String> {
        self.coordinator().manual_trade(symbol, side, amount).await
    }

    pub async fn status(&self) -> Value {
        self.coordinator().status().await
    }

    pub fn reset_circuit_breaker(&self) {
        self.coordinator().reset_circuit_breaker();
    }
}

fn assert_universe(got: Universe, expected: Universe, component: &str) -> Result<()> {
    if got != expected {
        return Err(anyhow!("{component} bound to {got} but {expected} was requested"));
    }
    Ok(())
}

fn load_or_default_config(universe: Universe) -> RuntimeConfig {
    let path = data_path(universe, "config_state.json");
    match RuntimeConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "runtime config missing or unreadable, using defaults");
            RuntimeConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SimBroker;

    fn broker_factory() -> BrokerFactory {
        Arc::new(|universe| match universe {
            Universe::Simulation => Ok(Arc::new(SimBroker::new(universe)?) as Arc<dyn Broker>),
            other => Err(anyhow!("no broker configured for {other}")),
        })
    }

    fn analytics_factory() -> AnalyticsFactory {
        Arc::new(|universe| Arc::new(AnalyticsStore::new(universe)))
    }

    fn coordinator_factory() -> CoordinatorFactory {
        Arc::new(Coordinator::new)
    }

    #[tokio::test]
    async fn new_binds_to_requested_universe() {
        let state = AppState::new(Universe::Simulation, broker_factory(), analytics_factory(), coordinator_factory())
            .unwrap();
        assert_eq!(state.current_universe(), Universe::Simulation);
        assert_eq!(state.coordinator().universe(), Universe::Simulation);
    }

    #[tokio::test]
    async fn transition_rejects_same_universe() {
        let state = AppState::new(Universe::Simulation, broker_factory(), analytics_factory(), coordinator_factory())
            .unwrap();
        let err = state.transition_to(Universe::Simulation, "noop").await.unwrap_err();
        assert!(err.to_string().contains("not a valid destructive transition"));
    }

    #[tokio::test]
    async fn status_reports_bound_universe() {
        let state = AppState::new(Universe::Simulation, broker_factory(), analytics_factory(), coordinator_factory())
            .unwrap();
        let status = state.status().await;
        assert_eq!(status["bot"]["universe"], json!("simulation"));
    }
}
