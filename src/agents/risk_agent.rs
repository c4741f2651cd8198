// =============================================================================
// RiskAgent — the hard gate (spec §4.9)
// =============================================================================
//
// Listens to SignalGenerated. Rolls the daily trade counter on a
// market-timezone date change, checks the circuit breaker, sizes the trade,
// and for buys additionally checks sector and correlation exposure before
// emitting RiskCheckPassed/RiskCheckFailed. The trade counter is incremented
// only by ExecutionAgent's back-channel call on confirmed fills, never here.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::warn;

use crate::broker::Broker;
use crate::event_bus::EventBus;
use crate::events::{Event, EventKind, RiskCheckFailed, RiskCheckPassed, Side, SignalGenerated};
use crate::risk::{CircuitBreaker, PositionSizer};
use crate::runtime_config::RuntimeConfig;
use crate::universe::UniverseContext;

use super::provenance;

struct DailyCounter {
    count: u32,
    last_date: Option<NaiveDate>,
}

/// Cache key for a loaded sector map: the two config inputs that can
/// produce one, so a reload only happens when either changes.
#[derive(Clone, PartialEq, Eq)]
struct SectorMapKey {
    path: Option<String>,
    inline_json: Option<String>,
}

struct SectorMapCache {
    key: Option<SectorMapKey>,
    map: HashMap<String, String>,
}

pub struct RiskAgent {
    ctx: UniverseContext,
    bus: Arc<EventBus>,
    broker: Arc<dyn Broker>,
    config: Arc<RwLock<RuntimeConfig>>,
    market_tz: Tz,
    sizer: PositionSizer,
    breaker: CircuitBreaker,
    daily: RwLock<DailyCounter>,
    sector_cache: RwLock<SectorMapCache>,
}

impl RiskAgent {
    pub fn new(
        ctx: UniverseContext,
        bus: Arc<EventBus>,
        broker: Arc<dyn Broker>,
        config: Arc<RwLock<RuntimeConfig>>,
    ) -> Self {
        let market_tz: Tz = config.read().market_timezone.parse().unwrap_or(chrono_tz::America::New_York);
        let (daily_loss, drawdown) = {
            let cfg = config.read();
            (cfg.daily_loss_limit_pct, cfg.max_drawdown_pct)
        };
        Self {
            ctx,
            bus,
            broker,
            config,
            market_tz,
            sizer: PositionSizer::default(),
            breaker: CircuitBreaker::new(daily_loss, drawdown, market_tz),
            daily: RwLock::new(DailyCounter { count: 0, last_date: None }),
            sector_cache: RwLock::new(SectorMapCache { key: None, map: HashMap::new() }),
        }
    }

    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        self.bus.subscribe(
            EventKind::SignalGenerated,
            Arc::new(move |event| {
                let this = this.clone();
                Box::pin(async move {
                    if let Event::SignalGenerated(signal) = event {
                        this.handle(signal).await;
                    }
                })
            }),
        );
    }

    /// Called by ExecutionAgent after a confirmed fill. This is the only
    /// place the daily counter advances — rejected/failed orders never
    /// count against the limit.
    pub fn increment_trade_count(&self) {
        self.roll_day_if_needed();
        self.daily.write().count += 1;
    }

    pub fn reset_circuit_breaker(&self) {
        self.breaker.reset();
    }

    /// Current daily trade count, rolling the market-tz day first so a
    /// status read right after midnight reflects the new day's zero.
    pub fn daily_trade_count(&self) -> u32 {
        self.roll_day_if_needed();
        self.daily.read().count
    }

    pub fn circuit_breaker_state(&self) -> crate::risk::circuit_breaker::CircuitBreakerState {
        self.breaker.snapshot()
    }

    fn roll_day_if_needed(&self) {
        let today = Utc::now().with_timezone(&self.market_tz).date_naive();
        let mut daily = self.daily.write();
        if daily.last_date != Some(today) {
            daily.last_date = Some(today);
            daily.count = 0;
        }
    }

    async fn handle(&self, signal: SignalGenerated) {
        if !signal.action.is_actionable() {
            return;
        }

        let config = self.config.read().clone();
        self.roll_day_if_needed();

        if self.daily.read().count >= config.max_daily_trades {
            self.fail(&signal, "risk_daily_limit", "daily trade limit reached").await;
            return;
        }

        let portfolio_value = match self.broker.get_portfolio_value().await {
            Ok(v) if v > 0.0 => v,
            _ => {
                self.fail(&signal, "risk_invalid_portfolio", "could not determine portfolio value").await;
                return;
            }
        };
        let buying_power = match self.broker.get_buying_power().await {
            Ok(v) => v,
            Err(_) => {
                self.fail(&signal, "risk_invalid_portfolio", "could not determine buying power").await;
                return;
            }
        };

        let (breaker_active, breaker_reason) = self.breaker.update(portfolio_value, Utc::now());
        let side = match signal.action.as_side() {
            Some(s) => s,
            None => return,
        };

        if breaker_active && side == Side::Buy {
            self.fail(
                &signal,
                "circuit_breaker",
                &breaker_reason.unwrap_or_else(|| "circuit breaker active".to_string()),
            )
            .await;
            return;
        }

        match side {
            Side::Buy => self.check_buy(&signal, &config, portfolio_value, buying_power).await,
            Side::Sell => self.check_sell(&signal, portfolio_value).await,
        }
    }

    async fn check_buy(&self, signal: &SignalGenerated, config: &RuntimeConfig, portfolio_value: f64, buying_power: f64) {
        let positions = match self.broker.get_positions().await {
            Ok(p) => p,
            Err(_) => {
                self.fail(signal, "risk_invalid_portfolio", "could not list positions").await;
                return;
            }
        };
        if positions.len() >= config.max_open_positions {
            self.fail(signal, "max_open_positions", "max open positions reached").await;
            return;
        }

        let trade_value =
            self.sizer.calculate(signal.strength, portfolio_value, buying_power, config.max_position_pct);

        if trade_value < config.min_trade_value {
            self.fail(signal, "min_trade_value", "sized trade below minimum trade value").await;
            return;
        }
        if buying_power < config.min_trade_value {
            self.fail(signal, "insufficient_buying_power", "buying power below minimum trade value").await;
            return;
        }

        let sector_map = self.sector_map(config);
        if let Some(symbol_sector) = sector_map.get(&signal.symbol) {
            let mut sector_exposure = trade_value;
            for (sym, pos) in &positions {
                if sector_map.get(sym) == Some(symbol_sector) {
                    sector_exposure += pos.market_value;
                }
            }
            if sector_exposure > config.max_sector_exposure_pct * portfolio_value {
                self.fail(
                    signal,
                    "sector_exposure",
                    &format!("Sector exposure for '{symbol_sector}' would reach {sector_exposure:.2}, over the {:.0}% cap", config.max_sector_exposure_pct * 100.0),
                )
                .await;
                return;
            }
        }

        let mut correlated_value = 0.0;
        let mut existing_same_symbol = 0.0;
        for (sym, pos) in &positions {
            if sym == &signal.symbol {
                existing_same_symbol += pos.market_value;
                continue;
            }
            match self.pearson_correlation(sym, &signal.symbol, config.correlation_lookback_days).await {
                Some(corr) if corr >= config.correlation_threshold => correlated_value += pos.market_value,
                _ => {}
            }
        }
        if portfolio_value > 0.0
            && (correlated_value + existing_same_symbol + trade_value) / portfolio_value
                > config.max_correlated_exposure_pct
        {
            self.fail(signal, "correlation_exposure", "correlated exposure would exceed the configured cap").await;
            return;
        }

        let position_pct = trade_value / portfolio_value;
        let event = Event::RiskCheckPassed(RiskCheckPassed {
            prov: provenance(&self.ctx, "risk_agent"),
            symbol: signal.symbol.clone(),
            action: Side::Buy,
            trade_value,
            position_pct,
            reason: format!("sized buy at {:.2}% of portfolio", position_pct * 100.0),
        });
        if let Err(e) = self.bus.publish(event).await {
            warn!(error = %e, "failed to publish RiskCheckPassed");
        }
    }

    async fn check_sell(&self, signal: &SignalGenerated, _portfolio_value: f64) {
        let position = match self.broker.get_position(&signal.symbol).await {
            Ok(Some(p)) => p,
            _ => {
                self.fail(signal, "no_position", "no open position to sell").await;
                return;
            }
        };

        let event = Event::RiskCheckPassed(RiskCheckPassed {
            prov: provenance(&self.ctx, "risk_agent"),
            symbol: signal.symbol.clone(),
            action: Side::Sell,
            trade_value: position.market_value,
            position_pct: 0.0,
            reason: "exiting existing position".to_string(),
        });
        if let Err(e) = self.bus.publish(event).await {
            warn!(error = %e, "failed to publish RiskCheckPassed");
        }
    }

    async fn fail(&self, signal: &SignalGenerated, reason_code: &str, reason: &str) {
        let event = Event::RiskCheckFailed(RiskCheckFailed {
            prov: provenance(&self.ctx, "risk_agent"),
            symbol: signal.symbol.clone(),
            action: signal.action,
            reason_code: reason_code.to_string(),
            reason: reason.to_string(),
        });
        if let Err(e) = self.bus.publish(event).await {
            warn!(error = %e, "failed to publish RiskCheckFailed");
        }
    }

    /// Loads (and caches) the sector map. A missing or malformed source
    /// logs a warning and falls back to an empty map, which trivially
    /// passes every sector check (DESIGN.md open-question resolution).
    fn sector_map(&self, config: &RuntimeConfig) -> HashMap<String, String> {
        let key = SectorMapKey { path: config.sector_map_path.clone(), inline_json: config.sector_map_json.clone() };

        {
            let cache = self.sector_cache.read();
            if cache.key.as_ref() == Some(&key) {
                return cache.map.clone();
            }
        }

        let map = load_sector_map(&key);
        let mut cache = self.sector_cache.write();
        cache.key = Some(key);
        cache.map = map.clone();
        map
    }

    /// Pearson correlation of daily returns between `held_symbol` and
    /// `candidate_symbol` over the lookback window, aligned on their inner
    /// intersection. Returns `None` if there are fewer than 3 joint
    /// samples.
    async fn pearson_correlation(&self, held_symbol: &str, candidate_symbol: &str, lookback_days: usize) -> Option<f64> {
        let a = self.broker.get_bars(held_symbol, lookback_days).await.ok()?;
        let b = self.broker.get_bars(candidate_symbol, lookback_days).await.ok()?;
        let returns_a = daily_returns(&a.closes());
        let returns_b = daily_returns(&b.closes());
        let n = returns_a.len().min(returns_b.len());
        if n < 3 {
            return None;
        }
        let a_tail = &returns_a[returns_a.len() - n..];
        let b_tail = &returns_b[returns_b.len() - n..];
        pearson(a_tail, b_tail)
    }
}

fn daily_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .map(|w| if w[0] != 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len();
    if n == 0 || n != b.len() {
        return None;
    }
    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}

fn load_sector_map(key: &SectorMapKey) -> HashMap<String, String> {
    let raw: Option<Value> = if let Some(inline) = &key.inline_json {
        match serde_json::from_str(inline) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "sector_map_json is malformed, proceeding with empty sector map");
                None
            }
        }
    } else if let Some(path) = &key.path {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(path = %path, error = %e, "sector map file is malformed, proceeding with empty sector map");
                    None
                }
            },
            Err(e) => {
                warn!(path = %path, error = %e, "sector map file missing, proceeding with empty sector map");
                None
            }
        }
    } else {
        None
    };

    raw.and_then(|v| v.as_object().cloned())
        .map(|obj| obj.into_iter().filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string()))).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, OrderQuantity, OrderSide, SimBroker};
    use crate::events::SignalAction;
    use crate::universe::Universe;

    #[test]
    fn pearson_perfectly_correlated_series() {
        let a = vec![0.01, 0.02, -0.01, 0.03];
        let b = vec![0.02, 0.04, -0.02, 0.06];
        let corr = pearson(&a, &b).unwrap();
        assert!((corr - 1.0).abs() < 1e-9);
    }

    #[test]
    fn pearson_none_below_three_samples() {
        assert!(pearson(&[0.01, 0.02], &[0.01, 0.02]).is_none());
    }

    #[test]
    fn sector_map_missing_file_yields_empty_map() {
        let key = SectorMapKey { path: Some("/nonexistent/sector_map.json".to_string()), inline_json: None };
        assert!(load_sector_map(&key).is_empty());
    }

    #[test]
    fn sector_map_parses_inline_json() {
        let key =
            SectorMapKey { path: None, inline_json: Some(r#"{"AAA":"Tech","BBB":"Energy"}"#.to_string()) };
        let map = load_sector_map(&key);
        assert_eq!(map.get("AAA"), Some(&"Tech".to_string()));
    }

    #[test]
    fn sector_map_malformed_inline_json_yields_empty_map() {
        let key = SectorMapKey { path: None, inline_json: Some("not json".to_string()) };
        assert!(load_sector_map(&key).is_empty());
    }

    #[tokio::test]
    async fn buy_rejected_when_sector_exposure_would_exceed_cap() {
        let ctx = UniverseContext::new(Universe::Simulation);
        let bus = Arc::new(EventBus::new(ctx.clone()));

        let broker = SimBroker::new(Universe::Simulation).unwrap();
        broker.seed_price("BBB", 100.0);
        broker.seed_price("CCC", 100.0);
        broker.submit_order("BBB", OrderSide::Buy, OrderQuantity::Notional(20_000.0), "seed-BBB").await.unwrap();
        broker.submit_order("CCC", OrderSide::Buy, OrderQuantity::Notional(20_000.0), "seed-CCC").await.unwrap();
        let broker: Arc<dyn Broker> = Arc::new(broker);

        let mut config = RuntimeConfig::default();
        config.max_sector_exposure_pct = 0.30;
        config.sector_map_json = Some(r#"{"AAA":"Tech","BBB":"Tech","CCC":"Tech"}"#.to_string());
        let config = Arc::new(RwLock::new(config));

        let agent = RiskAgent::new(ctx, bus.clone(), broker.clone(), config.clone());

        let portfolio_value = broker.get_portfolio_value().await.unwrap();
        let buying_power = broker.get_buying_power().await.unwrap();
        assert_eq!(portfolio_value, 100_000.0);

        let signal = SignalGenerated {
            prov: provenance(&agent.ctx, "test"),
            symbol: "AAA".to_string(),
            action: SignalAction::Buy,
            strength: 0.9,
            reason: "momentum".to_string(),
            current_price: 50.0,
            momentum: 0.05,
        };

        agent.check_buy(&signal, &config.read().clone(), portfolio_value, buying_power).await;

        let recent = bus.recent_events();
        let last = recent.last().expect("an event should have been published");
        match last {
            Event::RiskCheckFailed(failed) => {
                assert_eq!(failed.reason_code, "sector_exposure");
                assert!(failed.reason.contains("Sector exposure"), "{}", failed.reason);
            }
            other => panic!("expected RiskCheckFailed, got {other:?}"),
        }
    }
}
