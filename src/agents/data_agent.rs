// =============================================================================
// DataAgent — scheduled market snapshot → MarketDataReady (spec §4.7)
// =============================================================================
//
// Owns one scheduling task. Each tick resolves the watchlist (static or a
// top-gainers screen), unions it with currently held symbols, fetches
// snapshots/bars/index proxies, and publishes a single MarketDataReady.
// Per-symbol fetch failures are logged and skipped — the tick still
// publishes with whatever data it gathered.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broker::{Broker, Snapshot};
use crate::event_bus::EventBus;
use crate::events::{Event, MarketDataReady};
use crate::runtime_config::{RuntimeConfig, WatchlistMode};
use crate::universe::UniverseContext;

use super::provenance;

/// Default index proxies used for the market-direction readout. Not part of
/// the config surface (spec §6 never names it); a fixed, documented default
/// is simpler than threading one more knob through RuntimeConfig for a
/// display-only figure.
const DEFAULT_INDEX_SYMBOLS: &[&str] = &["SPY", "QQQ", "DIA"];

pub struct DataAgent {
    ctx: UniverseContext,
    bus: Arc<EventBus>,
    broker: Arc<dyn Broker>,
    index_symbols: Vec<String>,
    task: Mutex<Option<(JoinHandle<()>, watch::Sender<bool>)>>,
}

impl DataAgent {
    pub fn new(ctx: UniverseContext, bus: Arc<EventBus>, broker: Arc<dyn Broker>) -> Self {
        Self {
            ctx,
            bus,
            broker,
            index_symbols: DEFAULT_INDEX_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            task: Mutex::new(None),
        }
    }

    /// Begin the periodic tick loop. `interval_minutes` and `config` are
    /// read fresh from the shared config on every tick so a config change
    /// takes effect on the next one, never mid-tick.
    pub fn start(self: &Arc<Self>, config: Arc<parking_lot::RwLock<RuntimeConfig>>) {
        let (tx, mut rx) = watch::channel(false);
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                let interval_minutes = config.read().trade_interval.max(1);
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(interval_minutes * 60)) => {}
                    _ = rx.changed() => break,
                }
                if *rx.borrow() {
                    break;
                }
                let cfg = config.read().clone();
                if let Err(e) = this.tick(&cfg).await {
                    warn!(error = %e, "data agent tick failed");
                }
            }
            info!("data agent task wound down");
        });
        *self.task.lock() = Some((handle, tx));
    }

    pub async fn stop(&self) {
        if let Some((handle, tx)) = self.task.lock().take() {
            let _ = tx.send(true);
            let _ = handle.await;
        }
    }

    async fn tick(&self, config: &RuntimeConfig) -> anyhow::Result<()> {
        let market_open = self.broker.is_market_open() || self.ctx.universe.allows_market_hours_override();

        let held: Vec<String> = self
            .broker
            .get_positions()
            .await
            .map(|ps| ps.into_iter().map(|(sym, _)| sym).collect())
            .unwrap_or_default();

        let mut top_gainers = Vec::new();
        let mut watchlist: HashSet<String> = match config.watchlist_mode {
            WatchlistMode::Static => config.watchlist.iter().cloned().collect(),
            WatchlistMode::TopGainers => {
                let universe_symbols = if config.top_gainers_universe.is_empty() {
                    config.watchlist.clone()
                } else {
                    config.top_gainers_universe.clone()
                };
                match self.broker.get_snapshots(&universe_symbols).await {
                    Ok(snapshots) => {
                        top_gainers = analyze_top_gainers(
                            &snapshots,
                            config.top_gainers_min_price,
                            config.top_gainers_min_volume,
                            config.top_gainers_count,
                        );
                        top_gainers.iter().cloned().collect()
                    }
                    Err(e) => {
                        warn!(error = %e, "top-gainers snapshot fetch failed, watchlist empty this tick");
                        HashSet::new()
                    }
                }
            }
        };
        watchlist.extend(held);
        let symbols: Vec<String> = watchlist.into_iter().collect();

        let mut prices = HashMap::new();
        let mut bars = HashMap::new();
        for symbol in &symbols {
            match self.broker.get_current_price(symbol).await {
                Ok(price) => {
                    prices.insert(symbol.clone(), price);
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "price fetch failed, skipping symbol this tick"),
            }
            match self.broker.get_bars(symbol, config.lookback_days).await {
                Ok(b) => {
                    bars.insert(symbol.clone(), b.to_value());
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "bars fetch failed, skipping symbol this tick"),
            }
        }

        let mut market_indices = HashMap::new();
        if let Ok(index_snaps) = self.broker.get_snapshots(&self.index_symbols).await {
            for (symbol, snap) in index_snaps {
                market_indices.insert(symbol, snap.pct_change());
            }
        }

        let account = match self.broker.get_account().await {
            Ok(acct) => serde_json::to_value(acct).unwrap_or(json!({})),
            Err(e) => {
                warn!(error = %e, "account fetch failed");
                json!({})
            }
        };
        let positions = match self.broker.get_positions().await {
            Ok(ps) => {
                let map: HashMap<String, _> = ps.into_iter().collect();
                serde_json::to_value(map).unwrap_or(json!({}))
            }
            Err(e) => {
                warn!(error = %e, "positions fetch failed");
                json!({})
            }
        };

        let event = Event::MarketDataReady(MarketDataReady {
            prov: provenance(&self.ctx, "data_agent"),
            symbols,
            prices,
            bars,
            account,
            positions,
            top_gainers,
            market_indices,
            market_open,
        });

        self.bus.publish(event).await?;
        Ok(())
    }
}

/// Ranks symbols by percent change from previous close, filtered by price
/// and volume floors. If the primary (price+volume-qualified) set is short
/// of `count`, backfills from candidates that cleared the price floor but
/// not the volume floor, still ranked by percent change.
pub fn analyze_top_gainers(
    snapshots: &[(String, Snapshot)],
    min_price: f64,
    min_volume: f64,
    count: usize,
) -> Vec<String> {
    let price_qualified: Vec<&(String, Snapshot)> =
        snapshots.iter().filter(|(_, s)| s.price >= min_price).collect();

    let mut primary: Vec<&(String, Snapshot)> =
        price_qualified.iter().copied().filter(|(_, s)| s.volume >= min_volume).collect();
    primary.sort_by(|a, b| b.1.pct_change().partial_cmp(&a.1.pct_change()).unwrap_or(std::cmp::Ordering::Equal));

    let mut ranked: Vec<String> = primary.iter().map(|(sym, _)| sym.clone()).collect();

    if ranked.len() < count {
        let mut backfill: Vec<&(String, Snapshot)> =
            price_qualified.iter().copied().filter(|(_, s)| s.volume < min_volume).collect();
        backfill.sort_by(|a, b| b.1.pct_change().partial_cmp(&a.1.pct_change()).unwrap_or(std::cmp::Ordering::Equal));
        for (sym, _) in backfill {
            if ranked.len() >= count {
                break;
            }
            ranked.push(sym.clone());
        }
    }

    ranked.truncate(count);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(price: f64, prev_close: f64, volume: f64) -> Snapshot {
        Snapshot { price, prev_close, volume }
    }

    #[test]
    fn ranks_by_percent_change_with_price_and_volume_floors() {
        let snapshots = vec![
            ("AAA".to_string(), snap(110.0, 100.0, 2_000_000.0)),
            ("BBB".to_string(), snap(105.0, 100.0, 500_000.0)),
            ("CCC".to_string(), snap(102.0, 100.0, 2_000_000.0)),
            ("DDD".to_string(), snap(4.0, 4.0, 2_000_000.0)),
        ];
        let ranked = analyze_top_gainers(&snapshots, 5.0, 1_000_000.0, 2);
        assert_eq!(ranked, vec!["AAA".to_string(), "CCC".to_string()]);
    }

    #[test]
    fn backfills_from_low_volume_candidates_when_short() {
        let snapshots = vec![
            ("AAA".to_string(), snap(110.0, 100.0, 2_000_000.0)),
            ("BBB".to_string(), snap(108.0, 100.0, 500_000.0)),
        ];
        let ranked = analyze_top_gainers(&snapshots, 5.0, 1_000_000.0, 2);
        assert_eq!(ranked, vec!["AAA".to_string(), "BBB".to_string()]);
    }

    #[test]
    fn excludes_below_price_floor_even_on_backfill() {
        let snapshots = vec![("DDD".to_string(), snap(4.0, 4.0, 2_000_000.0))];
        let ranked = analyze_top_gainers(&snapshots, 5.0, 1_000_000.0, 2);
        assert!(ranked.is_empty());
    }
}
