// =============================================================================
// Aurora Trader — Main Entry Point
// =============================================================================
//
// The universe to run under is resolved once at startup from
// `AURORA_UNIVERSE` and never inferred: it defaults to SIMULATION so an
// operator has to opt into PAPER or LIVE explicitly.
// =============================================================================

mod agents;
mod analytics_store;
mod api;
mod app_state;
mod broker;
mod event_bus;
mod events;
mod risk;
mod runtime_config;
mod strategy;
mod universe;

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::{AnalyticsFactory, AppState, BrokerFactory, CoordinatorFactory};
use crate::broker::{Broker, LiveBroker, SimBroker};
use crate::universe::{data_path, Universe};

fn broker_factory() -> BrokerFactory {
    Arc::new(|universe| -> Result<Arc<dyn Broker>> {
        match universe {
            Universe::Simulation => Ok(Arc::new(SimBroker::new(universe)?) as Arc<dyn Broker>),
            Universe::Paper | Universe::Live => {
                let base_url = std::env::var("ALPACA_BASE_URL")
                    .unwrap_or_else(|_| "https://paper-api.alpaca.markets".to_string());
                let api_key_id = std::env::var("ALPACA_API_KEY_ID").unwrap_or_default();
                let api_secret_key = std::env::var("ALPACA_API_SECRET_KEY").unwrap_or_default();
                let data_feed = std::env::var("ALPACA_DATA_FEED").unwrap_or_else(|_| "iex".to_string());
                Ok(Arc::new(LiveBroker::new(universe, base_url, api_key_id, api_secret_key, data_feed)?) as Arc<dyn Broker>)
            }
        }
    })
}

fn analytics_factory() -> AnalyticsFactory {
    Arc::new(|universe| Arc::new(analytics_store::AnalyticsStore::new(universe)))
}

fn coordinator_factory() -> CoordinatorFactory {
    Arc::new(app_state::Coordinator::new)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║              Aurora Trader — Starting Up                 ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let universe = std::env::var("AURORA_UNIVERSE")
        .ok()
        .map(|s| Universe::from_str(&s))
        .transpose()
        .map_err(|e| anyhow!(e.to_string()))?
        .unwrap_or(Universe::Simulation);

    if universe.requires_explicit_confirmation() && std::env::var("AURORA_CONFIRM_LIVE").as_deref() != Ok("yes") {
        return Err(anyhow!(
            "refusing to start in LIVE universe without AURORA_CONFIRM_LIVE=yes — real capital is at risk"
        ));
    }

    info!(%universe, "resolved execution universe");

    let state = AppState::new(universe, broker_factory(), analytics_factory(), coordinator_factory())
        .context("failed to construct initial application state")?;

    {
        let config = state.config();
        let config = config.read();
        info!(
            strategy = %config.strategy,
            watchlist = ?config.watchlist,
            auto_trade = config.auto_trade.0,
            "runtime configuration loaded"
        );
    }

    state.start().await;

    let server_state = state.clone();
    let bind_addr = std::env::var("AURORA_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
    let server_task = tokio::spawn(async move {
        let app = api::router(server_state);
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %bind_addr, error = %e, "failed to bind API server");
                return;
            }
        };
        info!(addr = %bind_addr, "API server listening");
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("Aurora Trader running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    server_task.abort();
    state.stop().await;

    let config_path = data_path(state.current_universe(), "config_state.json");
    if let Err(e) = state.config().read().save(&config_path) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("Aurora Trader shut down complete.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universe_env_var_is_case_insensitive_and_defaults_to_simulation() {
        assert_eq!(Universe::from_str("LIVE").unwrap(), Universe::Live);
        assert_eq!(Universe::from_str("sim").unwrap(), Universe::Simulation);
    }
}
