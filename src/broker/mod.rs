// =============================================================================
// Broker — uniform market/order abstraction, universe-bound at construction
// =============================================================================
//
// The concrete live/paper HTTP client is an out-of-scope external
// collaborator (spec §1/§4.4): this module defines the capability surface
// every implementation must provide, a thin reqwest-backed live client that
// shapes requests the way an Alpaca-style REST broker expects, and a full
// in-memory simulation broker used for SIMULATION and in tests.
// =============================================================================

mod live;
mod sim;

pub use live::LiveBroker;
pub use sim::SimBroker;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::strategy::Bars;
use crate::universe::Universe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Filled,
    Rejected,
    PartiallyFilled,
    Pending,
}

/// A single point-in-time read used by the top-gainers screen and index
/// proxy computation: current price, volume, and the previous close it is
/// measured against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Snapshot {
    pub price: f64,
    pub prev_close: f64,
    pub volume: f64,
}

impl Snapshot {
    pub fn pct_change(&self) -> f64 {
        if self.prev_close == 0.0 {
            0.0
        } else {
            (self.price - self.prev_close) / self.prev_close
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub portfolio_value: f64,
    pub cash: f64,
    pub buying_power: f64,
    pub equity: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub current_price: f64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFill {
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: f64,
    pub filled_avg_price: Option<f64>,
    pub notional: Option<f64>,
    pub status: OrderStatus,
    pub submitted_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}

/// A buy/sell submission is specified by either a target quantity or a
/// target notional value, never both.
#[derive(Debug, Clone, Copy)]
pub enum OrderQuantity {
    Qty(f64),
    Notional(f64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    UniverseNotSupported { broker: &'static str, got: Universe },
    EndpointMismatch { universe: Universe, endpoint: String },
    NoPosition(String),
    InsufficientBuyingPower,
    InsufficientShares,
    Connection(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::UniverseNotSupported { broker, got } => {
                write!(f, "{broker} cannot operate in {got} universe")
            }
            BrokerError::EndpointMismatch { universe, endpoint } => {
                write!(f, "universe {universe} does not match configured endpoint {endpoint}")
            }
            BrokerError::NoPosition(symbol) => write!(f, "no open position for {symbol}"),
            BrokerError::InsufficientBuyingPower => write!(f, "insufficient buying power"),
            BrokerError::InsufficientShares => write!(f, "insufficient shares to sell"),
            BrokerError::Connection(msg) => write!(f, "broker connection error: {msg}"),
        }
    }
}

impl std::error::Error for BrokerError {}

/// Capability set every broker implementation must provide (spec §4.4).
#[async_trait]
pub trait Broker: Send + Sync {
    fn universe(&self) -> Universe;

    fn is_market_open(&self) -> bool;

    async fn get_account(&self) -> Result<Account, BrokerError>;
    async fn get_portfolio_value(&self) -> Result<f64, BrokerError> {
        Ok(self.get_account().await?.portfolio_value)
    }
    async fn get_buying_power(&self) -> Result<f64, BrokerError> {
        Ok(self.get_account().await?.buying_power)
    }

    async fn get_positions(&self) -> Result<Vec<(String, Position)>, BrokerError>;
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, BrokerError>;
    async fn get_current_price(&self, symbol: &str) -> Result<f64, BrokerError>;
    async fn get_bars(&self, symbol: &str, days: usize) -> Result<Bars, BrokerError>;
    async fn get_snapshots(&self, symbols: &[String]) -> Result<Vec<(String, Snapshot)>, BrokerError>;

    async fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: OrderQuantity,
        client_order_id: &str,
    ) -> Result<OrderFill, BrokerError>;

    async fn get_asset_name(&self, symbol: &str) -> Option<String>;
}
