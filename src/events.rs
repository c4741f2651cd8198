// =============================================================================
// Event — tagged-variant event model carried through the bus
// =============================================================================
//
// The source dispatches on `isinstance(event, SomeClass)`. A tagged enum plus
// a routing table keyed by discriminator is the idiomatic replacement: no
// reflection, and the compiler enforces that every handler matches on a
// closed set of variants.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::universe::{Universe, UniverseContext, ValidityClass};

/// Provenance every event carries, regardless of variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub universe: Universe,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub data_lineage_id: Option<String>,
    pub validity_class: Option<ValidityClass>,
}

impl Provenance {
    pub fn new(ctx: &UniverseContext, source: &str) -> Self {
        Self {
            universe: ctx.universe,
            session_id: ctx.session_id.clone(),
            timestamp: Utc::now(),
            source: source.to_string(),
            data_lineage_id: Some(ctx.data_lineage_id.clone()),
            validity_class: Some(ctx.validity_class),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn is_actionable(self) -> bool {
        !matches!(self, SignalAction::Hold)
    }

    pub fn as_side(self) -> Option<Side> {
        match self {
            SignalAction::Buy => Some(Side::Buy),
            SignalAction::Sell => Some(Side::Sell),
            SignalAction::Hold => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataReady {
    pub prov: Provenance,
    pub symbols: Vec<String>,
    pub prices: HashMap<String, f64>,
    /// Per-symbol OHLCV bars, keyed the way the event producer shaped them.
    pub bars: HashMap<String, Value>,
    pub account: Value,
    pub positions: Value,
    pub top_gainers: Vec<String>,
    pub market_indices: HashMap<String, f64>,
    pub market_open: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalGenerated {
    pub prov: Provenance,
    pub symbol: String,
    pub action: SignalAction,
    pub strength: f64,
    pub reason: String,
    pub current_price: f64,
    pub momentum: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSummary {
    pub symbol: String,
    pub action: SignalAction,
    pub strength: f64,
    pub reason: String,
    pub current_price: f64,
    pub momentum: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalsUpdated {
    pub prov: Provenance,
    pub signals: Vec<SignalSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskCheckPassed {
    pub prov: Provenance,
    pub symbol: String,
    pub action: Side,
    pub trade_value: f64,
    pub position_pct: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskCheckFailed {
    pub prov: Provenance,
    pub symbol: String,
    pub action: SignalAction,
    pub reason_code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderExecuted {
    pub prov: Provenance,
    pub symbol: String,
    pub side: Side,
    pub client_order_id: String,
    pub order_id: Option<String>,
    pub qty: f64,
    pub filled_avg_price: f64,
    pub notional: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFailed {
    pub prov: Provenance,
    pub symbol: String,
    pub side: Side,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopLossTriggered {
    pub prov: Provenance,
    pub symbol: String,
    pub loss_pct: f64,
    pub entry_price: f64,
    pub current_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub prov: Provenance,
    pub message: String,
    pub data: Value,
}

/// The closed set of event variants that flow through the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    MarketDataReady(MarketDataReady),
    SignalGenerated(SignalGenerated),
    SignalsUpdated(SignalsUpdated),
    RiskCheckPassed(RiskCheckPassed),
    RiskCheckFailed(RiskCheckFailed),
    OrderExecuted(OrderExecuted),
    OrderFailed(OrderFailed),
    StopLossTriggered(StopLossTriggered),
    LogEvent(LogEvent),
}

impl Event {
    pub fn provenance(&self) -> &Provenance {
        match self {
            Event::MarketDataReady(e) => &e.prov,
            Event::SignalGenerated(e) => &e.prov,
            Event::SignalsUpdated(e) => &e.prov,
            Event::RiskCheckPassed(e) => &e.prov,
            Event::RiskCheckFailed(e) => &e.prov,
            Event::OrderExecuted(e) => &e.prov,
            Event::OrderFailed(e) => &e.prov,
            Event::StopLossTriggered(e) => &e.prov,
            Event::LogEvent(e) => &e.prov,
        }
    }

    /// Discriminator used for type-specific subscription routing.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::MarketDataReady(_) => EventKind::MarketDataReady,
            Event::SignalGenerated(_) => EventKind::SignalGenerated,
            Event::SignalsUpdated(_) => EventKind::SignalsUpdated,
            Event::RiskCheckPassed(_) => EventKind::RiskCheckPassed,
            Event::RiskCheckFailed(_) => EventKind::RiskCheckFailed,
            Event::OrderExecuted(_) => EventKind::OrderExecuted,
            Event::OrderFailed(_) => EventKind::OrderFailed,
            Event::StopLossTriggered(_) => EventKind::StopLossTriggered,
            Event::LogEvent(_) => EventKind::LogEvent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MarketDataReady,
    SignalGenerated,
    SignalsUpdated,
    RiskCheckPassed,
    RiskCheckFailed,
    OrderExecuted,
    OrderFailed,
    StopLossTriggered,
    LogEvent,
}
