// =============================================================================
// SimBroker — in-memory broker for the SIMULATION universe
// =============================================================================
//
// Grounded in `fake_broker.py`: an in-memory account/positions/price book,
// a bounded random jiggle applied on every snapshot read, synchronous fills
// subject to buying-power/inventory checks, and an always-open market.
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rand::Rng;
use uuid::Uuid;

use crate::strategy::{Bar, Bars};
use crate::universe::Universe;

use super::{Account, Broker, BrokerError, OrderFill, OrderQuantity, OrderSide, OrderStatus, Position, Snapshot};

const STARTING_CASH: f64 = 100_000.0;
const JIGGLE_FACTOR: f64 = 0.01;

struct SimState {
    cash: f64,
    buying_power: f64,
    positions: HashMap<String, Position>,
    prices: HashMap<String, f64>,
}

/// In-memory broker that simulates fills against fluctuating synthetic
/// prices. The only broker implementation permitted to bind to
/// `Universe::Simulation`.
pub struct SimBroker {
    universe: Universe,
    state: RwLock<SimState>,
}

impl SimBroker {
    pub fn new(universe: Universe) -> Result<Self, BrokerError> {
        if universe != Universe::Simulation {
            return Err(BrokerError::UniverseNotSupported { broker: "SimBroker", got: universe });
        }
        Ok(Self {
            universe,
            state: RwLock::new(SimState {
                cash: STARTING_CASH,
                buying_power: STARTING_CASH,
                positions: HashMap::new(),
                prices: HashMap::new(),
            }),
        })
    }

    /// Seed (or reseed) a starting price for a symbol not yet tracked.
    pub fn seed_price(&self, symbol: &str, price: f64) {
        self.state.write().prices.entry(symbol.to_string()).or_insert(price.max(0.01));
    }

    fn jiggled_price(&self, symbol: &str) -> f64 {
        let mut state = self.state.write();
        let price = *state.prices.entry(symbol.to_string()).or_insert_with(|| {
            rand::thread_rng().gen_range(10.0..300.0)
        });
        let factor = rand::thread_rng().gen_range(-JIGGLE_FACTOR..JIGGLE_FACTOR);
        let new_price = (price * (1.0 + factor)).max(0.01);
        state.prices.insert(symbol.to_string(), new_price);
        new_price
    }

    fn recompute_portfolio(&self) -> (f64, f64, f64) {
        let mut state = self.state.write();
        let prices = state.prices.clone();
        let mut position_value = 0.0;
        for (symbol, pos) in state.positions.iter_mut() {
            let price = *prices.get(symbol).unwrap_or(&pos.avg_entry_price);
            pos.current_price = price;
            pos.market_value = pos.quantity * price;
            pos.unrealized_pnl = (price - pos.avg_entry_price) * pos.quantity;
            pos.unrealized_pnl_pct = if pos.avg_entry_price > 0.0 {
                (price / pos.avg_entry_price) - 1.0
            } else {
                0.0
            };
            position_value += pos.market_value;
        }
        let equity = state.cash + position_value;
        (state.cash, state.buying_power, equity)
    }
}

#[async_trait]
impl Broker for SimBroker {
    fn universe(&self) -> Universe {
        self.universe
    }

    fn is_market_open(&self) -> bool {
        true
    }

    async fn get_account(&self) -> Result<Account, BrokerError> {
        let (cash, buying_power, equity) = self.recompute_portfolio();
        Ok(Account { portfolio_value: equity, cash, buying_power, equity })
    }

    async fn get_positions(&self) -> Result<Vec<(String, Position)>, BrokerError> {
        self.recompute_portfolio();
        Ok(self.state.read().positions.clone().into_iter().collect())
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, BrokerError> {
        self.recompute_portfolio();
        Ok(self.state.read().positions.get(symbol).copied())
    }

    async fn get_current_price(&self, symbol: &str) -> Result<f64, BrokerError> {
        Ok(self.jiggled_price(symbol))
    }

    async fn get_bars(&self, symbol: &str, days: usize) -> Result<Bars, BrokerError> {
        let price = self.jiggled_price(symbol);
        let mut rng = rand::thread_rng();
        let mut closes = vec![price];
        for _ in 1..days.max(1) {
            let prev = *closes.last().unwrap();
            closes.push((prev * (1.0 + rng.gen_range(-0.02..0.02))).max(0.01));
        }
        closes.reverse();

        let bars = closes
            .iter()
            .map(|&c| Bar {
                close: c,
                open: c * rng.gen_range(0.98..1.02),
                high: c * rng.gen_range(1.0..1.03),
                low: c * rng.gen_range(0.97..1.0),
                volume: rng.gen_range(1_000_000.0..10_000_000.0),
            })
            .collect();

        Ok(Bars(bars))
    }

    async fn get_snapshots(&self, symbols: &[String]) -> Result<Vec<(String, Snapshot)>, BrokerError> {
        let mut rng = rand::thread_rng();
        Ok(symbols
            .iter()
            .map(|s| {
                let price = self.jiggled_price(s);
                let prev_close = price * (1.0 + rng.gen_range(-0.05..0.05));
                let volume = rng.gen_range(1_000_000.0..10_000_000.0);
                (s.clone(), Snapshot { price, prev_close, volume })
            })
            .collect())
    }

    async fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: OrderQuantity,
        client_order_id: &str,
    ) -> Result<OrderFill, BrokerError> {
        let price = self.jiggled_price(symbol);
        let qty = match quantity {
            OrderQuantity::Qty(q) => q,
            OrderQuantity::Notional(n) => n / price,
        };
        let order_value = qty * price;
        let now = Utc::now();

        let mut state = self.state.write();
        match side {
            OrderSide::Buy => {
                if order_value > state.buying_power {
                    return Ok(OrderFill {
                        order_id: Uuid::new_v4().to_string(),
                        client_order_id: client_order_id.to_string(),
                        symbol: symbol.to_string(),
                        side,
                        qty,
                        filled_avg_price: None,
                        notional: None,
                        status: OrderStatus::Rejected,
                        submitted_at: now,
                        filled_at: None,
                    });
                }
                state.cash -= order_value;
                state.buying_power -= order_value;
                state
                    .positions
                    .entry(symbol.to_string())
                    .and_modify(|pos| {
                        let new_qty = pos.quantity + qty;
                        let new_cost = pos.avg_entry_price * pos.quantity + order_value;
                        pos.avg_entry_price = new_cost / new_qty;
                        pos.quantity = new_qty;
                    })
                    .or_insert(Position {
                        quantity: qty,
                        avg_entry_price: price,
                        current_price: price,
                        market_value: order_value,
                        unrealized_pnl: 0.0,
                        unrealized_pnl_pct: 0.0,
                    });
            }
            OrderSide::Sell => {
                let Some(pos) = state.positions.get(symbol).copied() else {
                    return Err(BrokerError::NoPosition(symbol.to_string()));
                };
                if pos.quantity < qty {
                    return Err(BrokerError::InsufficientShares);
                }
                state.cash += order_value;
                state.buying_power += order_value;
                if (pos.quantity - qty).abs() < 1e-6 {
                    state.positions.remove(symbol);
                } else {
                    state.positions.get_mut(symbol).unwrap().quantity -= qty;
                }
            }
        }

        Ok(OrderFill {
            order_id: Uuid::new_v4().to_string(),
            client_order_id: client_order_id.to_string(),
            symbol: symbol.to_string(),
            side,
            qty,
            filled_avg_price: Some(price),
            notional: Some(order_value),
            status: OrderStatus::Filled,
            submitted_at: now,
            filled_at: Some(now),
        })
    }

    async fn get_asset_name(&self, symbol: &str) -> Option<String> {
        Some(format!("{symbol} Inc."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_simulation_universe() {
        assert!(SimBroker::new(Universe::Live).is_err());
        assert!(SimBroker::new(Universe::Paper).is_err());
        assert!(SimBroker::new(Universe::Simulation).is_ok());
    }

    #[tokio::test]
    async fn buy_then_sell_round_trips_cash() {
        let broker = SimBroker::new(Universe::Simulation).unwrap();
        broker.seed_price("AAA", 100.0);

        let fill = broker
            .submit_order("AAA", OrderSide::Buy, OrderQuantity::Notional(1000.0), "auto-AAA-1")
            .await
            .unwrap();
        assert_eq!(fill.status, OrderStatus::Filled);

        let pos = broker.get_position("AAA").await.unwrap().unwrap();
        assert!(pos.quantity > 0.0);

        let fill = broker
            .submit_order("AAA", OrderSide::Sell, OrderQuantity::Qty(pos.quantity), "auto-AAA-2")
            .await
            .unwrap();
        assert_eq!(fill.status, OrderStatus::Filled);
        assert!(broker.get_position("AAA").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sell_without_position_fails() {
        let broker = SimBroker::new(Universe::Simulation).unwrap();
        let err = broker
            .submit_order("ZZZ", OrderSide::Sell, OrderQuantity::Qty(1.0), "auto-ZZZ-1")
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::NoPosition("ZZZ".to_string()));
    }

    #[tokio::test]
    async fn buy_beyond_buying_power_is_rejected_not_erred() {
        let broker = SimBroker::new(Universe::Simulation).unwrap();
        broker.seed_price("AAA", 100.0);
        let fill = broker
            .submit_order("AAA", OrderSide::Buy, OrderQuantity::Notional(1_000_000.0), "auto-AAA-1")
            .await
            .unwrap();
        assert_eq!(fill.status, OrderStatus::Rejected);
    }
}
