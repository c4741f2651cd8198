// =============================================================================
// LiveBroker — thin REST client shape for a live/paper equities broker
// =============================================================================
//
// Matching any specific broker's wire format bit-for-bit is a non-goal
// (spec §1): this is the minimal reqwest-backed client that shapes requests
// the way an Alpaca-style broker expects (API-key-id/secret headers, a
// trading-API base URL, a separate data-feed parameter) so the rest of the
// system has something concrete to depend on through the `Broker` trait.
// =============================================================================

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;

use crate::strategy::{Bar, Bars};
use crate::universe::Universe;

use super::{Account, Broker, BrokerError, OrderFill, OrderQuantity, OrderSide, OrderStatus, Position, Snapshot};

pub struct LiveBroker {
    universe: Universe,
    base_url: String,
    api_key_id: String,
    api_secret_key: String,
    data_feed: String,
    http: Client,
}

impl LiveBroker {
    /// `base_url` must match the requested universe (a LIVE universe pointed
    /// at a paper-trading endpoint, or vice versa, fails construction).
    pub fn new(
        universe: Universe,
        base_url: String,
        api_key_id: String,
        api_secret_key: String,
        data_feed: String,
    ) -> Result<Self, BrokerError> {
        if universe == Universe::Simulation {
            return Err(BrokerError::UniverseNotSupported { broker: "LiveBroker", got: universe });
        }

        let looks_like_paper = base_url.contains("paper");
        let endpoint_universe = if looks_like_paper { Universe::Paper } else { Universe::Live };
        if endpoint_universe != universe {
            return Err(BrokerError::EndpointMismatch { universe, endpoint: base_url });
        }

        Ok(Self {
            universe,
            base_url,
            api_key_id,
            api_secret_key,
            data_feed,
            http: Client::new(),
        })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("APCA-API-KEY-ID", &self.api_key_id)
            .header("APCA-API-SECRET-KEY", &self.api_secret_key)
    }
}

#[async_trait]
impl Broker for LiveBroker {
    fn universe(&self) -> Universe {
        self.universe
    }

    fn is_market_open(&self) -> bool {
        // Advisory only; DataAgent treats this as a hint, not a hard gate.
        let now = Utc::now();
        let weekday = now.format("%u").to_string().parse::<u8>().unwrap_or(1);
        weekday <= 5
    }

    async fn get_account(&self) -> Result<Account, BrokerError> {
        let url = format!("{}/v2/account", self.base_url);
        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?
            .json::<Value>()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(Account {
            portfolio_value: resp["portfolio_value"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
            cash: resp["cash"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
            buying_power: resp["buying_power"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
            equity: resp["equity"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
        })
    }

    async fn get_positions(&self) -> Result<Vec<(String, Position)>, BrokerError> {
        let url = format!("{}/v2/positions", self.base_url);
        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?
            .json::<Vec<Value>>()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(resp
            .into_iter()
            .filter_map(|p| {
                let symbol = p["symbol"].as_str()?.to_string();
                Some((symbol, position_from_json(&p)))
            })
            .collect())
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, BrokerError> {
        let url = format!("{}/v2/positions/{symbol}", self.base_url);
        let resp = self.authed(self.http.get(&url)).send().await.map_err(|e| BrokerError::Connection(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let value = resp.json::<Value>().await.map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(Some(position_from_json(&value)))
    }

    async fn get_current_price(&self, symbol: &str) -> Result<f64, BrokerError> {
        let url = format!("{}/v2/stocks/{symbol}/trades/latest?feed={}", self.base_url, self.data_feed);
        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?
            .json::<Value>()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        resp["trade"]["p"].as_f64().ok_or_else(|| BrokerError::Connection("missing trade price".to_string()))
    }

    async fn get_bars(&self, symbol: &str, days: usize) -> Result<Bars, BrokerError> {
        let url = format!(
            "{}/v2/stocks/{symbol}/bars?timeframe=1Day&limit={days}&feed={}",
            self.base_url, self.data_feed
        );
        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?
            .json::<Value>()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let bars = resp["bars"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .map(|r| Bar {
                        open: r["o"].as_f64().unwrap_or(0.0),
                        high: r["h"].as_f64().unwrap_or(0.0),
                        low: r["l"].as_f64().unwrap_or(0.0),
                        close: r["c"].as_f64().unwrap_or(0.0),
                        volume: r["v"].as_f64().unwrap_or(0.0),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Bars(bars))
    }

    async fn get_snapshots(&self, symbols: &[String]) -> Result<Vec<(String, Snapshot)>, BrokerError> {
        let url = format!(
            "{}/v2/stocks/snapshots?symbols={}&feed={}",
            self.base_url,
            symbols.join(","),
            self.data_feed
        );
        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?
            .json::<Value>()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(symbols
            .iter()
            .filter_map(|symbol| {
                let entry = resp.get(symbol)?;
                let price = entry["latestTrade"]["p"].as_f64().or_else(|| entry["dailyBar"]["c"].as_f64())?;
                let prev_close = entry["prevDailyBar"]["c"].as_f64().unwrap_or(price);
                let volume = entry["dailyBar"]["v"].as_f64().unwrap_or(0.0);
                Some((symbol.clone(), Snapshot { price, prev_close, volume }))
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
        let url = format!("{}/v2/orders", self.base_url);
        let mut body = serde_json::json!({
            "symbol": symbol,
            "side": if matches!(side, OrderSide::Buy) { "buy" } else { "sell" },
            "type": "market",
            "time_in_force": "day",
            "client_order_id": client_order_id,
        });
        match quantity {
            OrderQuantity::Qty(q) => body["qty"] = serde_json::json!(q),
            OrderQuantity::Notional(n) => body["notional"] = serde_json::json!(n),
        }

        let resp = self
            .authed(self.http.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?
            .json::<Value>()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let status = match resp["status"].as_str() {
            Some("filled") => OrderStatus::Filled,
            Some("partially_filled") => OrderStatus::PartiallyFilled,
            Some("rejected") | Some("canceled") => OrderStatus::Rejected,
            _ => OrderStatus::Pending,
        };

        Ok(OrderFill {
            order_id: resp["id"].as_str().unwrap_or_default().to_string(),
            client_order_id: client_order_id.to_string(),
            symbol: symbol.to_string(),
            side,
            qty: resp["qty"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
            filled_avg_price: resp["filled_avg_price"].as_str().and_then(|s| s.parse().ok()),
            notional: resp["notional"].as_str().and_then(|s| s.parse().ok()),
            status,
            submitted_at: Utc::now(),
            filled_at: None,
        })
    }

    async fn get_asset_name(&self, symbol: &str) -> Option<String> {
        let url = format!("{}/v2/assets/{symbol}", self.base_url);
        let resp = self.authed(self.http.get(&url)).send().await.ok()?.json::<Value>().await.ok()?;
        resp["name"].as_str().map(|s| s.to_string())
    }
}

fn position_from_json(p: &Value) -> Position {
    let get = |k: &str| p[k].as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
    Position {
        quantity: get("qty"),
        avg_entry_price: get("avg_entry_price"),
        current_price: get("current_price"),
        market_value: get("market_value"),
        unrealized_pnl: get("unrealized_pl"),
        unrealized_pnl_pct: get("unrealized_plpc"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_simulation_universe() {
        let err = LiveBroker::new(
            Universe::Simulation,
            "https://paper-api.example.com".to_string(),
            "k".to_string(),
            "s".to_string(),
            "iex".to_string(),
        )
        .unwrap_err();
        assert!(matches!(err, BrokerError::UniverseNotSupported { .. }));
    }

    #[test]
    fn rejects_endpoint_universe_mismatch() {
        let err = LiveBroker::new(
            Universe::Live,
            "https://paper-api.example.com".to_string(),
            "k".to_string(),
            "s".to_string(),
            "iex".to_string(),
        )
        .unwrap_err();
        assert!(matches!(err, BrokerError::EndpointMismatch { .. }));
    }

    #[test]
    fn accepts_matching_endpoint() {
        assert!(LiveBroker::new(
            Universe::Paper,
            "https://paper-api.example.com".to_string(),
            "k".to_string(),
            "s".to_string(),
            "iex".to_string(),
        )
        .is_ok());
    }
}
