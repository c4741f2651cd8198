// =============================================================================
// REST surface — health, status snapshot, manual trade, config, universe (§6)
// =============================================================================
//
// Built the way the teacher's api::rest module is built (CORS via
// tower_http, JSON via axum::Json, bearer-gate via AuthBearer) but scoped
// down to exactly the five routes SPEC_FULL.md §6 names — none of the
// crypto-dashboard-specific surface (positions/regime/decisions/feature
// flags/control/heartbeat/trade-journal) has a counterpart here.
// =============================================================================

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::agents::execution_agent::ManualAmount;
use crate::app_state::AppState;
use crate::events::Side;
use crate::universe::Universe;

use super::auth::AuthBearer;

/// Builds the REST routes, state-generic so the caller can merge further
/// routes (the WS upgrade) before applying `with_state` once.
pub fn router() -> Router<Arc<AppState>> {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(get_state))
        .route("/api/v1/trade", post(post_trade))
        .route("/api/v1/config", get(get_config).patch(patch_config))
        .route("/api/v1/universe/:to", post(post_universe_transition))
        .layer(cors)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn get_state(State(state): State<Arc<AppState>>, _auth: AuthBearer) -> impl IntoResponse {
    Json(state.status().await)
}

#[derive(Debug, Deserialize)]
struct TradeRequest {
    symbol: String,
    side: Side,
    qty: Option<f64>,
    notional: Option<f64>,
}

async fn post_trade(State(state): State<Arc<AppState>>, _auth: AuthBearer, Json(req): Json<TradeRequest>) -> impl IntoResponse {
    let amount = match (req.qty, req.notional) {
        (Some(qty), _) => ManualAmount::Qty(qty),
        (None, Some(notional)) => ManualAmount::Notional(notional),
        (None, None) => return (axum::http::StatusCode::BAD_REQUEST, Json(json!({"error": "qty or notional required"}))),
    };

    match state.manual_trade(&req.symbol, req.side, amount).await {
        Ok(()) => (axum::http::StatusCode::OK, Json(json!({"ok": true}))),
        Err(reason) => (axum::http::StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"error": reason}))),
    }
}

async fn get_config(State(state): State<Arc<AppState>>, _auth: AuthBearer) -> impl IntoResponse {
    let config = state.config().read().clone();
    Json(serde_json::to_value(config).unwrap_or(json!({})))
}

/// Merges the request body onto the current config's JSON representation
/// and re-validates by round-tripping through `RuntimeConfig`'s Deserialize
/// impl, so a PATCH can never leave the config in a partially-typed state.
async fn patch_config(State(state): State<Arc<AppState>>, _auth: AuthBearer, Json(patch): Json<Value>) -> impl IntoResponse {
    let config_lock = state.config();
    let current = serde_json::to_value(config_lock.read().clone()).unwrap_or(json!({}));

    let mut merged = current;
    if let (Some(merged_obj), Some(patch_obj)) = (merged.as_object_mut(), patch.as_object()) {
        for (k, v) in patch_obj {
            merged_obj.insert(k.clone(), v.clone());
        }
    }

    match serde_json::from_value::<crate::runtime_config::RuntimeConfig>(merged) {
        Ok(updated) => {
            *config_lock.write() = updated.clone();
            (axum::http::StatusCode::OK, Json(serde_json::to_value(updated).unwrap_or(json!({}))))
        }
        Err(e) => (axum::http::StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))),
    }
}

#[derive(Debug, Deserialize)]
struct TransitionRequest {
    #[serde(default)]
    reason: String,
}

async fn post_universe_transition(
    State(state): State<Arc<AppState>>,
    _auth: AuthBearer,
    Path(to): Path<String>,
    body: Option<Json<TransitionRequest>>,
) -> impl IntoResponse {
    let to: Universe = match to.parse() {
        Ok(u) => u,
        Err(e) => return (axum::http::StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))),
    };
    let reason = body.map(|Json(b)| b.reason).unwrap_or_default();
    let reason = if reason.is_empty() { "operator requested transition".to_string() } else { reason };

    match state.transition_to(to, &reason).await {
        Ok(()) => (axum::http::StatusCode::OK, Json(json!({"ok": true, "universe": to.to_string()}))),
        Err(e) => (axum::http::StatusCode::CONFLICT, Json(json!({"error": e.to_string()}))),
    }
}
