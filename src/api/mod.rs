// =============================================================================
// HTTP/WS surface (§6, §10)
// =============================================================================

pub mod auth;
pub mod rest;
pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::app_state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    rest::router().route("/api/v1/ws", get(ws::ws_handler)).with_state(state)
}
