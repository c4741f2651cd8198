// =============================================================================
// WebSocket handler — live AlertAgent log rebroadcast
// =============================================================================
//
// Clients connect to `/api/v1/ws?token=<token>` and receive each AlertAgent
// log entry as it is produced, for as long as the connection stays open.
// Unlike a polled snapshot feed, there is no periodic push and no client-
// visible sequence number: the connection is a thin tap on the same
// broadcast channel every coordinator this AppState ever builds forwards
// onto, so it keeps working uninterrupted across a universe transition.
// =============================================================================

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::api::auth::validate_token;
use crate::app_state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if !validate_token(&token) {
        warn!("WebSocket connection rejected: invalid token");
        return (axum::http::StatusCode::FORBIDDEN, "invalid or missing token").into_response();
    }

    info!("WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state)).into_response()
}

/// Forwards AlertAgent log entries to the client until it disconnects.
/// A single unsplit socket is enough: `tokio::select!` between the
/// client's own frames (Ping/Close, nothing else expected) and the next
/// broadcast entry covers the whole lifecycle without needing a writer
/// task.
async fn handle_ws_connection(mut socket: WebSocket, state: Arc<AppState>) {
    let mut rx = state.subscribe_ws();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {
                        // Clients don't send anything actionable; ignore.
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket read error, closing connection");
                        break;
                    }
                }
            }
            entry = rx.recv() => {
                match entry {
                    Ok(payload) => {
                        let text = payload.to_string();
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "WebSocket connection fell behind the log stream, entries dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    info!("WebSocket connection closed");
}
