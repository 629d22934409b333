use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::warn;

use common::TelemetrySnapshot;

use crate::AppState;

pub fn ws_router() -> Router<AppState> {
    Router::new().route("/ws/telemetry", get(ws_telemetry_handler))
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// WebSocket endpoint that streams ~1 Hz telemetry snapshots to the
/// dashboard. Auth via query param `?token=<DASHBOARD_TOKEN>` (header auth
/// not supported in the browser WebSocket API).
async fn ws_telemetry_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(q): Query<WsQuery>,
) -> Response {
    let authed = q
        .token
        .as_deref()
        .map(|t| t == state.dashboard_token)
        .unwrap_or(false);

    if !authed {
        return axum::response::IntoResponse::into_response((
            axum::http::StatusCode::UNAUTHORIZED,
            "unauthorized",
        ));
    }

    let telemetry_rx = state.handle.subscribe_telemetry();
    let latest = state.handle.telemetry();
    ws.on_upgrade(move |socket| handle_ws(socket, telemetry_rx, latest))
}

async fn handle_ws(
    mut socket: WebSocket,
    mut telemetry_rx: tokio::sync::broadcast::Receiver<TelemetrySnapshot>,
    latest: TelemetrySnapshot,
) {
    // Send the current state first so the client renders immediately.
    if let Ok(initial) = serde_json::to_string(&latest) {
        if socket.send(Message::Text(initial)).await.is_err() {
            return;
        }
    }

    loop {
        match telemetry_rx.recv().await {
            Ok(snapshot) => {
                let Ok(text) = serde_json::to_string(&snapshot) else {
                    continue;
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!(dropped = n, "WebSocket telemetry client lagged");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                break;
            }
        }
    }
}
