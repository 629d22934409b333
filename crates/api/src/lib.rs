mod auth;
pub mod routes;

use std::net::SocketAddr;

use axum::{middleware, Router};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use common::TradingMode;
use engine::EngineHandle;

/// Shared application state injected into every route handler.
#[derive(Clone)]
pub struct AppState {
    pub handle: EngineHandle,
    pub db: SqlitePool,
    pub trading_mode: TradingMode,
    pub dashboard_token: String,
}

/// Build and run the Axum API server.
pub async fn serve(state: AppState, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    let protected = routes::api_router().route_layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_auth,
    ));

    let app = Router::new()
        .merge(protected)
        .merge(routes::ws_router())
        .merge(routes::health_router())
        .with_state(state)
        .layer(cors);

    info!(%addr, "Dashboard API listening");
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
