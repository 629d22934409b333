use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::Row;

use common::config::ConfigPatch;
use common::indices::index_spec;
use common::{session, CommandOutcome};

use crate::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/api/bot/start", post(start_bot))
        .route("/api/bot/stop", post(stop_bot))
        .route("/api/bot/squareoff", post(squareoff))
        .route("/api/bot/squareoff/:strategy_id", post(squareoff_strategy))
        .route("/api/config", get(get_config).post(post_config))
        .route("/api/status", get(get_status))
        .route("/api/position", get(get_position))
        .route("/api/daily-summary", get(get_daily_summary))
        .route("/api/trades", get(get_trades))
}

fn outcome_json(outcome: CommandOutcome) -> Json<Value> {
    Json(json!({
        "status": if outcome.ok { "success" } else { "error" },
        "message": outcome.message,
    }))
}

// ─── Bot control ──────────────────────────────────────────────────────────────

async fn start_bot(State(state): State<AppState>) -> Json<Value> {
    outcome_json(state.handle.start().await)
}

async fn stop_bot(State(state): State<AppState>) -> Json<Value> {
    outcome_json(state.handle.stop().await)
}

async fn squareoff(State(state): State<AppState>) -> Json<Value> {
    outcome_json(state.handle.square_off().await)
}

async fn squareoff_strategy(
    State(state): State<AppState>,
    Path(strategy_id): Path<String>,
) -> Json<Value> {
    outcome_json(state.handle.square_off_strategy(strategy_id).await)
}

// ─── Config ───────────────────────────────────────────────────────────────────

async fn get_config(State(state): State<AppState>) -> Json<Value> {
    let config = state.handle.config().await;
    let spec = index_spec(&config.selected_index);

    Json(json!({
        "mode": state.trading_mode.to_string(),
        "lot_size": spec.map(|s| s.lot_size),
        "strike_interval": spec.map(|s| s.strike_interval),
        "config": config,
    }))
}

async fn post_config(
    State(state): State<AppState>,
    Json(patch): Json<ConfigPatch>,
) -> Json<Value> {
    let updated = state.handle.update_config(&patch).await;
    Json(json!({
        "status": "success",
        "message": "Configuration updated",
        "updated": updated,
    }))
}

// ─── Status / position / summary ──────────────────────────────────────────────

async fn get_status(State(state): State<AppState>) -> Json<Value> {
    let telemetry = state.handle.telemetry();
    let config = state.handle.config().await;
    let now = chrono::Utc::now();

    Json(json!({
        "is_running": telemetry.is_running,
        "mode": state.trading_mode.to_string(),
        "market_status": if session::is_market_open(now) { "open" } else { "closed" },
        "daily_max_loss_triggered": telemetry.breaker_tripped,
        "trading_enabled": config.trading_enabled,
        "selected_index": config.selected_index,
        "candle_interval": config.candle_interval,
        "portfolio_enabled": config.portfolio_enabled,
        "instances": telemetry.instances,
    }))
}

async fn get_position(State(state): State<AppState>) -> Json<Value> {
    let telemetry = state.handle.telemetry();
    match telemetry.position {
        None => Json(json!({ "has_position": false })),
        Some(pos) => {
            let unrealized =
                (telemetry.current_option_ltp - pos.entry_price) * pos.qty as f64;
            Json(json!({
                "has_position": true,
                "trade_id": pos.trade_id,
                "option_type": pos.option_type,
                "strike": pos.strike,
                "expiry": pos.expiry,
                "index_name": pos.index_name,
                "entry_price": pos.entry_price,
                "current_ltp": telemetry.current_option_ltp,
                "unrealized_pnl": unrealized,
                "trailing_sl": pos.trailing_stop,
                "qty": pos.qty,
            }))
        }
    }
}

async fn get_daily_summary(State(state): State<AppState>) -> Json<Value> {
    let telemetry = state.handle.telemetry();
    Json(json!({
        "total_trades": telemetry.daily_trades,
        "total_pnl": telemetry.daily_pnl,
        "max_drawdown": telemetry.daily_max_drawdown,
        "daily_stop_triggered": telemetry.breaker_tripped,
    }))
}

// ─── Trades ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TradesQuery {
    page: Option<i64>,
    limit: Option<i64>,
    index: Option<String>,
}

async fn get_trades(State(state): State<AppState>, Query(q): Query<TradesQuery>) -> Json<Value> {
    let page = q.page.unwrap_or(1).max(1);
    let limit = q.limit.unwrap_or(50).min(200);
    let offset = (page - 1) * limit;

    let (rows, total) = if let Some(index) = &q.index {
        let rows = sqlx::query(
            r#"SELECT trade_id, strategy_id, index_name, option_type, strike, expiry,
                      qty, mode, entry_time, entry_price, exit_time, exit_price,
                      pnl, exit_reason
               FROM trades WHERE index_name = ?1
               ORDER BY entry_time DESC LIMIT ?2 OFFSET ?3"#,
        )
        .bind(index)
        .bind(limit)
        .bind(offset)
        .fetch_all(&state.db)
        .await
        .unwrap_or_default();

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM trades WHERE index_name = ?1")
                .bind(index)
                .fetch_one(&state.db)
                .await
                .unwrap_or(0);
        (rows, total)
    } else {
        let rows = sqlx::query(
            r#"SELECT trade_id, strategy_id, index_name, option_type, strike, expiry,
                      qty, mode, entry_time, entry_price, exit_time, exit_price,
                      pnl, exit_reason
               FROM trades ORDER BY entry_time DESC LIMIT ?1 OFFSET ?2"#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&state.db)
        .await
        .unwrap_or_default();

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trades")
            .fetch_one(&state.db)
            .await
            .unwrap_or(0);
        (rows, total)
    };

    let trades: Vec<Value> = rows
        .iter()
        .map(|r| {
            json!({
                "trade_id": r.get::<String, _>("trade_id"),
                "strategy_id": r.get::<String, _>("strategy_id"),
                "index_name": r.get::<String, _>("index_name"),
                "option_type": r.get::<String, _>("option_type"),
                "strike": r.get::<i64, _>("strike"),
                "expiry": r.get::<String, _>("expiry"),
                "qty": r.get::<i64, _>("qty"),
                "mode": r.get::<String, _>("mode"),
                "entry_time": r.get::<String, _>("entry_time"),
                "entry_price": r.get::<f64, _>("entry_price"),
                "exit_time": r.get::<Option<String>, _>("exit_time"),
                "exit_price": r.get::<Option<f64>, _>("exit_price"),
                "pnl": r.get::<Option<f64>, _>("pnl"),
                "exit_reason": r.get::<Option<String>, _>("exit_reason"),
            })
        })
        .collect();

    Json(json!({ "trades": trades, "total": total, "page": page, "limit": limit }))
}
