use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::config::EngineConfig;
use common::{Config, ExecutionVenue, TradingMode};
use engine::persist::PERSIST_QUEUE_CAPACITY;
use engine::{BrokerClient, Engine, PersistenceWorker};
use paper::PaperVenue;

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(mode = %cfg.trading_mode, "OptiBot starting");

    // ── Database ──────────────────────────────────────────────────────────────
    let db = SqlitePool::connect(&cfg.database_url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to database: {e}"));
    sqlx::migrate!("../../migrations")
        .run(&db)
        .await
        .unwrap_or_else(|e| panic!("Database migration failed: {e}"));
    info!("Database ready");

    // ── Execution venue (injected based on TRADING_MODE) ──────────────────────
    let venue: Arc<dyn ExecutionVenue> = match cfg.trading_mode {
        TradingMode::Live => {
            info!("Live trading mode — using BrokerClient");
            Arc::new(BrokerClient::new(
                &cfg.broker_base_url,
                &cfg.broker_access_token,
                &cfg.broker_client_id,
            ))
        }
        TradingMode::Paper => {
            // With broker credentials present, paper mode still reads real
            // quotes; fills stay simulated.
            let quotes: Option<Arc<dyn ExecutionVenue>> =
                if cfg.broker_access_token.is_empty() {
                    None
                } else {
                    Some(Arc::new(BrokerClient::new(
                        &cfg.broker_base_url,
                        &cfg.broker_access_token,
                        &cfg.broker_client_id,
                    )))
                };
            info!(real_quotes = quotes.is_some(), "Paper trading mode — using PaperVenue");
            Arc::new(PaperVenue::new(quotes))
        }
    };

    // ── Persistence worker ────────────────────────────────────────────────────
    let (persist_tx, persist_rx) = mpsc::channel(PERSIST_QUEUE_CAPACITY);
    let persistence = PersistenceWorker::new(persist_rx, db.clone());

    // ── Engine ────────────────────────────────────────────────────────────────
    let (engine, handle) = Engine::new(
        EngineConfig::default(),
        cfg.trading_mode,
        venue,
        persist_tx,
    );

    // ── Dashboard API ─────────────────────────────────────────────────────────
    let api_state = api::AppState {
        handle: handle.clone(),
        db: db.clone(),
        trading_mode: cfg.trading_mode,
        dashboard_token: cfg.dashboard_token.clone(),
    };

    // ── Spawn all tasks ───────────────────────────────────────────────────────
    let port = cfg.dashboard_port;
    tokio::spawn(persistence.run());
    tokio::spawn(engine.run());
    tokio::spawn(api::serve(api_state, port));

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await.unwrap();
    info!("Shutdown signal received. Exiting.");
}
