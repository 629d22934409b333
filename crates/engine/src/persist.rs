//! Fire-and-forget persistence.
//!
//! The decision loop only ever enqueues onto a bounded channel; a dedicated
//! worker owns the SQLite pool and applies writes. A full channel drops the
//! event with a warning — persistence failures never delay a tick or roll
//! back a trading decision.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use common::{CandleSnapshot, Result, TradeRecord};

/// Bound on queued writes. Beyond this the loop drops instead of waiting.
pub const PERSIST_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum PersistEvent {
    TradeOpened(TradeRecord),
    TradeClosed {
        trade_id: String,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        pnl: f64,
        exit_reason: String,
    },
    CandleClosed(CandleSnapshot),
}

/// Enqueue without waiting. Drops (and warns) when the queue is full.
pub fn enqueue(tx: &mpsc::Sender<PersistEvent>, event: PersistEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(ev)) => {
            warn!(event = ?discriminant_name(&ev), "persistence queue full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!("persistence worker gone, dropping event");
        }
    }
}

fn discriminant_name(event: &PersistEvent) -> &'static str {
    match event {
        PersistEvent::TradeOpened(_) => "trade_opened",
        PersistEvent::TradeClosed { .. } => "trade_closed",
        PersistEvent::CandleClosed(_) => "candle_closed",
    }
}

/// Owns the database connection; drains the queue until every sender is gone.
pub struct PersistenceWorker {
    rx: mpsc::Receiver<PersistEvent>,
    db: SqlitePool,
}

impl PersistenceWorker {
    pub fn new(rx: mpsc::Receiver<PersistEvent>, db: SqlitePool) -> Self {
        Self { rx, db }
    }

    /// Run the worker loop. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!("PersistenceWorker running");
        while let Some(event) = self.rx.recv().await {
            if let Err(e) = self.apply(&event).await {
                error!(error = %e, "persistence write failed, event discarded");
            }
        }
        warn!("PersistenceWorker: queue closed");
    }

    async fn apply(&self, event: &PersistEvent) -> Result<()> {
        match event {
            PersistEvent::TradeOpened(t) => {
                sqlx::query(
                    r#"
                    INSERT INTO trades
                        (trade_id, strategy_id, index_name, option_type, strike,
                         expiry, qty, mode, entry_time, entry_price, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    ON CONFLICT(trade_id) DO NOTHING
                    "#,
                )
                .bind(&t.trade_id)
                .bind(&t.strategy_id)
                .bind(&t.index_name)
                .bind(t.option_type.to_string())
                .bind(t.strike)
                .bind(&t.expiry)
                .bind(t.qty)
                .bind(t.mode.to_string())
                .bind(t.entry_time.to_rfc3339())
                .bind(t.entry_price)
                .bind(t.created_at.to_rfc3339())
                .execute(&self.db)
                .await?;
            }
            PersistEvent::TradeClosed { trade_id, exit_time, exit_price, pnl, exit_reason } => {
                sqlx::query(
                    r#"
                    UPDATE trades
                    SET exit_time = ?2, exit_price = ?3, pnl = ?4, exit_reason = ?5
                    WHERE trade_id = ?1 AND exit_time IS NULL
                    "#,
                )
                .bind(trade_id)
                .bind(exit_time.to_rfc3339())
                .bind(exit_price)
                .bind(pnl)
                .bind(exit_reason)
                .execute(&self.db)
                .await?;
            }
            PersistEvent::CandleClosed(c) => {
                sqlx::query(
                    r#"
                    INSERT INTO candles
                        (strategy_id, index_name, candle_number, high, low, close,
                         supertrend_value, macd_value, signal_status, closed_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    "#,
                )
                .bind(&c.strategy_id)
                .bind(&c.index_name)
                .bind(c.candle_number as i64)
                .bind(c.high)
                .bind(c.low)
                .bind(c.close)
                .bind(c.supertrend_value)
                .bind(c.macd_value)
                .bind(&c.signal_status)
                .bind(c.closed_at.to_rfc3339())
                .execute(&self.db)
                .await?;
            }
        }
        Ok(())
    }
}
