//! End-to-end flows through the orchestrator against the paper venue:
//! signal-driven entry, reversal exit, exit-order retry and the daily
//! loss breaker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::mpsc;

use common::config::EngineConfig;
use common::indices::{index_spec, round_to_strike};
use common::{
    Candle, Error, ExecutionVenue, ExitReason, OptionType, OrderConfirmation, OrderSide, Position,
    Result, TradingMode,
};
use engine::{ExecutionCoordinator, PersistEvent, PortfolioOrchestrator};
use paper::PaperVenue;

/// 2025-03-14 10:00 IST (a Friday), inside the entry window.
fn session_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 4, 30, 0).unwrap()
}

fn candle_at(start: DateTime<Utc>, i: i64, interval: i64, close: f64) -> Candle {
    let begin = start + Duration::seconds(i * interval);
    Candle {
        start: begin,
        end: begin + Duration::seconds(interval),
        open: close,
        high: close + 5.0,
        low: close - 5.0,
        close,
    }
}

fn flow_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.min_hold_seconds = 0;
    cfg.min_order_cooldown_seconds = 0;
    cfg.htf_filter_enabled = false;
    cfg.macd_confirmation_enabled = false;
    cfg.initial_stoploss = 0.0;
    cfg.trail_start_profit = 0.0;
    cfg.trail_step = 0.0;
    cfg.target_points = 0.0;
    cfg.daily_max_loss = 0.0;
    cfg.max_trades_per_day = 10;
    cfg
}

fn drain(rx: &mut mpsc::Receiver<PersistEvent>) -> Vec<PersistEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

#[tokio::test]
async fn green_entry_then_reversal_exit_records_one_trade() {
    let cfg = flow_config();
    let mut paused = cfg.clone();
    paused.trading_enabled = false;

    let venue = Arc::new(PaperVenue::new(None));
    let mut coordinator = ExecutionCoordinator::new(venue.clone() as Arc<dyn ExecutionVenue>);
    let mut orchestrator = PortfolioOrchestrator::from_config(&cfg);
    let (persist_tx, mut persist_rx) = mpsc::channel(256);

    let start = session_start();
    let mut i = 0i64;
    let mut entry_close: Option<f64> = None;

    // Warm up on a decline with entries paused: the first established
    // SuperTrend direction is RED and must not open a position.
    for k in 0..12 {
        let close = 24_200.0 - 50.0 * k as f64;
        let candle = candle_at(start, i, 5, close);
        venue.update_index_price("NIFTY", close).await;
        orchestrator
            .on_candle_close(&candle, candle.end, &paused, &mut coordinator, &persist_tx)
            .await;
        assert_eq!(orchestrator.open_position_count(), 0);
        i += 1;
    }

    // Rally with trading enabled: the GREEN flip takes a CE entry.
    for k in 0..12 {
        let close = 23_750.0 + 60.0 * (k + 1) as f64;
        let candle = candle_at(start, i, 5, close);
        venue.update_index_price("NIFTY", close).await;
        let had_position = orchestrator.instances[0].position.is_some();
        orchestrator
            .on_candle_close(&candle, candle.end, &cfg, &mut coordinator, &persist_tx)
            .await;
        assert!(orchestrator.open_position_count() <= 1);
        if !had_position && orchestrator.instances[0].position.is_some() {
            entry_close = Some(close);
        }
        i += 1;
    }

    let entry_close = entry_close.expect("rally should have produced a CE entry");
    let position = orchestrator.instances[0]
        .position
        .clone()
        .expect("position open after rally");
    assert_eq!(position.option_type, OptionType::Ce);
    assert_eq!(orchestrator.instances[0].state, strategy::DecisionState::Open);

    // ATM strike: entry close rounded to the instrument's strike interval.
    let spec = index_spec("NIFTY").unwrap();
    assert_eq!(position.strike, round_to_strike(entry_close, spec));

    let ce_trade_id = position.trade_id.clone();

    // Sell-off: the RED flip must close the CE with exactly one exit.
    let mut top = 23_750.0 + 60.0 * 12.0;
    for _ in 0..20 {
        top -= 80.0;
        let candle = candle_at(start, i, 5, top);
        venue.update_index_price("NIFTY", top).await;
        orchestrator
            .on_candle_close(&candle, candle.end, &cfg, &mut coordinator, &persist_tx)
            .await;
        assert!(orchestrator.open_position_count() <= 1);
        i += 1;
    }

    let events = drain(&mut persist_rx);
    let opened: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            PersistEvent::TradeOpened(t) if t.trade_id == ce_trade_id => Some(t),
            _ => None,
        })
        .collect();
    assert_eq!(opened.len(), 1, "one entry record for the CE leg");

    let closed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            PersistEvent::TradeClosed { trade_id, exit_reason, .. }
                if trade_id == &ce_trade_id =>
            {
                Some(exit_reason.clone())
            }
            _ => None,
        })
        .collect();
    assert_eq!(closed.len(), 1, "exactly one exit record for the CE leg");
    assert_eq!(closed[0], "SuperTrend Reversal");
}

#[tokio::test]
async fn repeated_same_direction_signal_does_not_reenter() {
    let cfg = flow_config();
    let venue = Arc::new(PaperVenue::new(None));
    let mut coordinator = ExecutionCoordinator::new(venue.clone() as Arc<dyn ExecutionVenue>);
    let mut orchestrator = PortfolioOrchestrator::from_config(&cfg);
    let (persist_tx, mut persist_rx) = mpsc::channel(256);

    let start = session_start();
    // A steady decline establishes and repeats RED. Only the first
    // established candle may enter; every repeat is not a flip.
    for k in 0..25 {
        let close = 24_200.0 - 40.0 * k as f64;
        let candle = candle_at(start, k, 5, close);
        venue.update_index_price("NIFTY", close).await;
        orchestrator
            .on_candle_close(&candle, candle.end, &cfg, &mut coordinator, &persist_tx)
            .await;
    }

    let events = drain(&mut persist_rx);
    let entries = events
        .iter()
        .filter(|e| matches!(e, PersistEvent::TradeOpened(_)))
        .count();
    assert_eq!(entries, 1, "a repeated RED signal must not re-enter");
}

/// Venue whose sell orders fail a configurable number of times.
struct FlakyExitVenue {
    sell_failures_left: AtomicUsize,
    sells_confirmed: AtomicUsize,
}

impl FlakyExitVenue {
    fn new(failures: usize) -> Self {
        Self {
            sell_failures_left: AtomicUsize::new(failures),
            sells_confirmed: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ExecutionVenue for FlakyExitVenue {
    async fn place_order(
        &self,
        _security_id: &str,
        side: OrderSide,
        _qty: i64,
        _index_name: &str,
    ) -> Result<OrderConfirmation> {
        if side == OrderSide::Sell {
            let left = self.sell_failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.sell_failures_left.store(left - 1, Ordering::SeqCst);
                return Err(Error::Execution("simulated venue outage".into()));
            }
            self.sells_confirmed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(OrderConfirmation { order_id: "OID-1".into(), fill_price: Some(118.0) })
    }

    async fn index_ltp(&self, _index_name: &str) -> Result<f64> {
        Ok(23_500.0)
    }

    async fn option_ltp(&self, _security_id: &str) -> Result<f64> {
        Ok(120.0)
    }

    async fn atm_option_security_id(
        &self,
        _index_name: &str,
        _strike: i64,
        _option_type: OptionType,
        _expiry: &str,
    ) -> Result<String> {
        Ok("SEC-1".into())
    }

    async fn nearest_expiry(&self, _index_name: &str) -> Result<String> {
        Ok("2025-03-20".into())
    }
}

fn open_position(trade_id: &str) -> Position {
    Position {
        trade_id: trade_id.into(),
        index_name: "NIFTY".into(),
        option_type: OptionType::Ce,
        strike: 23_500,
        expiry: "2025-03-20".into(),
        security_id: "SEC-1".into(),
        qty: 75,
        mode: TradingMode::Paper,
        entry_price: 150.0,
        entry_time: session_start(),
        trailing_stop: None,
        highest_profit_points: 0.0,
    }
}

#[tokio::test]
async fn failed_exit_keeps_position_and_retry_records_one_exit() {
    let cfg = flow_config();
    let venue = Arc::new(FlakyExitVenue::new(1));
    let mut coordinator = ExecutionCoordinator::new(venue.clone() as Arc<dyn ExecutionVenue>);
    let mut orchestrator = PortfolioOrchestrator::from_config(&cfg);
    let (persist_tx, mut persist_rx) = mpsc::channel(256);

    orchestrator.instances[0].position = Some(open_position("T-RETRY"));
    orchestrator.instances[0].current_option_ltp = 120.0;
    let now = session_start();

    // First attempt fails at the venue: the position must be unchanged.
    let closed = orchestrator
        .close_position(0, now, &cfg, &mut coordinator, &persist_tx, ExitReason::TargetHit)
        .await
        .unwrap();
    assert!(!closed);
    let pos = orchestrator.instances[0].position.as_ref().expect("still open");
    assert_eq!(pos.trade_id, "T-RETRY");
    assert_eq!(pos.entry_price, 150.0);

    // Retry succeeds and closes exactly once.
    let closed = orchestrator
        .close_position(0, now, &cfg, &mut coordinator, &persist_tx, ExitReason::TargetHit)
        .await
        .unwrap();
    assert!(closed);
    assert!(orchestrator.instances[0].position.is_none());
    assert_eq!(orchestrator.instances[0].state, strategy::DecisionState::Flat);
    assert_eq!(venue.sells_confirmed.load(Ordering::SeqCst), 1);

    let events = drain(&mut persist_rx);
    let exits = events
        .iter()
        .filter(|e| matches!(e, PersistEvent::TradeClosed { trade_id, .. } if trade_id == "T-RETRY"))
        .count();
    assert_eq!(exits, 1, "retry must produce a single exit record");
}

#[tokio::test]
async fn daily_loss_breach_trips_breaker_and_blocks_entries_until_reset() {
    let mut cfg = flow_config();
    cfg.daily_max_loss = 2000.0;

    let venue = Arc::new(PaperVenue::new(None));
    let mut coordinator = ExecutionCoordinator::new(venue.clone() as Arc<dyn ExecutionVenue>);
    let mut orchestrator = PortfolioOrchestrator::from_config(&cfg);
    let (persist_tx, mut persist_rx) = mpsc::channel(256);

    // Deep-loss CE: index at 23300 prices the option at 90 against a 300
    // entry, well past the daily cap at 75 qty.
    venue.update_index_price("NIFTY", 23_300.0).await;
    let mut pos = open_position("T-BREAKER");
    pos.security_id = "SIM_NIFTY_23500_CE".into();
    pos.entry_price = 300.0;
    orchestrator.instances[0].position = Some(pos);

    let now = session_start();
    let closed = orchestrator
        .on_tick(now, &cfg, &mut coordinator, &persist_tx)
        .await;
    assert!(closed);
    assert!(orchestrator.instances[0].position.is_none());
    assert!(orchestrator.daily.breaker_tripped);

    let events = drain(&mut persist_rx);
    assert!(events.iter().any(|e| matches!(
        e,
        PersistEvent::TradeClosed { exit_reason, .. } if exit_reason == "Daily Max Loss"
    )));

    // Any further close evaluation refuses entries while the breaker holds.
    let candle = candle_at(now, 1, 5, 23_300.0);
    venue.update_index_price("NIFTY", 23_300.0).await;
    orchestrator
        .on_candle_close(&candle, candle.end, &cfg, &mut coordinator, &persist_tx)
        .await;
    assert_eq!(
        orchestrator.instances[0].last_decision.as_deref(),
        Some("daily breaker tripped")
    );

    // The next trading day's reset re-arms entries.
    let next_day = now + Duration::days(1);
    assert!(orchestrator.daily_reset(next_day));
    assert!(!orchestrator.daily.breaker_tripped);
}
