//! Drives N independent strategy instances off one shared candle feed.
//!
//! Instances are evaluated synchronously in stable order so each observes a
//! consistent view of the shared guards (daily stats, global order cooldown)
//! before acting. A failure inside one instance's evaluation is isolated and
//! never prevents the remaining instances from being evaluated.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use common::config::EngineConfig;
use common::indices::{index_spec, round_to_strike};
use common::{
    session, Candle, CandleSnapshot, DailyStats, Error, ExitReason, OptionType, Position, Result,
    SignalDirection, TelemetrySnapshot, TradeRecord, TradingMode,
};
use strategy::rules::{decide_entry, decide_exit, EntryDecision, EntryInputs, ExitDecision};
use strategy::{DecisionState, IndicatorEval, StrategyInstance};

use crate::coordinator::ExecutionCoordinator;
use crate::persist::{enqueue, PersistEvent};

pub struct PortfolioOrchestrator {
    pub instances: Vec<StrategyInstance>,
    pub daily: DailyStats,
}

impl PortfolioOrchestrator {
    /// Build the instance list from config. Portfolio mode instantiates one
    /// state machine per configured strategy id; otherwise a single instance
    /// runs on the global parameters alone.
    pub fn from_config(global: &EngineConfig) -> Self {
        let mut instances = Vec::new();

        if global.portfolio_enabled && !global.portfolio_strategy_ids.is_empty() {
            for id in &global.portfolio_strategy_ids {
                let key = id.to_string();
                let (name, strategy_layer) = match global.portfolio_strategies.get(&key) {
                    Some(profile) => {
                        let name = if profile.name.is_empty() {
                            format!("Strategy {key}")
                        } else {
                            profile.name.clone()
                        };
                        (name, profile.params.clone())
                    }
                    None => (format!("Strategy {key}"), Default::default()),
                };
                let instance_layer = global
                    .portfolio_instances
                    .get(&key)
                    .cloned()
                    .unwrap_or_default();
                info!(id = %key, name = %name, "registered strategy instance");
                instances.push(StrategyInstance::new(
                    key,
                    name,
                    global,
                    strategy_layer,
                    instance_layer,
                ));
            }
        } else {
            let name = format!("{} {}", global.selected_index, global.strategy_kind);
            info!(name = %name, "registered single strategy instance");
            instances.push(StrategyInstance::new(
                "1",
                name,
                global,
                Default::default(),
                Default::default(),
            ));
        }

        Self { instances, daily: DailyStats::default() }
    }

    pub fn open_position_count(&self) -> usize {
        self.instances.iter().filter(|i| i.position.is_some()).count()
    }

    /// Tick-cadence protective sweep over every open position. Returns true
    /// when at least one position was closed (the caller resets its candle
    /// bucket so the next entry starts from a fresh candle).
    pub async fn on_tick(
        &mut self,
        now: DateTime<Utc>,
        global: &EngineConfig,
        coordinator: &mut ExecutionCoordinator,
        persist_tx: &mpsc::Sender<PersistEvent>,
    ) -> bool {
        let mut any_closed = false;
        for i in 0..self.instances.len() {
            match self.tick_instance(i, now, global, coordinator, persist_tx).await {
                Ok(closed) => any_closed |= closed,
                Err(e) => {
                    error!(
                        strategy = %self.instances[i].id,
                        error = %e,
                        "tick evaluation failed, instance isolated"
                    );
                }
            }
        }
        any_closed
    }

    async fn tick_instance(
        &mut self,
        i: usize,
        now: DateTime<Utc>,
        global: &EngineConfig,
        coordinator: &mut ExecutionCoordinator,
        persist_tx: &mpsc::Sender<PersistEvent>,
    ) -> Result<bool> {
        let Some(security_id) =
            self.instances[i].position.as_ref().map(|p| p.security_id.clone())
        else {
            return Ok(false);
        };
        let params = self.instances[i].params(global);

        // Refresh the option quote; no data means no mutation this tick.
        match coordinator.venue().option_ltp(&security_id).await {
            Ok(ltp) if ltp > 0.0 => self.instances[i].current_option_ltp = ltp,
            Ok(_) | Err(Error::MarketData(_)) => return Ok(false),
            Err(e) => return Err(e),
        }

        let ltp = self.instances[i].current_option_ltp;
        let daily_pnl = self.daily.realized_pnl;
        let reason = match self.instances[i].position.as_mut() {
            Some(pos) => {
                risk::check_tick_exit(pos, ltp, daily_pnl, global.daily_max_loss, &params)
            }
            None => return Ok(false),
        };

        let Some(reason) = reason else {
            return Ok(false);
        };
        let closed = self
            .close_position(i, now, global, coordinator, persist_tx, reason)
            .await?;
        if closed && reason == ExitReason::DailyMaxLoss {
            self.daily.breaker_tripped = true;
        }
        Ok(closed)
    }

    /// Candle-close sweep: identical OHLC to every instance, in order.
    pub async fn on_candle_close(
        &mut self,
        candle: &Candle,
        now: DateTime<Utc>,
        global: &EngineConfig,
        coordinator: &mut ExecutionCoordinator,
        persist_tx: &mpsc::Sender<PersistEvent>,
    ) {
        for i in 0..self.instances.len() {
            if let Err(e) = self
                .evaluate_instance(i, candle, now, global, coordinator, persist_tx)
                .await
            {
                error!(
                    strategy = %self.instances[i].id,
                    error = %e,
                    "candle evaluation failed, instance isolated"
                );
            }
        }
    }

    /// Feed one closed HTF candle to every instance's HTF SuperTrend.
    pub fn on_htf_candle_close(&mut self, candle: &Candle) {
        for inst in &mut self.instances {
            inst.update_htf_on_close(candle);
        }
    }

    async fn evaluate_instance(
        &mut self,
        i: usize,
        candle: &Candle,
        now: DateTime<Utc>,
        global: &EngineConfig,
        coordinator: &mut ExecutionCoordinator,
        persist_tx: &mpsc::Sender<PersistEvent>,
    ) -> Result<()> {
        let params = self.instances[i].params(global);
        let eval = self.instances[i].update_on_close(candle);

        self.persist_candle(i, candle, &eval, &params.selected_index, persist_tx);

        // Refresh the held option's quote at close cadence too.
        if let Some(security_id) =
            self.instances[i].position.as_ref().map(|p| p.security_id.clone())
        {
            if let Ok(ltp) = coordinator.venue().option_ltp(&security_id).await {
                if ltp > 0.0 {
                    self.instances[i].current_option_ltp = ltp;
                }
            }
        }

        let mut exited_this_close = false;

        // ── Exit phase ───────────────────────────────────────────────────
        if self.instances[i].position.is_some() {
            let ltp = self.instances[i].current_option_ltp;
            let close_reason = match self.instances[i].position.as_mut() {
                Some(pos) if ltp > 0.0 => risk::check_close_exit(pos, ltp, &params),
                _ => None,
            };
            if let Some(reason) = close_reason {
                exited_this_close = self
                    .close_position(i, now, global, coordinator, persist_tx, reason)
                    .await?;
            }
        }

        if !exited_this_close && self.instances[i].position.is_some() {
            let inst = &self.instances[i];
            let position_type = inst.position.as_ref().map(|p| p.option_type);
            let min_hold = inst.min_hold_active(now, &params);
            let direction = inst.supertrend.direction();

            if let Some(position_type) = position_type {
                match decide_exit(position_type, direction, min_hold) {
                    ExitDecision::Exit { reason } => {
                        exited_this_close = self
                            .close_position(i, now, global, coordinator, persist_tx, reason)
                            .await?;
                    }
                    ExitDecision::Suppressed => {
                        self.instances[i].note_decision(now, "reversal blocked by min-hold");
                    }
                    ExitDecision::Hold => {}
                }
            }
        }

        // ── Entry phase ──────────────────────────────────────────────────
        // A reversal exit falls through here so the opposite side can be
        // taken on the same close, subject to the global cooldown.
        let entry_result = self
            .try_entry(i, candle, &eval, now, global, coordinator, persist_tx)
            .await;

        if exited_this_close {
            self.instances[i].last_exit_candle_time = Some(candle.end);
        }

        entry_result
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_entry(
        &mut self,
        i: usize,
        candle: &Candle,
        eval: &IndicatorEval,
        now: DateTime<Utc>,
        global: &EngineConfig,
        coordinator: &mut ExecutionCoordinator,
        persist_tx: &mpsc::Sender<PersistEvent>,
    ) -> Result<()> {
        let params = self.instances[i].params(global);

        {
            let inst = &mut self.instances[i];
            inst.last_decision = None;

            if inst.position.is_some() {
                inst.note_decision(now, "holding");
                return Ok(());
            }
            if !params.active {
                inst.note_decision(now, "inactive");
                return Ok(());
            }
            if self.daily.breaker_tripped {
                inst.note_decision(now, "daily breaker tripped");
                return Ok(());
            }
            if !global.trading_enabled {
                inst.note_decision(now, "entries paused");
                return Ok(());
            }
            if let Some(exit_close) = inst.last_exit_candle_time {
                if (candle.end - exit_close).num_seconds() < params.candle_interval as i64 {
                    inst.note_decision(now, "cooling off after exit");
                    return Ok(());
                }
            }
            if !coordinator.cooldown_clear(now, global.min_order_cooldown_seconds) {
                let remaining =
                    coordinator.cooldown_remaining(now, global.min_order_cooldown_seconds);
                inst.note_decision(now, format!("order cooldown ({remaining}s remaining)"));
                return Ok(());
            }
            if !session::is_market_open(now) {
                inst.note_decision(now, "market closed");
                return Ok(());
            }
            if !session::within_entry_window(now) {
                inst.note_decision(now, "outside entry hours");
                return Ok(());
            }
            if global.max_trades_per_day > 0
                && self.daily.trade_count >= global.max_trades_per_day
            {
                inst.note_decision(now, "max daily trades reached");
                return Ok(());
            }
        }

        let htf = self.instances[i].htf_filter(global);
        let inputs = EntryInputs {
            kind: params.strategy_kind,
            signal: eval.signal,
            flipped: eval.flipped,
            trade_only_on_flip: params.trade_only_on_flip,
            last_executed: self.instances[i].last_executed_direction,
            htf,
            macd_confirmation_enabled: params.macd_confirmation_enabled,
            macd_last: eval.macd_last,
            macd_signal_line: eval.macd_signal_line,
            adx_value: eval.adx_value,
            adx_threshold: params.adx_threshold,
        };

        match decide_entry(&inputs) {
            EntryDecision::Skip(reason) => {
                self.instances[i].note_decision(now, format!("skipped: {reason}"));
                Ok(())
            }
            EntryDecision::Enter { direction, option_type } => {
                self.enter_position(
                    i, direction, option_type, candle.close, now, global, coordinator, persist_tx,
                )
                .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn enter_position(
        &mut self,
        i: usize,
        direction: SignalDirection,
        option_type: OptionType,
        index_ltp: f64,
        now: DateTime<Utc>,
        global: &EngineConfig,
        coordinator: &mut ExecutionCoordinator,
        persist_tx: &mpsc::Sender<PersistEvent>,
    ) -> Result<()> {
        let params = self.instances[i].params(global);
        let spec = index_spec(&params.selected_index)
            .ok_or_else(|| Error::Config(format!("unknown index: {}", params.selected_index)))?;
        let strike = round_to_strike(index_ltp, spec);
        let qty = risk::size_position(&params, spec.lot_size);

        let expiry = match coordinator.venue().nearest_expiry(&params.selected_index).await {
            Ok(expiry) => expiry,
            Err(e) => {
                warn!(error = %e, "no expiry data, entry skipped");
                self.instances[i].note_decision(now, "skipped: no expiry data");
                return Ok(());
            }
        };
        let security_id = match coordinator
            .venue()
            .atm_option_security_id(&params.selected_index, strike, option_type, &expiry)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "no security id for ATM option, entry skipped");
                self.instances[i].note_decision(now, "skipped: no security id");
                return Ok(());
            }
        };

        info!(
            strategy = %self.instances[i].id,
            signal = %direction,
            option = %option_type,
            index = %params.selected_index,
            ltp = index_ltp,
            strike,
            qty,
            "taking entry"
        );

        self.instances[i].state = DecisionState::Entering;
        let confirmation = match coordinator
            .execute_entry(now, &security_id, qty, &params.selected_index)
            .await
        {
            Ok(confirmation) => confirmation,
            Err(e) => {
                // No position was created; not retried within this candle.
                let inst = &mut self.instances[i];
                inst.state = DecisionState::Flat;
                inst.note_decision(now, format!("entry order failed: {e}"));
                return Ok(());
            }
        };

        let entry_price = match confirmation.fill_price {
            Some(price) if price > 0.0 => price,
            _ => coordinator
                .venue()
                .option_ltp(&security_id)
                .await
                .ok()
                .filter(|p| *p > 0.0)
                .unwrap_or(0.0),
        };

        let trade_id = format!("T{}-{}", now.format("%Y%m%d%H%M%S"), self.instances[i].id);
        let position = Position {
            trade_id: trade_id.clone(),
            index_name: params.selected_index.clone(),
            option_type,
            strike,
            expiry: expiry.clone(),
            security_id,
            qty,
            mode: params.mode,
            entry_price,
            entry_time: now,
            trailing_stop: None,
            highest_profit_points: 0.0,
        };

        let inst = &mut self.instances[i];
        inst.current_option_ltp = entry_price;
        inst.position = Some(position);
        inst.state = DecisionState::Open;
        inst.last_trade_time = Some(now);
        inst.note_decision(now, "entered");
        inst.note_action(now, "ENTER", format!("{direction} signal"));
        self.daily.trade_count += 1;

        info!(
            trade_id = %trade_id,
            order_id = %confirmation.order_id,
            entry_price,
            "position opened"
        );

        enqueue(
            persist_tx,
            PersistEvent::TradeOpened(TradeRecord {
                trade_id,
                strategy_id: inst.id.clone(),
                index_name: params.selected_index,
                option_type,
                strike,
                expiry,
                qty,
                mode: params.mode,
                entry_time: now,
                entry_price,
                exit_time: None,
                exit_price: None,
                pnl: None,
                exit_reason: None,
                created_at: now,
            }),
        );
        Ok(())
    }

    /// Close instance `i`'s position for `reason`. Returns true on a
    /// confirmed close; a failed exit order keeps the position open and the
    /// next cycle retries.
    pub async fn close_position(
        &mut self,
        i: usize,
        now: DateTime<Utc>,
        global: &EngineConfig,
        coordinator: &mut ExecutionCoordinator,
        persist_tx: &mpsc::Sender<PersistEvent>,
        reason: ExitReason,
    ) -> Result<bool> {
        let Some(pos) = self.instances[i].position.clone() else {
            return Ok(false);
        };

        self.instances[i].state = DecisionState::Exiting;
        let confirmation = match coordinator
            .execute_exit(now, &pos.security_id, pos.qty, &pos.index_name)
            .await
        {
            Ok(confirmation) => confirmation,
            Err(e) => {
                // Still open; the ledger is not touched without confirmation.
                let inst = &mut self.instances[i];
                inst.state = DecisionState::Open;
                warn!(
                    trade_id = %pos.trade_id,
                    reason = %reason,
                    error = %e,
                    "exit order failed, retrying next cycle"
                );
                return Ok(false);
            }
        };

        let quoted = self.instances[i].current_option_ltp;
        let exit_price = confirmation
            .fill_price
            .filter(|p| *p > 0.0)
            .unwrap_or(if quoted > 0.0 { quoted } else { pos.entry_price });
        let pnl = (exit_price - pos.entry_price) * pos.qty as f64;

        self.daily.record_close(pnl, global.daily_max_loss);

        let inst = &mut self.instances[i];
        inst.position = None;
        inst.state = DecisionState::Flat;
        inst.last_executed_direction = match pos.option_type {
            OptionType::Ce => Some(SignalDirection::Green),
            OptionType::Pe => Some(SignalDirection::Red),
        };
        if reason == ExitReason::SuperTrendReversal {
            // The opposite side may be taken on the very next signal.
            inst.last_executed_direction = None;
        }
        inst.note_action(now, "EXIT", reason.to_string());

        info!(
            trade_id = %pos.trade_id,
            option = %pos.option_type,
            strike = pos.strike,
            reason = %reason,
            pnl,
            order_id = %confirmation.order_id,
            "position closed"
        );

        enqueue(
            persist_tx,
            PersistEvent::TradeClosed {
                trade_id: pos.trade_id,
                exit_time: now,
                exit_price,
                pnl,
                exit_reason: reason.to_string(),
            },
        );
        Ok(true)
    }

    /// Unconditional exit of every open position, bypassing all gating.
    pub async fn square_off_all(
        &mut self,
        now: DateTime<Utc>,
        global: &EngineConfig,
        coordinator: &mut ExecutionCoordinator,
        persist_tx: &mpsc::Sender<PersistEvent>,
        reason: ExitReason,
    ) -> usize {
        let mut closed = 0;
        for i in 0..self.instances.len() {
            if self.instances[i].position.is_none() {
                continue;
            }
            match self
                .close_position(i, now, global, coordinator, persist_tx, reason)
                .await
            {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(strategy = %self.instances[i].id, error = %e, "square-off failed");
                }
            }
        }
        closed
    }

    /// Square off a single instance by strategy id.
    pub async fn square_off_strategy(
        &mut self,
        strategy_id: &str,
        now: DateTime<Utc>,
        global: &EngineConfig,
        coordinator: &mut ExecutionCoordinator,
        persist_tx: &mpsc::Sender<PersistEvent>,
    ) -> Result<bool> {
        let Some(i) = self.instances.iter().position(|inst| inst.id == strategy_id) else {
            return Err(Error::Config(format!("unknown strategy id: {strategy_id}")));
        };
        if self.instances[i].position.is_none() {
            return Ok(false);
        }
        self.close_position(i, now, global, coordinator, persist_tx, ExitReason::ManualSquareOff)
            .await
    }

    fn persist_candle(
        &self,
        i: usize,
        candle: &Candle,
        eval: &IndicatorEval,
        index_name: &str,
        persist_tx: &mpsc::Sender<PersistEvent>,
    ) {
        let inst = &self.instances[i];
        if eval.supertrend_value.is_none() {
            return; // indicator still warming up, nothing worth recording
        }
        let signal_status = match eval.signal {
            Some(SignalDirection::Green) => "buy",
            Some(SignalDirection::Red) => "sell",
            None => "waiting",
        };
        enqueue(
            persist_tx,
            PersistEvent::CandleClosed(CandleSnapshot {
                strategy_id: inst.id.clone(),
                index_name: index_name.to_string(),
                candle_number: inst.candle_number,
                high: candle.high,
                low: candle.low,
                close: candle.close,
                supertrend_value: eval.supertrend_value,
                macd_value: eval.macd_last,
                signal_status: signal_status.to_string(),
                closed_at: candle.end,
            }),
        );
    }

    /// Build the ~1 Hz telemetry snapshot. The first instance doubles as the
    /// primary for the single-strategy dashboard fields.
    pub fn telemetry(
        &self,
        global: &EngineConfig,
        index_ltp: f64,
        is_running: bool,
        mode: TradingMode,
        now: DateTime<Utc>,
    ) -> TelemetrySnapshot {
        let primary = self.instances.first();

        let signal_status = |signal: Option<SignalDirection>| match signal {
            Some(SignalDirection::Green) => "buy".to_string(),
            Some(SignalDirection::Red) => "sell".to_string(),
            None => "waiting".to_string(),
        };

        TelemetrySnapshot {
            index_ltp,
            signal_status: signal_status(primary.and_then(|p| p.last_signal)),
            supertrend_value: primary
                .and_then(|p| p.supertrend.last_value())
                .unwrap_or(0.0),
            htf_signal_status: signal_status(primary.and_then(|p| {
                p.htf_supertrend.direction().and_then(SignalDirection::from_direction)
            })),
            htf_supertrend_value: primary
                .and_then(|p| p.htf_supertrend.last_value())
                .unwrap_or(0.0),
            position: primary.and_then(|p| p.position.clone()),
            entry_price: primary
                .and_then(|p| p.position.as_ref().map(|pos| pos.entry_price))
                .unwrap_or(0.0),
            current_option_ltp: primary.map(|p| p.current_option_ltp).unwrap_or(0.0),
            trailing_stop: primary.and_then(|p| p.position.as_ref().and_then(|pos| pos.trailing_stop)),
            daily_pnl: self.daily.realized_pnl,
            daily_trades: self.daily.trade_count,
            daily_max_drawdown: self.daily.max_drawdown,
            breaker_tripped: self.daily.breaker_tripped,
            is_running,
            mode: Some(mode),
            selected_index: global.selected_index.clone(),
            candle_interval: global.candle_interval,
            instances: self.instances.iter().map(|i| i.activity(global)).collect(),
            timestamp: Some(now),
        }
    }

    /// Daily boundary reset: per-day stats plus every instance's indicator
    /// state and memories. Idempotent per IST date.
    pub fn daily_reset(&mut self, now: DateTime<Utc>) -> bool {
        let date = session::ist_date(now);
        if !self.daily.reset_for(date) {
            return false;
        }
        for inst in &mut self.instances {
            inst.daily_reset();
        }
        info!(%date, "daily reset applied");
        true
    }
}
