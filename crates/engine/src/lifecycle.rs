use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock, watch};
use tracing::{error, info, warn};

use common::config::{ConfigPatch, EngineConfig};
use common::{
    session, CommandOutcome, EngineCommand, EngineState, Error, ExecutionVenue, ExitReason,
    TelemetrySnapshot, TradingMode,
};
use strategy::CandleAggregator;

use crate::coordinator::ExecutionCoordinator;
use crate::orchestrator::PortfolioOrchestrator;
use crate::persist::PersistEvent;

/// Cloneable handle passed to the control surface (API routes).
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    config: Arc<RwLock<EngineConfig>>,
    telemetry_rx: watch::Receiver<TelemetrySnapshot>,
    telemetry_stream: broadcast::Sender<TelemetrySnapshot>,
}

impl EngineHandle {
    async fn send(
        &self,
        build: impl FnOnce(oneshot::Sender<CommandOutcome>) -> EngineCommand,
    ) -> CommandOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.command_tx.send(build(reply_tx)).await.is_err() {
            return CommandOutcome::err("engine task is gone");
        }
        reply_rx
            .await
            .unwrap_or_else(|_| CommandOutcome::err("engine dropped the command"))
    }

    pub async fn start(&self) -> CommandOutcome {
        self.send(|reply| EngineCommand::Start { reply }).await
    }

    pub async fn stop(&self) -> CommandOutcome {
        self.send(|reply| EngineCommand::Stop { reply }).await
    }

    pub async fn square_off(&self) -> CommandOutcome {
        self.send(|reply| EngineCommand::SquareOff { reply }).await
    }

    pub async fn square_off_strategy(&self, strategy_id: impl Into<String>) -> CommandOutcome {
        let strategy_id = strategy_id.into();
        self.send(|reply| EngineCommand::SquareOffStrategy { strategy_id, reply })
            .await
    }

    /// Validate and apply a config patch; returns the accepted field names.
    pub async fn update_config(&self, patch: &ConfigPatch) -> Vec<&'static str> {
        let mut config = self.config.write().await;
        config.apply_patch(patch)
    }

    pub async fn config(&self) -> EngineConfig {
        self.config.read().await.clone()
    }

    /// Latest telemetry snapshot.
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry_rx.borrow().clone()
    }

    /// Subscribe to the ~1 Hz telemetry broadcast.
    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<TelemetrySnapshot> {
        self.telemetry_stream.subscribe()
    }

    pub fn state(&self) -> EngineState {
        if self.telemetry_rx.borrow().is_running {
            EngineState::Running
        } else {
            EngineState::Stopped
        }
    }
}

/// The decision engine: one cooperative 1-second tick loop that is the sole
/// mutator of indicator state, risk state and the position ledger. Order
/// confirmations are awaited inline; persistence and telemetry only enqueue.
pub struct Engine {
    config: Arc<RwLock<EngineConfig>>,
    mode: TradingMode,
    command_rx: mpsc::Receiver<EngineCommand>,
    telemetry_tx: watch::Sender<TelemetrySnapshot>,
    telemetry_stream: broadcast::Sender<TelemetrySnapshot>,
    persist_tx: mpsc::Sender<PersistEvent>,
    coordinator: ExecutionCoordinator,
    orchestrator: PortfolioOrchestrator,
    base_agg: CandleAggregator,
    htf_agg: CandleAggregator,
    running: bool,
    index_ltp: f64,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        mode: TradingMode,
        venue: Arc<dyn ExecutionVenue>,
        persist_tx: mpsc::Sender<PersistEvent>,
    ) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (telemetry_tx, telemetry_rx) = watch::channel(TelemetrySnapshot::default());
        let (telemetry_stream, _) = broadcast::channel(64);
        let config = Arc::new(RwLock::new(config));

        let handle = EngineHandle {
            command_tx,
            config: config.clone(),
            telemetry_rx,
            telemetry_stream: telemetry_stream.clone(),
        };

        let orchestrator = {
            let cfg = config.try_read().expect("fresh lock").clone();
            PortfolioOrchestrator::from_config(&cfg)
        };
        let (base_interval, htf_interval) = {
            let cfg = config.try_read().expect("fresh lock");
            (cfg.candle_interval, cfg.htf_filter_timeframe.max(1))
        };

        let engine = Engine {
            config,
            mode,
            command_rx,
            telemetry_tx,
            telemetry_stream,
            persist_tx,
            coordinator: ExecutionCoordinator::new(venue),
            orchestrator,
            base_agg: CandleAggregator::new(base_interval),
            htf_agg: CandleAggregator::new(htf_interval),
            running: false,
            index_ltp: 0.0,
        };

        (engine, handle)
    }

    /// Run the engine loop. Call from `tokio::spawn`. The loop never exits
    /// on an evaluation error; it logs, backs off briefly and continues.
    pub async fn run(mut self) {
        info!(mode = %self.mode, "Engine initialized in stopped state, waiting for start");
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_cmd = self.command_rx.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            warn!("engine command channel closed, shutting down");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "tick failed, backing off");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Start { reply } => {
                let outcome = if self.running {
                    CommandOutcome::err("Bot already running")
                } else {
                    let cfg = self.config.read().await.clone();
                    // Rebuild instances and buckets so config changes made
                    // while stopped take effect; the day's stats carry over.
                    let daily = std::mem::take(&mut self.orchestrator.daily);
                    self.orchestrator = PortfolioOrchestrator::from_config(&cfg);
                    self.orchestrator.daily = daily;
                    self.base_agg = CandleAggregator::new(cfg.candle_interval);
                    self.htf_agg = CandleAggregator::new(cfg.htf_filter_timeframe.max(1));
                    self.index_ltp = 0.0;
                    self.running = true;
                    info!(
                        index = %cfg.selected_index,
                        interval = cfg.candle_interval,
                        kind = %cfg.strategy_kind,
                        mode = %self.mode,
                        "Bot started"
                    );
                    CommandOutcome::ok(format!(
                        "Bot started for {} ({}s)",
                        cfg.selected_index, cfg.candle_interval
                    ))
                };
                let _ = reply.send(outcome);
            }

            EngineCommand::Stop { reply } => {
                self.running = false;
                if self.orchestrator.open_position_count() > 0 {
                    // Deliberately left open: reconcile against the venue on
                    // restart rather than assuming a fill either way.
                    warn!("Bot stopped with an open position, reconcile on restart");
                }
                info!("Bot stopped");
                let _ = reply.send(CommandOutcome::ok("Bot stopped"));
            }

            EngineCommand::SquareOff { reply } => {
                let outcome = if self.orchestrator.open_position_count() == 0 {
                    CommandOutcome::err("No open position")
                } else {
                    let cfg = self.config.read().await.clone();
                    let closed = self
                        .orchestrator
                        .square_off_all(
                            Utc::now(),
                            &cfg,
                            &mut self.coordinator,
                            &self.persist_tx,
                            ExitReason::ManualSquareOff,
                        )
                        .await;
                    if closed > 0 {
                        CommandOutcome::ok(format!("Squared off {closed} position(s)"))
                    } else {
                        CommandOutcome::err("Failed to square off")
                    }
                };
                let _ = reply.send(outcome);
            }

            EngineCommand::SquareOffStrategy { strategy_id, reply } => {
                let cfg = self.config.read().await.clone();
                let outcome = match self
                    .orchestrator
                    .square_off_strategy(
                        &strategy_id,
                        Utc::now(),
                        &cfg,
                        &mut self.coordinator,
                        &self.persist_tx,
                    )
                    .await
                {
                    Ok(true) => CommandOutcome::ok(format!("Strategy {strategy_id} squared off")),
                    Ok(false) => {
                        CommandOutcome::err(format!("No open position for strategy {strategy_id}"))
                    }
                    Err(e) => CommandOutcome::err(e.to_string()),
                };
                let _ = reply.send(outcome);
            }
        }
    }

    fn htf_active(cfg: &EngineConfig) -> bool {
        cfg.htf_filter_enabled && cfg.candle_interval < 60
    }

    /// One engine tick: time-triggered preemptions, quote, protective
    /// sweep, candle close evaluation, telemetry.
    async fn tick(&mut self, now: DateTime<Utc>) -> common::Result<()> {
        let cfg = self.config.read().await.clone();

        if !self.running {
            self.publish_telemetry(&cfg, now);
            return Ok(());
        }

        // A changed execution interval replaces the bucket and restarts the
        // indicator warm-up, same as a fresh start.
        if self.base_agg.interval_secs() != cfg.candle_interval {
            info!(interval = cfg.candle_interval, "candle interval changed, resetting state");
            self.base_agg = CandleAggregator::new(cfg.candle_interval);
            for inst in &mut self.orchestrator.instances {
                inst.daily_reset();
            }
        }

        // Time-triggered preemptions, evaluated once per tick.
        if session::past_daily_reset_boundary(now) && self.orchestrator.daily_reset(now) {
            self.base_agg.reset();
            self.htf_agg.reset();
        }

        if session::past_squareoff_cutoff(now) && self.orchestrator.open_position_count() > 0 {
            info!("pre-close cutoff reached, forcing square-off");
            self.orchestrator
                .square_off_all(
                    now,
                    &cfg,
                    &mut self.coordinator,
                    &self.persist_tx,
                    ExitReason::ForceSquareOff,
                )
                .await;
        }

        if !session::is_market_open(now) {
            self.publish_telemetry(&cfg, now);
            return Ok(());
        }

        if self.orchestrator.daily.breaker_tripped {
            self.publish_telemetry(&cfg, now);
            return Ok(());
        }

        // Quote the underlying. No data means no candle mutation this tick.
        match self.coordinator.venue().index_ltp(&cfg.selected_index).await {
            Ok(ltp) if ltp > 0.0 => {
                self.index_ltp = ltp;
                self.base_agg.update(now, ltp);
                if Self::htf_active(&cfg) {
                    self.htf_agg.update(now, ltp);
                }
            }
            Ok(_) => {}
            Err(Error::MarketData(_)) => {}
            Err(e) => warn!(error = %e, "underlying quote failed, skipping tick"),
        }

        if Self::htf_active(&cfg) {
            if let Some(candle) = self.htf_agg.poll_close(now) {
                info!(
                    high = candle.high,
                    low = candle.low,
                    close = candle.close,
                    "HTF candle closed"
                );
                self.orchestrator.on_htf_candle_close(&candle);
            }
        }

        // Tick-cadence protective exits; a fill resets the open bucket so
        // the next entry decision starts from a fresh candle.
        let exited = self
            .orchestrator
            .on_tick(now, &cfg, &mut self.coordinator, &self.persist_tx)
            .await;
        if exited {
            self.base_agg.reset();
        }

        if let Some(candle) = self.base_agg.poll_close(now) {
            info!(
                index = %cfg.selected_index,
                high = candle.high,
                low = candle.low,
                close = candle.close,
                "candle closed"
            );
            self.orchestrator
                .on_candle_close(&candle, now, &cfg, &mut self.coordinator, &self.persist_tx)
                .await;
        }

        self.publish_telemetry(&cfg, now);
        Ok(())
    }

    fn publish_telemetry(&self, cfg: &EngineConfig, now: DateTime<Utc>) {
        let snapshot =
            self.orchestrator
                .telemetry(cfg, self.index_ltp, self.running, self.mode, now);
        self.telemetry_tx.send_replace(snapshot.clone());
        // No receivers is fine; the dashboard may not be connected.
        let _ = self.telemetry_stream.send(snapshot);
    }
}
