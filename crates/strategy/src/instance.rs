use chrono::{DateTime, Utc};
use tracing::warn;

use common::config::{EffectiveParams, EngineConfig, InstanceOverrides};
use common::{Candle, InstanceActivity, Position, SignalDirection};

use crate::indicators::{Adx, Macd, SuperTrend};
use crate::rules::HtfFilter;

/// Lifecycle of one instance's position.
///
/// `Entering`/`Exiting` only exist while an order confirmation is awaited;
/// a failed placement falls back to the previous stable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecisionState {
    #[default]
    Flat,
    Entering,
    Open,
    Exiting,
}

/// Indicator readings produced by one base-timeframe candle close.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorEval {
    pub supertrend_value: Option<f64>,
    pub supertrend_direction: Option<i8>,
    /// Per-candle directional signal (the SuperTrend side), once established.
    pub signal: Option<SignalDirection>,
    /// True when `signal` differs from the previous candle's signal.
    pub flipped: bool,
    pub macd_last: Option<f64>,
    pub macd_signal_line: Option<f64>,
    pub adx_value: Option<f64>,
}

/// One independent strategy: its indicator set, decision state and position,
/// plus the two override layers of its parameter chain.
pub struct StrategyInstance {
    pub id: String,
    pub name: String,
    strategy_layer: InstanceOverrides,
    instance_layer: InstanceOverrides,

    pub supertrend: SuperTrend,
    pub htf_supertrend: SuperTrend,
    pub macd: Macd,
    pub adx: Adx,

    pub state: DecisionState,
    pub position: Option<Position>,
    /// Signal seen on the previous candle, for flip detection.
    pub last_signal: Option<SignalDirection>,
    /// Direction of the last completed trade; cleared by the reversal-exit
    /// path so the opposite entry can follow immediately.
    pub last_executed_direction: Option<SignalDirection>,
    pub last_trade_time: Option<DateTime<Utc>>,
    /// Close time of the candle on which the last exit happened; entry
    /// evaluation pauses for one interval after it.
    pub last_exit_candle_time: Option<DateTime<Utc>>,
    pub candle_number: u64,
    pub current_option_ltp: f64,

    // Observability
    pub last_eval_time: Option<DateTime<Utc>>,
    pub last_decision: Option<String>,
    pub last_action: Option<String>,
    pub last_action_time: Option<DateTime<Utc>>,
    pub last_action_reason: Option<String>,
}

impl StrategyInstance {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        global: &EngineConfig,
        strategy_layer: InstanceOverrides,
        instance_layer: InstanceOverrides,
    ) -> Self {
        let params = EffectiveParams::resolve(global, &strategy_layer, &instance_layer);
        let (macd_fast, macd_slow) = if global.macd_fast < global.macd_slow {
            (global.macd_fast, global.macd_slow)
        } else {
            warn!(
                fast = global.macd_fast,
                slow = global.macd_slow,
                "MACD fast period must be below slow, using 12/26"
            );
            (12, 26)
        };
        let st_period = params.supertrend_period.max(2);
        let st_mult = if params.supertrend_multiplier > 0.0 {
            params.supertrend_multiplier
        } else {
            4.0
        };
        Self {
            id: id.into(),
            name: name.into(),
            supertrend: SuperTrend::new(st_period, st_mult),
            htf_supertrend: SuperTrend::new(st_period, st_mult),
            macd: Macd::new(macd_fast, macd_slow, global.macd_signal.max(1)),
            adx: Adx::new(global.adx_period.max(2)),
            strategy_layer,
            instance_layer,
            state: DecisionState::default(),
            position: None,
            last_signal: None,
            last_executed_direction: None,
            last_trade_time: None,
            last_exit_candle_time: None,
            candle_number: 0,
            current_option_ltp: 0.0,
            last_eval_time: None,
            last_decision: None,
            last_action: None,
            last_action_time: None,
            last_action_reason: None,
        }
    }

    /// Resolve this instance's parameters through the 3-level chain against
    /// the current global config.
    pub fn params(&self, global: &EngineConfig) -> EffectiveParams {
        EffectiveParams::resolve(global, &self.strategy_layer, &self.instance_layer)
    }

    /// Feed one closed base-timeframe candle through every indicator and
    /// report the combined reading. Also advances flip tracking.
    pub fn update_on_close(&mut self, candle: &Candle) -> IndicatorEval {
        self.candle_number += 1;

        let st = self
            .supertrend
            .add_candle(candle.high, candle.low, candle.close);
        self.macd.add_close(candle.close);
        let adx_value = self.adx.add_candle(candle.high, candle.low, candle.close);

        let signal = st.map(|o| o.signal);
        let flipped = match (signal, self.last_signal) {
            (Some(sig), Some(prev)) => sig != prev,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if let Some(sig) = signal {
            self.last_signal = Some(sig);
        }

        IndicatorEval {
            supertrend_value: st.map(|o| o.value),
            supertrend_direction: self.supertrend.direction(),
            signal,
            flipped,
            macd_last: self.macd.last_macd(),
            macd_signal_line: self.macd.last_signal_line(),
            adx_value,
        }
    }

    /// Feed one closed HTF candle into the HTF SuperTrend.
    pub fn update_htf_on_close(&mut self, candle: &Candle) {
        self.htf_supertrend
            .add_candle(candle.high, candle.low, candle.close);
    }

    /// The HTF gate for an entry evaluation: only in play for sub-minute
    /// execution intervals with the filter enabled.
    pub fn htf_filter(&self, global: &EngineConfig) -> HtfFilter {
        let params = self.params(global);
        if !global.htf_filter_enabled || params.candle_interval >= 60 {
            return HtfFilter::NotApplicable;
        }
        match self.htf_supertrend.direction() {
            Some(dir) => HtfFilter::Direction(dir),
            None => HtfFilter::NotReady,
        }
    }

    /// Whether the minimum-hold window since entry is still open.
    pub fn min_hold_active(&self, now: DateTime<Utc>, params: &EffectiveParams) -> bool {
        if params.min_hold_seconds == 0 {
            return false;
        }
        match &self.position {
            Some(pos) => {
                (now - pos.entry_time).num_seconds() < params.min_hold_seconds as i64
            }
            None => false,
        }
    }

    pub fn is_active(&self, global: &EngineConfig) -> bool {
        self.params(global).active
    }

    /// Full reset at the daily boundary: indicators, flip tracking, candle
    /// numbering. The position is left alone (it is squared off separately).
    pub fn daily_reset(&mut self) {
        self.supertrend.reset();
        self.htf_supertrend.reset();
        self.macd.reset();
        self.adx.reset();
        self.last_signal = None;
        self.last_executed_direction = None;
        self.last_exit_candle_time = None;
        self.last_trade_time = None;
        self.candle_number = 0;
    }

    pub fn note_decision(&mut self, now: DateTime<Utc>, decision: impl Into<String>) {
        self.last_eval_time = Some(now);
        self.last_decision = Some(decision.into());
    }

    pub fn note_action(&mut self, now: DateTime<Utc>, action: &str, reason: impl Into<String>) {
        self.last_action = Some(action.to_string());
        self.last_action_time = Some(now);
        self.last_action_reason = Some(reason.into());
    }

    pub fn activity(&self, global: &EngineConfig) -> InstanceActivity {
        let params = self.params(global);
        InstanceActivity {
            strategy_id: self.id.clone(),
            strategy_name: self.name.clone(),
            active: params.active,
            mode: Some(params.mode),
            has_position: self.position.is_some(),
            last_eval_time: self.last_eval_time,
            last_decision: self.last_decision.clone(),
            last_action: self.last_action.clone(),
            last_action_time: self.last_action_time,
            last_action_reason: self.last_action_reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::TradingMode;

    fn candle(close: f64) -> Candle {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Candle {
            start,
            end: start + chrono::Duration::seconds(5),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
        }
    }

    fn test_instance() -> (StrategyInstance, EngineConfig) {
        let global = EngineConfig::default();
        let inst = StrategyInstance::new(
            "1",
            "NIFTY scalp",
            &global,
            InstanceOverrides::default(),
            InstanceOverrides::default(),
        );
        (inst, global)
    }

    #[test]
    fn first_established_signal_counts_as_flip() {
        let (mut inst, _) = test_instance();
        let mut evals = Vec::new();
        for i in 0..10 {
            evals.push(inst.update_on_close(&candle(100.0 + i as f64 * 3.0)));
        }
        let first_signal = evals.iter().find(|e| e.signal.is_some()).unwrap();
        assert!(first_signal.flipped);
    }

    #[test]
    fn repeat_signal_is_not_a_flip() {
        let (mut inst, _) = test_instance();
        let mut evals = Vec::new();
        for i in 0..20 {
            evals.push(inst.update_on_close(&candle(100.0 + i as f64 * 3.0)));
        }
        // After the first established candle, a steady rally keeps the same
        // direction: no further flips.
        let signal_evals: Vec<_> = evals.iter().filter(|e| e.signal.is_some()).collect();
        assert!(signal_evals.len() > 2);
        assert!(signal_evals[1..].iter().all(|e| !e.flipped));
    }

    #[test]
    fn htf_filter_is_not_applicable_for_minute_intervals() {
        let (inst, mut global) = test_instance();
        global.candle_interval = 60;
        assert_eq!(inst.htf_filter(&global), HtfFilter::NotApplicable);
    }

    #[test]
    fn htf_filter_tracks_htf_supertrend() {
        let (mut inst, global) = test_instance();
        // default interval 5s, filter enabled -> in play but not ready
        assert_eq!(inst.htf_filter(&global), HtfFilter::NotReady);

        for i in 0..10 {
            inst.update_htf_on_close(&candle(100.0 + i as f64 * 3.0));
        }
        assert!(matches!(inst.htf_filter(&global), HtfFilter::Direction(_)));
    }

    #[test]
    fn min_hold_window_tracks_entry_time() {
        let (mut inst, global) = test_instance();
        let params = inst.params(&global);
        let entry_time = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        inst.position = Some(Position {
            trade_id: "T1".into(),
            index_name: "NIFTY".into(),
            option_type: common::OptionType::Ce,
            strike: 23_500,
            expiry: "2025-03-20".into(),
            security_id: "SIM_1".into(),
            qty: 75,
            mode: TradingMode::Paper,
            entry_price: 150.0,
            entry_time,
            trailing_stop: None,
            highest_profit_points: 0.0,
        });

        // default min_hold_seconds = 15
        assert!(inst.min_hold_active(entry_time + chrono::Duration::seconds(10), &params));
        assert!(!inst.min_hold_active(entry_time + chrono::Duration::seconds(15), &params));
    }

    #[test]
    fn daily_reset_clears_indicators_and_memory() {
        let (mut inst, _) = test_instance();
        for i in 0..20 {
            inst.update_on_close(&candle(100.0 + i as f64 * 3.0));
        }
        assert!(inst.last_signal.is_some());
        assert!(inst.candle_number > 0);

        inst.daily_reset();
        assert!(inst.last_signal.is_none());
        assert_eq!(inst.candle_number, 0);
        assert!(inst.supertrend.direction().is_none());
    }
}
