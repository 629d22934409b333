use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::indices;
use crate::TradingMode;

/// Candle intervals the engine accepts, in seconds.
pub const VALID_TIMEFRAMES: &[u32] = &[5, 15, 30, 60, 300, 900];

/// Process-level configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Broker credentials (required only for live trading)
    pub broker_base_url: String,
    pub broker_access_token: String,
    pub broker_client_id: String,

    // Dashboard
    pub dashboard_token: String,
    pub dashboard_port: u16,

    // Trading
    pub trading_mode: TradingMode,

    // Database
    pub database_url: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode = match required_env("TRADING_MODE").to_lowercase().as_str() {
            "paper" => TradingMode::Paper,
            "live" => TradingMode::Live,
            other => panic!("ERROR: TRADING_MODE must be 'paper' or 'live', got: '{other}'"),
        };

        if trading_mode == TradingMode::Live
            && optional_env("BROKER_ACCESS_TOKEN").is_none()
        {
            panic!("BROKER_ACCESS_TOKEN is required when TRADING_MODE=live");
        }

        Config {
            broker_base_url: optional_env("BROKER_BASE_URL")
                .unwrap_or_else(|| "https://api.dhan.co".to_string()),
            broker_access_token: optional_env("BROKER_ACCESS_TOKEN").unwrap_or_default(),
            broker_client_id: optional_env("BROKER_CLIENT_ID").unwrap_or_default(),
            dashboard_token: required_env("DASHBOARD_TOKEN"),
            dashboard_port: optional_env("DASHBOARD_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            trading_mode,
            database_url: required_env("DATABASE_URL"),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Closed set of entry/exit rule variants. Selected once at configuration
/// time; the decision path never re-dispatches on strings per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    SupertrendMacd,
    SupertrendAdx,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::SupertrendMacd => write!(f, "supertrend_macd"),
            StrategyKind::SupertrendAdx => write!(f, "supertrend_adx"),
        }
    }
}

/// Runtime trading parameters, updatable from the control surface.
/// Every field has a safe default; `apply_patch` validates/clamps updates
/// and reports which fields were accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub order_qty: u32,
    pub max_trades_per_day: u32,
    pub daily_max_loss: f64,
    /// Fixed SL points below entry (0 = disabled).
    pub initial_stoploss: f64,
    /// Max loss amount per trade in rupees (0 = disabled).
    pub max_loss_per_trade: f64,
    /// Profit points to start trailing (0 = trailing disabled).
    pub trail_start_profit: f64,
    /// Trailing step size in points (0 = trailing disabled).
    pub trail_step: f64,
    /// Target profit points (0 = disabled).
    pub target_points: f64,
    /// Rupee risk budget per trade for risk-based lot sizing (0 = disabled).
    pub risk_per_trade: f64,

    pub strategy_kind: StrategyKind,
    pub supertrend_period: usize,
    pub supertrend_multiplier: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub macd_confirmation_enabled: bool,
    pub adx_period: usize,
    pub adx_threshold: f64,

    /// Execution candle interval in seconds.
    pub candle_interval: u32,
    pub selected_index: String,
    pub trade_only_on_flip: bool,

    /// Require HTF SuperTrend alignment for entries on sub-minute intervals.
    pub htf_filter_enabled: bool,
    pub htf_filter_timeframe: u32,

    /// Minimum seconds to hold a position before strategy exits (0 = off).
    /// Protective exits (loss caps, target, trailing) ignore this.
    pub min_hold_seconds: u32,
    /// Minimum seconds between any two orders (0 = off).
    pub min_order_cooldown_seconds: u32,

    /// Soft pause: false blocks new entries while exits keep working.
    pub trading_enabled: bool,

    pub portfolio_enabled: bool,
    pub portfolio_strategy_ids: Vec<u32>,
    /// Strategy-level parameter layer, keyed by strategy id.
    pub portfolio_strategies: HashMap<String, StrategyProfile>,
    /// Instance-level override layer, keyed by strategy id.
    pub portfolio_instances: HashMap<String, InstanceOverrides>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            order_qty: 1,
            max_trades_per_day: 5,
            daily_max_loss: 2000.0,
            initial_stoploss: 50.0,
            max_loss_per_trade: 0.0,
            trail_start_profit: 0.0,
            trail_step: 0.0,
            target_points: 0.0,
            risk_per_trade: 0.0,
            strategy_kind: StrategyKind::SupertrendMacd,
            supertrend_period: 7,
            supertrend_multiplier: 4.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            macd_confirmation_enabled: true,
            adx_period: 14,
            adx_threshold: 25.0,
            candle_interval: 5,
            selected_index: "NIFTY".to_string(),
            trade_only_on_flip: true,
            htf_filter_enabled: true,
            htf_filter_timeframe: 60,
            min_hold_seconds: 15,
            min_order_cooldown_seconds: 15,
            trading_enabled: true,
            portfolio_enabled: false,
            portfolio_strategy_ids: Vec::new(),
            portfolio_strategies: HashMap::new(),
            portfolio_instances: HashMap::new(),
        }
    }
}

/// Strategy-level configuration layer: a display name plus the same optional
/// parameter set as instance overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyProfile {
    pub name: String,
    #[serde(flatten)]
    pub params: InstanceOverrides,
}

/// One layer of the 3-level parameter chain. Absent fields fall through to
/// the next layer; a level is never skipped silently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceOverrides {
    pub active: Option<bool>,
    pub mode: Option<TradingMode>,
    pub selected_index: Option<String>,
    pub candle_interval: Option<u32>,
    pub order_qty: Option<u32>,
    pub target_points: Option<f64>,
    pub initial_stoploss: Option<f64>,
    pub trail_start_profit: Option<f64>,
    pub trail_step: Option<f64>,
    pub max_loss_per_trade: Option<f64>,
    pub risk_per_trade: Option<f64>,
    pub min_hold_seconds: Option<u32>,
    pub trade_only_on_flip: Option<bool>,
    pub macd_confirmation_enabled: Option<bool>,
    pub adx_threshold: Option<f64>,
    pub strategy_kind: Option<StrategyKind>,
    pub supertrend_period: Option<usize>,
    pub supertrend_multiplier: Option<f64>,
}

/// Fully resolved parameters for one strategy instance:
/// instance override > strategy profile > global default.
#[derive(Debug, Clone)]
pub struct EffectiveParams {
    pub active: bool,
    pub mode: TradingMode,
    pub selected_index: String,
    pub candle_interval: u32,
    pub order_qty: u32,
    pub target_points: f64,
    pub initial_stoploss: f64,
    pub trail_start_profit: f64,
    pub trail_step: f64,
    pub max_loss_per_trade: f64,
    pub risk_per_trade: f64,
    pub min_hold_seconds: u32,
    pub trade_only_on_flip: bool,
    pub macd_confirmation_enabled: bool,
    pub adx_threshold: f64,
    pub strategy_kind: StrategyKind,
    pub supertrend_period: usize,
    pub supertrend_multiplier: f64,
}

impl EffectiveParams {
    pub fn resolve(
        global: &EngineConfig,
        strategy: &InstanceOverrides,
        instance: &InstanceOverrides,
    ) -> Self {
        fn pick<T: Clone>(instance: &Option<T>, strategy: &Option<T>, global: T) -> T {
            instance
                .clone()
                .or_else(|| strategy.clone())
                .unwrap_or(global)
        }

        Self {
            active: pick(&instance.active, &strategy.active, true),
            mode: pick(&instance.mode, &strategy.mode, TradingMode::Paper),
            selected_index: pick(
                &instance.selected_index,
                &strategy.selected_index,
                global.selected_index.clone(),
            ),
            candle_interval: pick(
                &instance.candle_interval,
                &strategy.candle_interval,
                global.candle_interval,
            ),
            order_qty: pick(&instance.order_qty, &strategy.order_qty, global.order_qty),
            target_points: pick(
                &instance.target_points,
                &strategy.target_points,
                global.target_points,
            ),
            initial_stoploss: pick(
                &instance.initial_stoploss,
                &strategy.initial_stoploss,
                global.initial_stoploss,
            ),
            trail_start_profit: pick(
                &instance.trail_start_profit,
                &strategy.trail_start_profit,
                global.trail_start_profit,
            ),
            trail_step: pick(&instance.trail_step, &strategy.trail_step, global.trail_step),
            max_loss_per_trade: pick(
                &instance.max_loss_per_trade,
                &strategy.max_loss_per_trade,
                global.max_loss_per_trade,
            ),
            risk_per_trade: pick(
                &instance.risk_per_trade,
                &strategy.risk_per_trade,
                global.risk_per_trade,
            ),
            min_hold_seconds: pick(
                &instance.min_hold_seconds,
                &strategy.min_hold_seconds,
                global.min_hold_seconds,
            ),
            trade_only_on_flip: pick(
                &instance.trade_only_on_flip,
                &strategy.trade_only_on_flip,
                global.trade_only_on_flip,
            ),
            macd_confirmation_enabled: pick(
                &instance.macd_confirmation_enabled,
                &strategy.macd_confirmation_enabled,
                global.macd_confirmation_enabled,
            ),
            adx_threshold: pick(
                &instance.adx_threshold,
                &strategy.adx_threshold,
                global.adx_threshold,
            ),
            strategy_kind: pick(
                &instance.strategy_kind,
                &strategy.strategy_kind,
                global.strategy_kind,
            ),
            supertrend_period: pick(
                &instance.supertrend_period,
                &strategy.supertrend_period,
                global.supertrend_period,
            ),
            supertrend_multiplier: pick(
                &instance.supertrend_multiplier,
                &strategy.supertrend_multiplier,
                global.supertrend_multiplier,
            ),
        }
    }
}

/// Partial update from the control surface. Unknown/invalid values are
/// rejected or clamped with a warning; accepted field names are reported.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub order_qty: Option<u32>,
    pub max_trades_per_day: Option<u32>,
    pub daily_max_loss: Option<f64>,
    pub initial_stoploss: Option<f64>,
    pub max_loss_per_trade: Option<f64>,
    pub trail_start_profit: Option<f64>,
    pub trail_step: Option<f64>,
    pub target_points: Option<f64>,
    pub risk_per_trade: Option<f64>,
    pub strategy_kind: Option<StrategyKind>,
    pub supertrend_period: Option<usize>,
    pub supertrend_multiplier: Option<f64>,
    pub macd_fast: Option<usize>,
    pub macd_slow: Option<usize>,
    pub macd_signal: Option<usize>,
    pub macd_confirmation_enabled: Option<bool>,
    pub adx_period: Option<usize>,
    pub adx_threshold: Option<f64>,
    pub candle_interval: Option<u32>,
    pub selected_index: Option<String>,
    pub trade_only_on_flip: Option<bool>,
    pub htf_filter_enabled: Option<bool>,
    pub htf_filter_timeframe: Option<u32>,
    pub min_hold_seconds: Option<u32>,
    pub min_order_cooldown_seconds: Option<u32>,
    pub trading_enabled: Option<bool>,
    pub portfolio_enabled: Option<bool>,
    pub portfolio_strategy_ids: Option<Vec<i64>>,
    pub portfolio_instances: Option<HashMap<String, InstanceOverrides>>,
}

impl EngineConfig {
    /// Apply a patch field by field, clamping or rejecting out-of-range
    /// values. Returns the names of the fields that were accepted.
    pub fn apply_patch(&mut self, patch: &ConfigPatch) -> Vec<&'static str> {
        let mut accepted: Vec<&'static str> = Vec::new();

        if let Some(qty) = patch.order_qty {
            let clamped = qty.clamp(1, 10);
            if clamped != qty {
                warn!(requested = qty, capped = clamped, "order_qty capped (max 10 lots)");
            }
            self.order_qty = clamped;
            accepted.push("order_qty");
        }
        if let Some(v) = patch.max_trades_per_day {
            self.max_trades_per_day = v;
            accepted.push("max_trades_per_day");
        }
        if let Some(v) = patch.daily_max_loss {
            if v >= 0.0 {
                self.daily_max_loss = v;
                accepted.push("daily_max_loss");
            } else {
                warn!(value = v, "daily_max_loss must be >= 0, rejected");
            }
        }
        if let Some(v) = patch.initial_stoploss {
            if v >= 0.0 {
                self.initial_stoploss = v;
                accepted.push("initial_stoploss");
            } else {
                warn!(value = v, "initial_stoploss must be >= 0, rejected");
            }
        }
        if let Some(v) = patch.max_loss_per_trade {
            if v >= 0.0 {
                self.max_loss_per_trade = v;
                accepted.push("max_loss_per_trade");
            } else {
                warn!(value = v, "max_loss_per_trade must be >= 0, rejected");
            }
        }
        if let Some(v) = patch.trail_start_profit {
            if v >= 0.0 {
                self.trail_start_profit = v;
                accepted.push("trail_start_profit");
            } else {
                warn!(value = v, "trail_start_profit must be >= 0, rejected");
            }
        }
        if let Some(v) = patch.trail_step {
            if v >= 0.0 {
                self.trail_step = v;
                accepted.push("trail_step");
            } else {
                warn!(value = v, "trail_step must be >= 0, rejected");
            }
        }
        if let Some(v) = patch.target_points {
            if v >= 0.0 {
                self.target_points = v;
                accepted.push("target_points");
            } else {
                warn!(value = v, "target_points must be >= 0, rejected");
            }
        }
        if let Some(v) = patch.risk_per_trade {
            if v >= 0.0 {
                self.risk_per_trade = v;
                accepted.push("risk_per_trade");
            } else {
                warn!(value = v, "risk_per_trade must be >= 0, rejected");
            }
        }
        if let Some(kind) = patch.strategy_kind {
            self.strategy_kind = kind;
            accepted.push("strategy_kind");
            info!(kind = %kind, "strategy kind changed");
        }
        if let Some(v) = patch.supertrend_period {
            if v >= 2 {
                self.supertrend_period = v;
                accepted.push("supertrend_period");
            } else {
                warn!(value = v, "supertrend_period must be >= 2, rejected");
            }
        }
        if let Some(v) = patch.supertrend_multiplier {
            if v > 0.0 {
                self.supertrend_multiplier = v;
                accepted.push("supertrend_multiplier");
            } else {
                warn!(value = v, "supertrend_multiplier must be > 0, rejected");
            }
        }
        if let Some(v) = patch.macd_fast {
            if v >= 1 {
                self.macd_fast = v;
                accepted.push("macd_fast");
            }
        }
        if let Some(v) = patch.macd_slow {
            if v >= 2 {
                self.macd_slow = v;
                accepted.push("macd_slow");
            }
        }
        if let Some(v) = patch.macd_signal {
            if v >= 1 {
                self.macd_signal = v;
                accepted.push("macd_signal");
            }
        }
        if let Some(v) = patch.macd_confirmation_enabled {
            self.macd_confirmation_enabled = v;
            accepted.push("macd_confirmation_enabled");
        }
        if let Some(v) = patch.adx_period {
            if v >= 2 {
                self.adx_period = v;
                accepted.push("adx_period");
            }
        }
        if let Some(v) = patch.adx_threshold {
            if v >= 0.0 {
                self.adx_threshold = v;
                accepted.push("adx_threshold");
            }
        }
        if let Some(v) = patch.candle_interval {
            if VALID_TIMEFRAMES.contains(&v) {
                self.candle_interval = v;
                accepted.push("candle_interval");
                info!(interval = v, "candle interval changed");
            } else {
                warn!(interval = v, valid = ?VALID_TIMEFRAMES, "invalid candle interval, rejected");
            }
        }
        if let Some(name) = &patch.selected_index {
            let upper = name.trim().to_uppercase();
            if indices::is_valid_index(&upper) {
                self.selected_index = upper;
                accepted.push("selected_index");
            } else {
                warn!(index = %upper, "unknown index, rejected");
            }
        }
        if let Some(v) = patch.trade_only_on_flip {
            self.trade_only_on_flip = v;
            accepted.push("trade_only_on_flip");
        }
        if let Some(v) = patch.htf_filter_enabled {
            self.htf_filter_enabled = v;
            accepted.push("htf_filter_enabled");
        }
        if let Some(tf) = patch.htf_filter_timeframe {
            // Only the 60s HTF is supported; anything else is coerced.
            let coerced = if tf == 60 {
                tf
            } else {
                warn!(requested = tf, "unsupported HTF timeframe, using 60s");
                60
            };
            self.htf_filter_timeframe = coerced;
            accepted.push("htf_filter_timeframe");
        }
        if let Some(v) = patch.min_hold_seconds {
            self.min_hold_seconds = v;
            accepted.push("min_hold_seconds");
        }
        if let Some(v) = patch.min_order_cooldown_seconds {
            self.min_order_cooldown_seconds = v;
            accepted.push("min_order_cooldown_seconds");
        }
        if let Some(v) = patch.trading_enabled {
            self.trading_enabled = v;
            accepted.push("trading_enabled");
            info!(enabled = v, "trading enabled flag changed");
        }
        if let Some(v) = patch.portfolio_enabled {
            self.portfolio_enabled = v;
            accepted.push("portfolio_enabled");
            warn!(enabled = v, "portfolio mode changed");
        }
        if let Some(raw) = &patch.portfolio_strategy_ids {
            self.portfolio_strategy_ids = sanitize_strategy_ids(raw);
            accepted.push("portfolio_strategy_ids");
        }
        if let Some(raw) = &patch.portfolio_instances {
            self.portfolio_instances = sanitize_instances(raw);
            accepted.push("portfolio_instances");
        }

        accepted
    }
}

/// Keep positive, unique ids in their original order.
fn sanitize_strategy_ids(raw: &[i64]) -> Vec<u32> {
    let mut seen = std::collections::HashSet::new();
    raw.iter()
        .filter(|&&id| id > 0)
        .filter_map(|&id| u32::try_from(id).ok())
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Normalize the per-instance override map: drop non-numeric keys, clamp
/// order_qty, discard invalid index names and candle intervals.
fn sanitize_instances(
    raw: &HashMap<String, InstanceOverrides>,
) -> HashMap<String, InstanceOverrides> {
    let mut cleaned = HashMap::new();
    for (key, value) in raw {
        let Ok(sid) = key.trim().parse::<u32>() else {
            warn!(key = %key, "non-numeric strategy id in portfolio_instances, dropped");
            continue;
        };
        if sid == 0 {
            continue;
        }
        let mut inst = value.clone();
        if let Some(qty) = inst.order_qty {
            inst.order_qty = Some(qty.min(10));
        }
        if let Some(name) = &inst.selected_index {
            let upper = name.trim().to_uppercase();
            if indices::is_valid_index(&upper) {
                inst.selected_index = Some(upper);
            } else {
                warn!(index = %name, "unknown index in instance override, dropped");
                inst.selected_index = None;
            }
        }
        if let Some(interval) = inst.candle_interval {
            if !VALID_TIMEFRAMES.contains(&interval) {
                warn!(interval, "invalid candle interval in instance override, dropped");
                inst.candle_interval = None;
            }
        }
        if let Some(period) = inst.supertrend_period {
            if period < 2 {
                warn!(period, "invalid supertrend_period in instance override, dropped");
                inst.supertrend_period = None;
            }
        }
        if let Some(mult) = inst.supertrend_multiplier {
            if mult <= 0.0 {
                warn!(mult, "invalid supertrend_multiplier in instance override, dropped");
                inst.supertrend_multiplier = None;
            }
        }
        cleaned.insert(sid.to_string(), inst);
    }
    cleaned
}
