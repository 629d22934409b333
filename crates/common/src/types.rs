use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// A fixed-interval OHLC candle. Immutable once emitted by the aggregator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Option leg side. CE rides an up-move, PE a down-move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum OptionType {
    Ce,
    Pe,
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionType::Ce => write!(f, "CE"),
            OptionType::Pe => write!(f, "PE"),
        }
    }
}

/// Directional signal emitted by an indicator on candle close.
/// GREEN = bullish (take CE), RED = bearish (take PE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalDirection {
    Green,
    Red,
}

impl SignalDirection {
    pub fn option_type(self) -> OptionType {
        match self {
            SignalDirection::Green => OptionType::Ce,
            SignalDirection::Red => OptionType::Pe,
        }
    }

    /// SuperTrend direction value this signal requires (+1 / -1).
    pub fn required_direction(self) -> i8 {
        match self {
            SignalDirection::Green => 1,
            SignalDirection::Red => -1,
        }
    }

    pub fn from_direction(direction: i8) -> Option<Self> {
        match direction {
            1 => Some(SignalDirection::Green),
            -1 => Some(SignalDirection::Red),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalDirection::Green => write!(f, "GREEN"),
            SignalDirection::Red => write!(f, "RED"),
        }
    }
}

/// Side of a broker order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Whether orders go to the real venue or are simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

/// An open option position held by one strategy instance.
/// Created only on a confirmed entry fill, destroyed only on a confirmed exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub trade_id: String,
    pub index_name: String,
    pub option_type: OptionType,
    pub strike: i64,
    pub expiry: String,
    pub security_id: String,
    /// Total quantity in units (lots x lot size). Always > 0.
    pub qty: i64,
    pub mode: TradingMode,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    /// Stop level, once armed. Only ever ratchets up for a held long premium.
    pub trailing_stop: Option<f64>,
    /// Running maximum of (ltp - entry_price) since entry.
    pub highest_profit_points: f64,
}

impl Position {
    pub fn profit_points(&self, ltp: f64) -> f64 {
        ltp - self.entry_price
    }

    pub fn pnl(&self, ltp: f64) -> f64 {
        (ltp - self.entry_price) * self.qty as f64
    }
}

/// Why a position was closed. Exactly one reason is recorded per close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    DailyMaxLoss,
    MaxLossPerTrade,
    TargetHit,
    TrailingStopHit,
    SuperTrendReversal,
    ForceSquareOff,
    ManualSquareOff,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::DailyMaxLoss => write!(f, "Daily Max Loss"),
            ExitReason::MaxLossPerTrade => write!(f, "Max Loss Per Trade"),
            ExitReason::TargetHit => write!(f, "Target Hit"),
            ExitReason::TrailingStopHit => write!(f, "Trailing SL Hit"),
            ExitReason::SuperTrendReversal => write!(f, "SuperTrend Reversal"),
            ExitReason::ForceSquareOff => write!(f, "Force Square-off"),
            ExitReason::ManualSquareOff => write!(f, "Manual Square-off"),
        }
    }
}

/// A trade row handed to the persistence worker on entry and again on exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub strategy_id: String,
    pub index_name: String,
    pub option_type: OptionType,
    pub strike: i64,
    pub expiry: String,
    pub qty: i64,
    pub mode: TradingMode,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub pnl: Option<f64>,
    pub exit_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A closed candle enriched with indicator output, persisted for analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleSnapshot {
    pub strategy_id: String,
    pub index_name: String,
    pub candle_number: u64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub supertrend_value: Option<f64>,
    pub macd_value: Option<f64>,
    pub signal_status: String,
    pub closed_at: DateTime<Utc>,
}

/// Per-day counters. Reset once per IST trading day, idempotently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyStats {
    pub trade_count: u32,
    pub realized_pnl: f64,
    pub max_drawdown: f64,
    pub breaker_tripped: bool,
    pub last_reset_date: Option<NaiveDate>,
}

impl DailyStats {
    /// Fold a realized close into the day. Trips the breaker when cumulative
    /// PnL falls below -daily_max_loss (a limit of 0 disables the breaker).
    pub fn record_close(&mut self, pnl: f64, daily_max_loss: f64) {
        self.realized_pnl += pnl;
        if pnl < 0.0 && pnl.abs() > self.max_drawdown {
            self.max_drawdown = pnl.abs();
        }
        if daily_max_loss > 0.0 && self.realized_pnl < -daily_max_loss {
            self.breaker_tripped = true;
        }
    }

    /// Reset for `date`. Returns false (and does nothing) when already reset
    /// for that date, so re-entering the boundary minute is harmless.
    pub fn reset_for(&mut self, date: NaiveDate) -> bool {
        if self.last_reset_date == Some(date) {
            return false;
        }
        *self = DailyStats {
            last_reset_date: Some(date),
            ..DailyStats::default()
        };
        true
    }
}

/// Whether the engine loop is accepting market data and trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Running => write!(f, "running"),
        }
    }
}

/// Result of a control command, relayed back to the API caller.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub ok: bool,
    pub message: String,
}

impl CommandOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { ok: true, message: message.into() }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { ok: false, message: message.into() }
    }
}

/// Commands sent to the engine via the command channel. Each carries a
/// oneshot responder so the control surface can report the outcome.
#[derive(Debug)]
pub enum EngineCommand {
    Start { reply: oneshot::Sender<CommandOutcome> },
    Stop { reply: oneshot::Sender<CommandOutcome> },
    SquareOff { reply: oneshot::Sender<CommandOutcome> },
    SquareOffStrategy { strategy_id: String, reply: oneshot::Sender<CommandOutcome> },
}

/// Per-instance activity snapshot exposed for observability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceActivity {
    pub strategy_id: String,
    pub strategy_name: String,
    pub active: bool,
    pub mode: Option<TradingMode>,
    pub has_position: bool,
    pub last_eval_time: Option<DateTime<Utc>>,
    pub last_decision: Option<String>,
    pub last_action: Option<String>,
    pub last_action_time: Option<DateTime<Utc>>,
    pub last_action_reason: Option<String>,
}

/// ~1 Hz state broadcast consumed by the dashboard WebSocket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub index_ltp: f64,
    pub signal_status: String,
    pub supertrend_value: f64,
    pub htf_signal_status: String,
    pub htf_supertrend_value: f64,
    pub position: Option<Position>,
    pub entry_price: f64,
    pub current_option_ltp: f64,
    pub trailing_stop: Option<f64>,
    pub daily_pnl: f64,
    pub daily_trades: u32,
    pub daily_max_drawdown: f64,
    pub breaker_tripped: bool,
    pub is_running: bool,
    pub mode: Option<TradingMode>,
    pub selected_index: String,
    pub candle_interval: u32,
    pub instances: Vec<InstanceActivity>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_stats_breaker_trips_below_limit() {
        let mut stats = DailyStats::default();
        stats.record_close(-1500.0, 2000.0);
        assert!(!stats.breaker_tripped);
        stats.record_close(-600.0, 2000.0);
        assert!(stats.breaker_tripped);
        assert!((stats.realized_pnl + 2100.0).abs() < 1e-9);
    }

    #[test]
    fn daily_stats_breaker_disabled_when_limit_zero() {
        let mut stats = DailyStats::default();
        stats.record_close(-50_000.0, 0.0);
        assert!(!stats.breaker_tripped);
    }

    #[test]
    fn daily_reset_is_idempotent_within_one_date() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let mut stats = DailyStats {
            trade_count: 4,
            realized_pnl: -900.0,
            breaker_tripped: true,
            ..DailyStats::default()
        };
        assert!(stats.reset_for(date));
        assert_eq!(stats.trade_count, 0);
        assert!(!stats.breaker_tripped);

        stats.trade_count = 2;
        // Same boundary again: counters must survive.
        assert!(!stats.reset_for(date));
        assert_eq!(stats.trade_count, 2);
    }

    #[test]
    fn max_drawdown_tracks_worst_single_loss() {
        let mut stats = DailyStats::default();
        stats.record_close(-300.0, 0.0);
        stats.record_close(150.0, 0.0);
        stats.record_close(-700.0, 0.0);
        assert!((stats.max_drawdown - 700.0).abs() < 1e-9);
    }
}
