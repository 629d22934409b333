pub mod candles;
pub mod indicators;
pub mod instance;
pub mod rules;

pub use candles::CandleAggregator;
pub use indicators::{Adx, Macd, MacdSignal, SuperTrend, SuperTrendOutput};
pub use instance::{DecisionState, IndicatorEval, StrategyInstance};
pub use rules::{decide_entry, decide_exit, EntryDecision, EntryInputs, EntrySkip, ExitDecision, HtfFilter};
