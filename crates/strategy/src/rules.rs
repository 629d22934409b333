//! Entry/exit rule evaluation, as pure decision functions.
//!
//! All the state these rules need is passed in explicitly; placing orders,
//! mutating the ledger and bookkeeping stay with the caller. The strategy
//! variant is a closed enum chosen at configuration time — no per-tick
//! string dispatch.

use common::config::StrategyKind;
use common::{ExitReason, OptionType, SignalDirection};

/// State of the higher-timeframe alignment filter for this evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtfFilter {
    /// Filter disabled, or execution interval is not sub-minute.
    NotApplicable,
    /// HTF SuperTrend has no established direction yet.
    NotReady,
    /// Established HTF direction (+1 / -1).
    Direction(i8),
}

/// Why an entry was skipped. Every gate failure is reported, never silent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntrySkip {
    NoSignal,
    NotAFlip,
    SameSideAsLastTrade,
    HtfNotReady,
    HtfMismatch,
    MacdNotReady,
    MacdDisagrees,
    WeakTrend { adx: f64 },
}

impl std::fmt::Display for EntrySkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntrySkip::NoSignal => write!(f, "no signal"),
            EntrySkip::NotAFlip => write!(f, "waiting for signal flip"),
            EntrySkip::SameSideAsLastTrade => write!(f, "same side as last trade"),
            EntrySkip::HtfNotReady => write!(f, "HTF SuperTrend not ready"),
            EntrySkip::HtfMismatch => write!(f, "HTF direction mismatch"),
            EntrySkip::MacdNotReady => write!(f, "MACD not ready"),
            EntrySkip::MacdDisagrees => write!(f, "MACD disagrees"),
            EntrySkip::WeakTrend { adx } => write!(f, "weak trend (ADX {adx:.1})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryDecision {
    Enter { direction: SignalDirection, option_type: OptionType },
    Skip(EntrySkip),
}

/// Inputs to one entry evaluation, gathered by the caller at candle close.
#[derive(Debug, Clone)]
pub struct EntryInputs {
    pub kind: StrategyKind,
    /// This candle's indicator signal, if any.
    pub signal: Option<SignalDirection>,
    /// Whether the signal differs from the immediately preceding one.
    pub flipped: bool,
    pub trade_only_on_flip: bool,
    /// Direction of the last trade, set when a position closes; the next
    /// entry must be on the opposite side.
    pub last_executed: Option<SignalDirection>,
    pub htf: HtfFilter,
    pub macd_confirmation_enabled: bool,
    pub macd_last: Option<f64>,
    pub macd_signal_line: Option<f64>,
    pub adx_value: Option<f64>,
    pub adx_threshold: f64,
}

/// Evaluate the conjunctive entry gates in fixed order. Only valid from a
/// flat state at candle close; the first failing gate short-circuits.
pub fn decide_entry(inputs: &EntryInputs) -> EntryDecision {
    let Some(signal) = inputs.signal else {
        return EntryDecision::Skip(EntrySkip::NoSignal);
    };

    if inputs.trade_only_on_flip && !inputs.flipped {
        return EntryDecision::Skip(EntrySkip::NotAFlip);
    }

    // Re-entering the same side directly after an exit is blocked until the
    // opposite signal has appeared.
    if inputs.last_executed == Some(signal) {
        return EntryDecision::Skip(EntrySkip::SameSideAsLastTrade);
    }

    match inputs.htf {
        HtfFilter::NotApplicable => {}
        HtfFilter::NotReady => return EntryDecision::Skip(EntrySkip::HtfNotReady),
        HtfFilter::Direction(dir) => {
            if dir != signal.required_direction() {
                return EntryDecision::Skip(EntrySkip::HtfMismatch);
            }
        }
    }

    match inputs.kind {
        StrategyKind::SupertrendMacd => {
            if inputs.macd_confirmation_enabled {
                let (Some(macd), Some(signal_line)) =
                    (inputs.macd_last, inputs.macd_signal_line)
                else {
                    return EntryDecision::Skip(EntrySkip::MacdNotReady);
                };
                let agrees = match signal {
                    SignalDirection::Green => macd > signal_line,
                    SignalDirection::Red => macd < signal_line,
                };
                if !agrees {
                    return EntryDecision::Skip(EntrySkip::MacdDisagrees);
                }
            }
        }
        StrategyKind::SupertrendAdx => {
            if inputs.adx_threshold > 0.0 {
                match inputs.adx_value {
                    Some(adx) if adx > inputs.adx_threshold => {}
                    Some(adx) => return EntryDecision::Skip(EntrySkip::WeakTrend { adx }),
                    None => return EntryDecision::Skip(EntrySkip::WeakTrend { adx: 0.0 }),
                }
            }
        }
    }

    EntryDecision::Enter { direction: signal, option_type: signal.option_type() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    Exit { reason: ExitReason },
    /// A reversal was detected but the minimum-hold window is still open.
    Suppressed,
    Hold,
}

/// Candle-close (strategic) exit: leave when the indicator direction turns
/// against the held side. Min-hold only suppresses this exit; the tick-level
/// protective exits in `risk` are never suppressed.
pub fn decide_exit(
    position_type: OptionType,
    st_direction: Option<i8>,
    min_hold_active: bool,
) -> ExitDecision {
    let Some(direction) = st_direction else {
        return ExitDecision::Hold;
    };
    let reversed = matches!(
        (position_type, direction),
        (OptionType::Ce, -1) | (OptionType::Pe, 1)
    );
    if !reversed {
        return ExitDecision::Hold;
    }
    if min_hold_active {
        return ExitDecision::Suppressed;
    }
    ExitDecision::Exit { reason: ExitReason::SuperTrendReversal }
}
