//! Stop-loss, target and position-sizing rules.
//!
//! These functions own no channels and place no orders: they mutate the
//! position's trailing state and report which protective exit (if any) fires.
//! The engine loop applies the result through the execution coordinator.

use tracing::{info, warn};

use common::config::EffectiveParams;
use common::{ExitReason, Position};

/// Advance the trailing-stop state for the current option price.
///
/// Phase 1: with an initial stop-loss distance configured and no stop armed
/// yet, arm `entry - initial` once. Phase 2: once profit has reached
/// `trail_start_profit`, ratchet the stop to
/// `entry + floor((highest - trail_start) / trail_step) * trail_step`,
/// adopting a candidate only when it is higher than the current stop.
/// Trailing as a whole is disabled while either trail parameter is 0.
pub fn update_trailing_stop(position: &mut Position, ltp: f64, params: &EffectiveParams) {
    if params.trail_start_profit == 0.0 || params.trail_step == 0.0 {
        return;
    }

    let profit_points = position.profit_points(ltp);
    if profit_points > position.highest_profit_points {
        position.highest_profit_points = profit_points;
    }

    if params.initial_stoploss > 0.0 && position.trailing_stop.is_none() {
        let stop = position.entry_price - params.initial_stoploss;
        position.trailing_stop = Some(stop);
        info!(stop, distance = params.initial_stoploss, "initial stop armed");
        return;
    }

    if profit_points < params.trail_start_profit {
        return;
    }

    let steps =
        ((position.highest_profit_points - params.trail_start_profit) / params.trail_step).floor();
    let candidate = position.entry_price + steps * params.trail_step;

    match position.trailing_stop {
        Some(current) if candidate <= current => {}
        _ => {
            let previous = position.trailing_stop;
            position.trailing_stop = Some(candidate);
            match previous {
                Some(old) => info!(from = old, to = candidate, profit = profit_points, "trailing stop ratcheted"),
                None => info!(stop = candidate, profit = profit_points, "trailing started"),
            }
        }
    }
}

/// Tick-level protective exit chain, highest frequency, strict priority:
/// daily loss cap, per-trade loss cap, target, trailing stop. The first
/// matching condition wins; none of these honor the minimum-hold window.
pub fn check_tick_exit(
    position: &mut Position,
    ltp: f64,
    daily_pnl: f64,
    daily_max_loss: f64,
    params: &EffectiveParams,
) -> Option<ExitReason> {
    let profit_points = position.profit_points(ltp);
    let pnl = position.pnl(ltp);

    if daily_max_loss > 0.0 && daily_pnl + pnl < -daily_max_loss {
        warn!(
            daily_pnl,
            trade_pnl = pnl,
            limit = -daily_max_loss,
            "daily max loss breached, forcing square-off"
        );
        return Some(ExitReason::DailyMaxLoss);
    }

    if params.max_loss_per_trade > 0.0 && pnl < -params.max_loss_per_trade {
        info!(loss = pnl.abs(), limit = params.max_loss_per_trade, "per-trade loss cap hit");
        return Some(ExitReason::MaxLossPerTrade);
    }

    if params.target_points > 0.0 && profit_points >= params.target_points {
        info!(profit = profit_points, target = params.target_points, "target hit");
        return Some(ExitReason::TargetHit);
    }

    update_trailing_stop(position, ltp, params);
    if let Some(stop) = position.trailing_stop {
        if ltp <= stop {
            info!(ltp, stop, "trailing stop hit");
            return Some(ExitReason::TrailingStopHit);
        }
    }

    None
}

/// Candle-close target/trailing check. Same conditions as the tick chain
/// minus the loss caps, which only run at tick cadence.
pub fn check_close_exit(
    position: &mut Position,
    ltp: f64,
    params: &EffectiveParams,
) -> Option<ExitReason> {
    let profit_points = position.profit_points(ltp);

    if params.target_points > 0.0 && profit_points >= params.target_points {
        info!(profit = profit_points, target = params.target_points, "target hit on close");
        return Some(ExitReason::TargetHit);
    }

    update_trailing_stop(position, ltp, params);
    if let Some(stop) = position.trailing_stop {
        if ltp <= stop {
            info!(ltp, stop, "trailing stop hit on close");
            return Some(ExitReason::TrailingStopHit);
        }
    }

    None
}

/// Quantity in units for a new position.
///
/// Default is `order_qty` lots. With a rupee risk budget and a nonzero
/// initial stop distance both configured, lots are cut to fit the budget:
/// `clamp(1, order_qty, floor(risk / (stop_points * lot_size)))`.
pub fn size_position(params: &EffectiveParams, lot_size: i64) -> i64 {
    let order_qty = params.order_qty.max(1) as i64;
    let lots = if params.risk_per_trade > 0.0 && params.initial_stoploss > 0.0 {
        let max_lots =
            (params.risk_per_trade / (params.initial_stoploss * lot_size as f64)).floor() as i64;
        let lots = max_lots.clamp(0, order_qty).max(1);
        if lots < order_qty {
            info!(
                lots,
                budget = params.risk_per_trade,
                stop_points = params.initial_stoploss,
                "lot count reduced to fit risk budget"
            );
        }
        lots
    } else {
        order_qty
    };
    lots * lot_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::config::{EngineConfig, InstanceOverrides};
    use common::{OptionType, TradingMode};

    fn position(entry: f64) -> Position {
        Position {
            trade_id: "T1".into(),
            index_name: "NIFTY".into(),
            option_type: OptionType::Ce,
            strike: 23_500,
            expiry: "2025-03-20".into(),
            security_id: "SIM_NIFTY_23500_CE".into(),
            qty: 75,
            mode: TradingMode::Paper,
            entry_price: entry,
            entry_time: Utc::now(),
            trailing_stop: None,
            highest_profit_points: 0.0,
        }
    }

    fn params(mutate: impl FnOnce(&mut EngineConfig)) -> EffectiveParams {
        let mut global = EngineConfig::default();
        mutate(&mut global);
        EffectiveParams::resolve(
            &global,
            &InstanceOverrides::default(),
            &InstanceOverrides::default(),
        )
    }

    #[test]
    fn step_ratchet_produces_documented_stop_sequence() {
        // Entry 100, no initial stop, trail starts at 10 points profit in
        // steps of 5: profits 12 -> 17 -> 23 give stops 100, 105, 110.
        let p = params(|c| {
            c.initial_stoploss = 0.0;
            c.trail_start_profit = 10.0;
            c.trail_step = 5.0;
        });
        let mut pos = position(100.0);
        assert!(pos.trailing_stop.is_none());

        let mut stops = Vec::new();
        for ltp in [112.0, 117.0, 123.0] {
            update_trailing_stop(&mut pos, ltp, &p);
            stops.push(pos.trailing_stop.unwrap());
        }
        assert_eq!(stops, vec![100.0, 105.0, 110.0]);
    }

    #[test]
    fn initial_stop_is_armed_once_before_trailing() {
        let p = params(|c| {
            c.initial_stoploss = 50.0;
            c.trail_start_profit = 10.0;
            c.trail_step = 5.0;
        });
        let mut pos = position(100.0);

        // First update arms the fixed stop and does nothing else.
        update_trailing_stop(&mut pos, 101.0, &p);
        assert_eq!(pos.trailing_stop, Some(50.0));

        // Once profit reaches trail start, the ratchet takes over.
        update_trailing_stop(&mut pos, 117.0, &p);
        assert_eq!(pos.trailing_stop, Some(105.0));
    }

    #[test]
    fn stop_is_never_loosened() {
        let p = params(|c| {
            c.initial_stoploss = 0.0;
            c.trail_start_profit = 10.0;
            c.trail_step = 5.0;
        });
        let mut pos = position(100.0);
        update_trailing_stop(&mut pos, 123.0, &p);
        assert_eq!(pos.trailing_stop, Some(110.0));

        // Price falls back; highest profit is sticky, stop must not move down.
        update_trailing_stop(&mut pos, 111.0, &p);
        assert_eq!(pos.trailing_stop, Some(110.0));
    }

    #[test]
    fn trailing_disabled_when_either_parameter_is_zero() {
        let p = params(|c| {
            c.initial_stoploss = 50.0;
            c.trail_start_profit = 0.0;
            c.trail_step = 5.0;
        });
        let mut pos = position(100.0);
        update_trailing_stop(&mut pos, 130.0, &p);
        assert!(pos.trailing_stop.is_none());
    }

    #[test]
    fn tick_exit_priority_daily_loss_first() {
        let p = params(|c| {
            c.max_loss_per_trade = 100.0;
            c.target_points = 10.0;
            c.daily_max_loss = 2000.0;
        });
        let mut pos = position(100.0);
        // pnl = -10 * 75 = -750; daily -1500 + -750 breaches -2000, and the
        // per-trade cap is also breached. Daily wins.
        let reason = check_tick_exit(&mut pos, 90.0, -1500.0, 2000.0, &p);
        assert_eq!(reason, Some(ExitReason::DailyMaxLoss));
    }

    #[test]
    fn tick_exit_per_trade_cap_before_target() {
        let p = params(|c| {
            c.max_loss_per_trade = 100.0;
            c.target_points = 10.0;
        });
        let mut pos = position(100.0);
        let reason = check_tick_exit(&mut pos, 98.0, 0.0, 0.0, &p);
        assert_eq!(reason, Some(ExitReason::MaxLossPerTrade));
    }

    #[test]
    fn tick_exit_target() {
        let p = params(|c| {
            c.target_points = 10.0;
            c.max_loss_per_trade = 0.0;
        });
        let mut pos = position(100.0);
        let reason = check_tick_exit(&mut pos, 110.0, 0.0, 0.0, &p);
        assert_eq!(reason, Some(ExitReason::TargetHit));
    }

    #[test]
    fn tick_exit_trailing_stop_breach() {
        let p = params(|c| {
            c.initial_stoploss = 0.0;
            c.trail_start_profit = 10.0;
            c.trail_step = 5.0;
            c.target_points = 0.0;
        });
        let mut pos = position(100.0);
        // Run profit up to arm the stop at 110...
        assert_eq!(check_tick_exit(&mut pos, 123.0, 0.0, 0.0, &p), None);
        assert_eq!(pos.trailing_stop, Some(110.0));
        // ...then a drop through the stop exits.
        let reason = check_tick_exit(&mut pos, 109.0, 0.0, 0.0, &p);
        assert_eq!(reason, Some(ExitReason::TrailingStopHit));
    }

    #[test]
    fn close_exit_checks_target_then_trailing_only() {
        let p = params(|c| {
            c.target_points = 20.0;
            c.max_loss_per_trade = 100.0; // must NOT fire at close cadence
        });
        let mut pos = position(100.0);
        assert_eq!(check_close_exit(&mut pos, 95.0, &p), None);
        assert_eq!(check_close_exit(&mut pos, 121.0, &p), Some(ExitReason::TargetHit));
    }

    #[test]
    fn default_sizing_is_lots_times_lot_size() {
        let p = params(|c| {
            c.order_qty = 2;
            c.risk_per_trade = 0.0;
        });
        assert_eq!(size_position(&p, 75), 150);
    }

    #[test]
    fn risk_budget_cuts_lots_with_floor_of_one() {
        // budget 5000, stop 50 pts, lot 75 => floor(5000/3750) = 1 lot
        let p = params(|c| {
            c.order_qty = 3;
            c.risk_per_trade = 5000.0;
            c.initial_stoploss = 50.0;
        });
        assert_eq!(size_position(&p, 75), 75);

        // A tiny budget still trades one lot.
        let p = params(|c| {
            c.order_qty = 3;
            c.risk_per_trade = 100.0;
            c.initial_stoploss = 50.0;
        });
        assert_eq!(size_position(&p, 75), 75);

        // A huge budget is capped at order_qty lots.
        let p = params(|c| {
            c.order_qty = 3;
            c.risk_per_trade = 1_000_000.0;
            c.initial_stoploss = 50.0;
        });
        assert_eq!(size_position(&p, 75), 225);
    }
}
