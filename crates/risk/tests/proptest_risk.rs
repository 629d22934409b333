use chrono::Utc;
use proptest::prelude::*;

use common::config::{EngineConfig, InstanceOverrides};
use common::{DailyStats, OptionType, Position, TradingMode};
use risk::{check_tick_exit, size_position, update_trailing_stop};

fn make_position(entry_price: f64) -> Position {
    Position {
        trade_id: "p1".into(),
        index_name: "NIFTY".into(),
        option_type: OptionType::Ce,
        strike: 23_500,
        expiry: "2025-03-20".into(),
        security_id: "SIM_NIFTY_23500_CE".into(),
        qty: 75,
        mode: TradingMode::Paper,
        entry_price,
        entry_time: Utc::now(),
        trailing_stop: None,
        highest_profit_points: 0.0,
    }
}

fn resolved(mutate: impl FnOnce(&mut EngineConfig)) -> common::config::EffectiveParams {
    let mut global = EngineConfig::default();
    mutate(&mut global);
    common::config::EffectiveParams::resolve(
        &global,
        &InstanceOverrides::default(),
        &InstanceOverrides::default(),
    )
}

proptest! {
    /// The trailing stop, once armed, never moves down — regardless of the
    /// price path driven through it.
    #[test]
    fn trailing_stop_is_monotone_nondecreasing(
        entry in 50.0f64..500.0,
        ticks in proptest::collection::vec(-30.0f64..30.0, 1..200),
    ) {
        let params = resolved(|c| {
            c.initial_stoploss = 20.0;
            c.trail_start_profit = 10.0;
            c.trail_step = 5.0;
        });
        let mut pos = make_position(entry);
        let mut last_stop: Option<f64> = None;

        let mut ltp = entry;
        for delta in ticks {
            ltp = (ltp + delta).max(0.05);
            update_trailing_stop(&mut pos, ltp, &params);
            if let (Some(prev), Some(curr)) = (last_stop, pos.trailing_stop) {
                prop_assert!(curr >= prev, "stop loosened: {prev} -> {curr}");
            }
            if pos.trailing_stop.is_some() {
                last_stop = pos.trailing_stop;
            }
        }
    }

    /// Exit evaluation must never panic on extreme price inputs, and a
    /// breached daily limit always wins over every other exit reason.
    #[test]
    fn tick_exit_never_panics_and_daily_cap_dominates(
        entry in 0.0001f64..1_000_000.0,
        ltp in 0.0001f64..1_000_000.0,
        daily_pnl in -100_000.0f64..0.0,
    ) {
        let params = resolved(|c| {
            c.max_loss_per_trade = 500.0;
            c.target_points = 40.0;
            c.trail_start_profit = 10.0;
            c.trail_step = 5.0;
        });
        let mut pos = make_position(entry);
        let reason = check_tick_exit(&mut pos, ltp, daily_pnl, 2000.0, &params);

        let pnl = pos.pnl(ltp);
        if daily_pnl + pnl < -2000.0 {
            prop_assert_eq!(reason, Some(common::ExitReason::DailyMaxLoss));
        }
    }

    /// Risk-based sizing always yields between 1 and order_qty lots.
    #[test]
    fn sizing_stays_within_lot_bounds(
        budget in 0.0f64..1_000_000.0,
        stop_points in 1.0f64..500.0,
        order_qty in 1u32..10,
    ) {
        let params = resolved(|c| {
            c.order_qty = order_qty;
            c.risk_per_trade = budget;
            c.initial_stoploss = stop_points;
        });
        let lot_size = 75;
        let qty = size_position(&params, lot_size);
        prop_assert_eq!(qty % lot_size, 0);
        let lots = qty / lot_size;
        prop_assert!(lots >= 1 && lots <= order_qty as i64);
    }

    /// Folding random realized PnLs into DailyStats keeps the breaker latched
    /// once tripped until the next daily reset.
    #[test]
    fn breaker_latches_until_reset(
        pnls in proptest::collection::vec(-800.0f64..800.0, 1..60),
    ) {
        let mut stats = DailyStats::default();
        let mut tripped_seen = false;
        for pnl in pnls {
            stats.record_close(pnl, 2000.0);
            if stats.breaker_tripped {
                tripped_seen = true;
            }
            if tripped_seen {
                prop_assert!(stats.breaker_tripped, "breaker must latch");
            }
        }
        if tripped_seen {
            let date = chrono::NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
            prop_assert!(stats.reset_for(date));
            prop_assert!(!stats.breaker_tripped);
        }
    }
}
