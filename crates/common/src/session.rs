//! Market-session clock for NSE/BSE index options, in IST.
//!
//! All boundaries are evaluated against a caller-supplied UTC instant so the
//! engine loop (and tests) control time explicitly.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};

const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

pub fn to_ist(now: DateTime<Utc>) -> DateTime<FixedOffset> {
    now.with_timezone(&FixedOffset::east_opt(IST_OFFSET_SECS).expect("valid IST offset"))
}

pub fn ist_date(now: DateTime<Utc>) -> NaiveDate {
    to_ist(now).date_naive()
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).expect("valid time")
}

fn is_weekday(now: DateTime<Utc>) -> bool {
    !matches!(to_ist(now).weekday(), Weekday::Sat | Weekday::Sun)
}

/// Exchange hours: 09:15–15:30 IST, Monday through Friday.
pub fn is_market_open(now: DateTime<Utc>) -> bool {
    let t = to_ist(now).time();
    is_weekday(now) && t >= hm(9, 15) && t <= hm(15, 30)
}

/// New entries are only allowed 09:25–15:10 IST, a narrower window than
/// market hours: skip the volatile open and stop initiating near the close.
pub fn within_entry_window(now: DateTime<Utc>) -> bool {
    let t = to_ist(now).time();
    is_weekday(now) && t >= hm(9, 25) && t <= hm(15, 10)
}

/// Any open position is force-closed from 15:25 IST.
pub fn past_squareoff_cutoff(now: DateTime<Utc>) -> bool {
    to_ist(now).time() >= hm(15, 25)
}

/// Daily counters reset once the 09:15 IST boundary has been crossed.
/// Idempotence is the caller's job via `DailyStats::reset_for(ist_date(..))`.
pub fn past_daily_reset_boundary(now: DateTime<Utc>) -> bool {
    to_ist(now).time() >= hm(9, 15)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc_for_ist(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        // IST = UTC + 5:30
        let ist = FixedOffset::east_opt(IST_OFFSET_SECS)
            .unwrap()
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap();
        ist.with_timezone(&Utc)
    }

    #[test]
    fn market_open_window() {
        // 2025-03-14 is a Friday
        assert!(!is_market_open(utc_for_ist(2025, 3, 14, 9, 14)));
        assert!(is_market_open(utc_for_ist(2025, 3, 14, 9, 15)));
        assert!(is_market_open(utc_for_ist(2025, 3, 14, 15, 30)));
        assert!(!is_market_open(utc_for_ist(2025, 3, 14, 15, 31)));
    }

    #[test]
    fn weekend_is_closed() {
        // 2025-03-15 is a Saturday
        assert!(!is_market_open(utc_for_ist(2025, 3, 15, 10, 0)));
        assert!(!within_entry_window(utc_for_ist(2025, 3, 15, 10, 0)));
    }

    #[test]
    fn entry_window_is_narrower_than_market_hours() {
        assert!(is_market_open(utc_for_ist(2025, 3, 14, 9, 20)));
        assert!(!within_entry_window(utc_for_ist(2025, 3, 14, 9, 20)));
        assert!(within_entry_window(utc_for_ist(2025, 3, 14, 9, 25)));
        assert!(!within_entry_window(utc_for_ist(2025, 3, 14, 15, 11)));
    }

    #[test]
    fn squareoff_cutoff() {
        assert!(!past_squareoff_cutoff(utc_for_ist(2025, 3, 14, 15, 24)));
        assert!(past_squareoff_cutoff(utc_for_ist(2025, 3, 14, 15, 25)));
    }
}
