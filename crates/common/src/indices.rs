use chrono::Weekday;

/// Contract metadata for a tradeable index.
#[derive(Debug, Clone, Copy)]
pub struct IndexSpec {
    pub name: &'static str,
    pub lot_size: i64,
    pub strike_interval: i64,
    /// Weekday the weekly series expires on.
    pub expiry_day: Weekday,
}

pub const INDICES: &[IndexSpec] = &[
    IndexSpec { name: "NIFTY", lot_size: 75, strike_interval: 50, expiry_day: Weekday::Thu },
    IndexSpec { name: "BANKNIFTY", lot_size: 35, strike_interval: 100, expiry_day: Weekday::Thu },
    IndexSpec { name: "FINNIFTY", lot_size: 65, strike_interval: 50, expiry_day: Weekday::Tue },
    IndexSpec { name: "MIDCPNIFTY", lot_size: 140, strike_interval: 25, expiry_day: Weekday::Mon },
    IndexSpec { name: "SENSEX", lot_size: 20, strike_interval: 100, expiry_day: Weekday::Tue },
];

pub fn index_spec(name: &str) -> Option<&'static IndexSpec> {
    INDICES.iter().find(|s| s.name.eq_ignore_ascii_case(name))
}

pub fn is_valid_index(name: &str) -> bool {
    index_spec(name).is_some()
}

/// Round an underlying price to the nearest strike for the instrument.
pub fn round_to_strike(price: f64, spec: &IndexSpec) -> i64 {
    let interval = spec.strike_interval as f64;
    ((price / interval).round() * interval) as i64
}
