/// Trend-strength gate in the spirit of ADX.
///
/// This is deliberately NOT the canonical Wilder ADX: it scores the span of
/// the recent high/low range against the average true range over the same
/// window, scaled to a 0–100-like magnitude. Entry thresholds downstream
/// were tuned against this formula, so it must be preserved as-is. The value
/// gates entries on strength only; it carries no direction.
#[derive(Debug, Clone)]
pub struct Adx {
    period: usize,
    highs: Vec<f64>,
    lows: Vec<f64>,
    closes: Vec<f64>,
    last: Option<f64>,
}

const MAX_HISTORY: usize = 100;

impl Adx {
    pub fn new(period: usize) -> Self {
        assert!(period >= 2, "ADX period must be >= 2");
        Self {
            period,
            highs: Vec::new(),
            lows: Vec::new(),
            closes: Vec::new(),
            last: None,
        }
    }

    pub fn last_value(&self) -> Option<f64> {
        self.last
    }

    pub fn reset(&mut self) {
        self.highs.clear();
        self.lows.clear();
        self.closes.clear();
        self.last = None;
    }

    /// Feed one closed candle. Returns `None` until `period + 1` candles have
    /// accumulated; reports a neutral 50 until a full `2 * period` window is
    /// available for the range/ATR ratio.
    pub fn add_candle(&mut self, high: f64, low: f64, close: f64) -> Option<f64> {
        self.highs.push(high);
        self.lows.push(low);
        self.closes.push(close);

        let n = self.closes.len();
        if n < self.period + 1 {
            return None;
        }

        let adx = if n >= self.period * 2 {
            let window = n - self.period..n;
            let recent_high = self.highs[window.clone()]
                .iter()
                .cloned()
                .fold(f64::MIN, f64::max);
            let recent_low = self.lows[window.clone()]
                .iter()
                .cloned()
                .fold(f64::MAX, f64::min);

            let tr_sum: f64 = window
                .map(|i| {
                    let base = self.highs[i] - self.lows[i];
                    if i > 0 {
                        base.max((self.highs[i] - self.closes[i - 1]).abs())
                            .max((self.lows[i] - self.closes[i - 1]).abs())
                    } else {
                        base
                    }
                })
                .sum();
            let avg_tr = tr_sum / self.period as f64;

            (recent_high - recent_low).abs() / (avg_tr + 0.001) * 100.0
        } else {
            50.0
        };

        if self.closes.len() > MAX_HISTORY {
            let excess = self.closes.len() - MAX_HISTORY;
            self.highs.drain(..excess);
            self.lows.drain(..excess);
            self.closes.drain(..excess);
        }

        self.last = Some(adx);
        Some(adx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_none_before_period_plus_one() {
        let mut adx = Adx::new(14);
        for i in 0..14 {
            assert!(adx.add_candle(101.0, 99.0, 100.0 + i as f64 * 0.1).is_none());
        }
        assert!(adx.add_candle(101.0, 99.0, 100.0).is_some());
    }

    #[test]
    fn neutral_50_until_full_double_window() {
        let mut adx = Adx::new(5);
        let mut values = Vec::new();
        for i in 0..9 {
            if let Some(v) = adx.add_candle(101.0 + i as f64, 99.0 + i as f64, 100.0 + i as f64) {
                values.push(v);
            }
        }
        // candles 6..=9 produce output, all before the 2*period window fills
        assert!(!values.is_empty());
        assert!(values.iter().all(|&v| (v - 50.0).abs() < 1e-12));
    }

    #[test]
    fn trending_market_scores_higher_than_flat() {
        let mut trending = Adx::new(5);
        let mut flat = Adx::new(5);

        for i in 0..20 {
            let base = 100.0 + i as f64 * 5.0;
            trending.add_candle(base + 1.0, base - 1.0, base);
            flat.add_candle(101.0, 99.0, 100.0);
        }

        let t = trending.last_value().unwrap();
        let f = flat.last_value().unwrap();
        assert!(t > f, "trend {t} should out-score chop {f}");
    }

    #[test]
    fn formula_matches_range_over_atr_definition() {
        let mut adx = Adx::new(5);
        for i in 0..20 {
            // steady oscillation: span 3.0 over the window, TR 2.0 per candle
            let c = if i % 2 == 0 { 100.5 } else { 99.5 };
            adx.add_candle(c + 1.0, c - 1.0, c);
        }
        let expected = 3.0 / (2.0 + 0.001) * 100.0;
        assert!((adx.last_value().unwrap() - expected).abs() < 1e-9);
    }
}
