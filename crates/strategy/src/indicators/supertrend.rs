use common::SignalDirection;

/// Number of candles (and ATR/band entries) retained. Capping only discards
/// old history; the ATR and band recursions always use the latest entries,
/// so trimming never changes subsequent values.
const MAX_HISTORY: usize = 100;

/// Incremental SuperTrend indicator.
///
/// Bands are sized by a Wilder-smoothed ATR and only ever tighten toward
/// price ("sticky" final bands). Direction flips to -1 when the close drops
/// below the final lower band and back to +1 when it rises above the final
/// upper band.
#[derive(Debug, Clone)]
pub struct SuperTrend {
    period: usize,
    multiplier: f64,
    candles: Vec<Ohlc>,
    atr_values: Vec<f64>,
    bands: Vec<BandState>,
}

#[derive(Debug, Clone, Copy)]
struct Ohlc {
    high: f64,
    low: f64,
    close: f64,
}

#[derive(Debug, Clone, Copy)]
struct BandState {
    upper: f64,
    lower: f64,
    direction: i8,
}

/// One computed SuperTrend step.
#[derive(Debug, Clone, Copy)]
pub struct SuperTrendOutput {
    /// The plotted line: final lower band while bullish, final upper while
    /// bearish.
    pub value: f64,
    /// +1 bullish, -1 bearish.
    pub direction: i8,
    pub signal: SignalDirection,
}

impl SuperTrend {
    pub fn new(period: usize, multiplier: f64) -> Self {
        assert!(period >= 2, "SuperTrend period must be >= 2");
        assert!(multiplier > 0.0, "SuperTrend multiplier must be positive");
        Self {
            period,
            multiplier,
            candles: Vec::new(),
            atr_values: Vec::new(),
            bands: Vec::new(),
        }
    }

    /// Current direction. `None` until `period` candles have accumulated.
    pub fn direction(&self) -> Option<i8> {
        self.bands.last().map(|b| b.direction)
    }

    pub fn last_value(&self) -> Option<f64> {
        self.bands
            .last()
            .map(|b| if b.direction == 1 { b.lower } else { b.upper })
    }

    pub fn reset(&mut self) {
        self.candles.clear();
        self.atr_values.clear();
        self.bands.clear();
    }

    fn true_range(curr: &Ohlc, prev_close: Option<f64>) -> f64 {
        let range = curr.high - curr.low;
        match prev_close {
            Some(pc) => range.max((curr.high - pc).abs()).max((curr.low - pc).abs()),
            None => range,
        }
    }

    /// Feed one closed candle. Returns `None` until `period` candles have
    /// accumulated.
    pub fn add_candle(&mut self, high: f64, low: f64, close: f64) -> Option<SuperTrendOutput> {
        self.candles.push(Ohlc { high, low, close });
        let n = self.candles.len();
        if n < self.period {
            return None;
        }

        let prev_close = (n > 1).then(|| self.candles[n - 2].close);
        let tr = Self::true_range(&self.candles[n - 1], prev_close);

        // First ATR is the simple mean of TR over the window; after that,
        // Wilder smoothing.
        let atr = if self.atr_values.is_empty() {
            let start = n.saturating_sub(self.period);
            let sum: f64 = (start..n)
                .map(|i| {
                    let pc = (i > 0).then(|| self.candles[i - 1].close);
                    Self::true_range(&self.candles[i], pc)
                })
                .sum();
            sum / self.period as f64
        } else {
            let prev_atr = *self.atr_values.last().expect("non-empty atr history");
            (prev_atr * (self.period as f64 - 1.0) + tr) / self.period as f64
        };
        self.atr_values.push(atr);

        let hl2 = (high + low) / 2.0;
        let basic_upper = hl2 + self.multiplier * atr;
        let basic_lower = hl2 - self.multiplier * atr;

        let (final_upper, final_lower, direction) = match self.bands.last() {
            None => {
                let direction = if close > basic_upper { 1 } else { -1 };
                (basic_upper, basic_lower, direction)
            }
            Some(prev) => {
                let prev_close = self.candles[n - 2].close;
                // Sticky rule: a band only moves toward price, unless the
                // previous close already broke through it.
                let final_lower = if basic_lower > prev.lower || prev_close < prev.lower {
                    basic_lower
                } else {
                    prev.lower
                };
                let final_upper = if basic_upper < prev.upper || prev_close > prev.upper {
                    basic_upper
                } else {
                    prev.upper
                };
                let direction = if prev.direction == 1 {
                    if close < final_lower { -1 } else { 1 }
                } else if close > final_upper {
                    1
                } else {
                    -1
                };
                (final_upper, final_lower, direction)
            }
        };

        self.bands.push(BandState { upper: final_upper, lower: final_lower, direction });

        if self.candles.len() > MAX_HISTORY {
            let excess = self.candles.len() - MAX_HISTORY;
            self.candles.drain(..excess);
            let excess = self.atr_values.len().saturating_sub(MAX_HISTORY);
            self.atr_values.drain(..excess);
            let excess = self.bands.len().saturating_sub(MAX_HISTORY);
            self.bands.drain(..excess);
        }

        let value = if direction == 1 { final_lower } else { final_upper };
        let signal = if direction == 1 { SignalDirection::Green } else { SignalDirection::Red };
        Some(SuperTrendOutput { value, direction, signal })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(st: &mut SuperTrend, closes: &[f64]) -> Vec<Option<SuperTrendOutput>> {
        closes
            .iter()
            .map(|&c| st.add_candle(c + 1.0, c - 1.0, c))
            .collect()
    }

    #[test]
    fn no_output_until_period_candles() {
        let mut st = SuperTrend::new(7, 4.0);
        for i in 0..6 {
            assert!(st.add_candle(101.0 + i as f64, 99.0, 100.0 + i as f64).is_none());
            assert!(st.direction().is_none());
        }
        assert!(st.add_candle(107.0, 105.0, 106.0).is_some());
        assert!(st.direction().is_some());
    }

    #[test]
    fn monotone_rally_locks_bullish_direction() {
        // Strictly rising closes: once price has cleared the upper band the
        // direction must become and stay +1.
        let mut st = SuperTrend::new(7, 1.0);
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 3.0).collect();
        let outputs = feed(&mut st, &closes);

        let directions: Vec<i8> = outputs.iter().flatten().map(|o| o.direction).collect();
        let first_green = directions
            .iter()
            .position(|&d| d == 1)
            .expect("rally must eventually flip bullish");
        assert!(
            directions[first_green..].iter().all(|&d| d == 1),
            "direction must stay +1 for a monotone rally: {directions:?}"
        );
    }

    #[test]
    fn crash_flips_bearish() {
        let mut st = SuperTrend::new(7, 1.0);
        let mut closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 2.0).collect();
        closes.extend((0..30).map(|i| 160.0 - i as f64 * 5.0));
        feed(&mut st, &closes);
        assert_eq!(st.direction(), Some(-1));
    }

    #[test]
    fn value_reports_active_band() {
        let mut st = SuperTrend::new(3, 2.0);
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 2.0).collect();
        let outputs = feed(&mut st, &closes);
        let last = outputs.last().unwrap().unwrap();
        // Bullish: the reported value is the lower band, below price.
        assert_eq!(last.direction, 1);
        assert!(last.value < *closes.last().unwrap());
    }

    #[test]
    fn history_is_capped_and_recursion_stays_continuous() {
        let mut st = SuperTrend::new(7, 4.0);
        let closes: Vec<f64> = (0..300).map(|i| 100.0 + ((i * 7) % 13) as f64).collect();

        let mut last_atr: Option<f64> = None;
        for &c in &closes {
            st.add_candle(c + 2.0, c - 2.0, c);
            if let Some(&atr) = st.atr_values.last() {
                // Wilder smoothing keeps consecutive ATR values within one
                // TR's reach of each other; a trim-induced reseed would jump.
                if let Some(prev) = last_atr {
                    let max_step = (4.0 + 2.0 * 12.0) / 7.0; // TR bound / period
                    assert!((atr - prev).abs() <= max_step + 1e-9);
                }
                last_atr = Some(atr);
            }
        }
        assert!(st.candles.len() <= MAX_HISTORY);
        assert!(st.atr_values.len() <= MAX_HISTORY);
        assert!(st.bands.len() <= MAX_HISTORY);
    }

    #[test]
    fn reset_clears_state() {
        let mut st = SuperTrend::new(3, 2.0);
        feed(&mut st, &[100.0, 101.0, 102.0, 103.0]);
        assert!(st.direction().is_some());
        st.reset();
        assert!(st.direction().is_none());
        assert!(st.last_value().is_none());
    }
}
