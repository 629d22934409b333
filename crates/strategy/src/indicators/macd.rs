/// MACD (Moving Average Convergence/Divergence), computed incrementally.
///
/// MACD line = EMA(fast) − EMA(slow) over closes; signal line = EMA of the
/// MACD series itself. Each EMA is seeded with the simple mean of its first
/// `period` inputs, then updated recursively with `alpha = 2 / (period + 1)`.
/// Consumers react to the crossover event, not the raw line value.
#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    prev_macd: Option<f64>,
    prev_signal_line: Option<f64>,
    last_macd: Option<f64>,
    last_signal_line: Option<f64>,
}

/// The qualitative result of one MACD step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdSignal {
    Bullish, // MACD crossed above the signal line
    Bearish, // MACD crossed below the signal line
    Neutral, // no crossover on this bar
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        assert!(fast < slow, "MACD fast period must be less than slow period");
        Self {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
            prev_macd: None,
            prev_signal_line: None,
            last_macd: None,
            last_signal_line: None,
        }
    }

    pub fn last_macd(&self) -> Option<f64> {
        self.last_macd
    }

    pub fn last_signal_line(&self) -> Option<f64> {
        self.last_signal_line
    }

    pub fn reset(&mut self) {
        let (fast, slow, signal) = (self.fast.period, self.slow.period, self.signal.period);
        *self = Macd::new(fast, slow, signal);
    }

    /// Feed one closing price. Returns `None` until both EMAs and the signal
    /// EMA are seeded; afterwards reports the crossover state of this bar.
    pub fn add_close(&mut self, close: f64) -> Option<MacdSignal> {
        let fast = self.fast.update(close);
        let slow = self.slow.update(close);
        let (Some(fast), Some(slow)) = (fast, slow) else {
            return None;
        };

        let macd = fast - slow;
        let signal_line = self.signal.update(macd);

        self.prev_macd = self.last_macd;
        self.prev_signal_line = self.last_signal_line;
        self.last_macd = Some(macd);
        self.last_signal_line = signal_line;

        let (sig, prev_macd, prev_sig) =
            match (signal_line, self.prev_macd, self.prev_signal_line) {
                (Some(s), Some(pm), Some(ps)) => (s, pm, ps),
                _ => return None,
            };

        if prev_macd <= prev_sig && macd > sig {
            Some(MacdSignal::Bullish)
        } else if prev_macd >= prev_sig && macd < sig {
            Some(MacdSignal::Bearish)
        } else {
            Some(MacdSignal::Neutral)
        }
    }
}

/// Running EMA: collects `period` seed values, averages them, then updates
/// recursively. Constant memory.
#[derive(Debug, Clone)]
struct Ema {
    period: usize,
    seed: Vec<f64>,
    value: Option<f64>,
}

impl Ema {
    fn new(period: usize) -> Self {
        assert!(period >= 1, "EMA period must be >= 1");
        Self { period, seed: Vec::with_capacity(period), value: None }
    }

    fn update(&mut self, input: f64) -> Option<f64> {
        match self.value {
            Some(prev) => {
                let alpha = 2.0 / (self.period as f64 + 1.0);
                let next = input * alpha + prev * (1.0 - alpha);
                self.value = Some(next);
            }
            None => {
                self.seed.push(input);
                if self.seed.len() == self.period {
                    let mean = self.seed.iter().sum::<f64>() / self.period as f64;
                    self.value = Some(mean);
                    self.seed.clear();
                    self.seed.shrink_to_fit();
                }
            }
        }
        self.value
    }
}
