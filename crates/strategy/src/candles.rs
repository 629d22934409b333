use chrono::{DateTime, TimeZone, Utc};

use common::Candle;

/// Buckets a price-sample stream into fixed-length OHLC candles.
///
/// The open bucket is keyed to `floor(timestamp / interval) * interval`.
/// Closing is wall-clock driven via `poll_close`, independent of sample
/// arrival; a bucket that saw no samples produces no candle at all.
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    interval_secs: u32,
    bucket: Option<Bucket>,
}

#[derive(Debug, Clone)]
struct Bucket {
    start: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

impl CandleAggregator {
    pub fn new(interval_secs: u32) -> Self {
        Self { interval_secs, bucket: None }
    }

    pub fn interval_secs(&self) -> u32 {
        self.interval_secs
    }

    fn aligned_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let interval = self.interval_secs as i64;
        let aligned = at.timestamp().div_euclid(interval) * interval;
        Utc.timestamp_opt(aligned, 0).single().unwrap_or(at)
    }

    /// Feed one price sample. Initializes the open on the bucket's first
    /// sample, then tracks high/low/close.
    pub fn update(&mut self, at: DateTime<Utc>, price: f64) {
        match &mut self.bucket {
            Some(bucket) => {
                if price > bucket.high {
                    bucket.high = price;
                }
                if price < bucket.low {
                    bucket.low = price;
                }
                bucket.close = price;
            }
            None => {
                self.bucket = Some(Bucket {
                    start: self.aligned_start(at),
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                });
            }
        }
    }

    /// Close the open bucket once the interval has elapsed on the wall
    /// clock. Emits exactly one immutable candle and resets bucket state.
    pub fn poll_close(&mut self, now: DateTime<Utc>) -> Option<Candle> {
        let bucket = self.bucket.as_ref()?;
        let elapsed = (now - bucket.start).num_seconds();
        if elapsed < self.interval_secs as i64 {
            return None;
        }
        let bucket = self.bucket.take()?;
        Some(Candle {
            start: bucket.start,
            end: bucket.start + chrono::Duration::seconds(self.interval_secs as i64),
            open: bucket.open,
            high: bucket.high,
            low: bucket.low,
            close: bucket.close,
        })
    }

    /// Discard the open bucket (used after a tick-level exit so the next
    /// entry decision starts from a fresh candle).
    pub fn reset(&mut self) {
        self.bucket = None;
    }
}
