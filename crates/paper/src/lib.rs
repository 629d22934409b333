use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Duration, Timelike, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::indices::index_spec;
use common::session::to_ist;
use common::{
    Error, ExecutionVenue, OptionType, OrderConfirmation, OrderSide, Result,
};

/// Simulated execution venue for paper trading.
///
/// Fills are deterministic: the fill price is the synthetic option premium
/// derived from the latest underlying price. No order ever leaves the
/// process. Underlying quotes come from an optional read-only upstream venue
/// (the real broker in quote-only use) or from injected prices.
pub struct PaperVenue {
    /// Read-only quote source for the underlying, if configured.
    quotes: Option<Arc<dyn ExecutionVenue>>,
    /// Manually injected index prices (tests, replay drivers).
    injected: RwLock<HashMap<String, f64>>,
}

impl PaperVenue {
    pub fn new(quotes: Option<Arc<dyn ExecutionVenue>>) -> Self {
        info!(upstream_quotes = quotes.is_some(), "PaperVenue initialized");
        Self { quotes, injected: RwLock::new(HashMap::new()) }
    }

    /// Inject the latest underlying price for an index.
    pub async fn update_index_price(&self, index_name: &str, price: f64) {
        self.injected
            .write()
            .await
            .insert(index_name.to_uppercase(), price);
    }

    fn simulated_security_id(index_name: &str, strike: i64, option_type: OptionType) -> String {
        format!("SIM_{index_name}_{strike}_{option_type}")
    }

    fn parse_simulated_id(security_id: &str) -> Option<(String, i64, OptionType)> {
        let rest = security_id.strip_prefix("SIM_")?;
        let mut parts = rest.rsplitn(3, '_');
        let option_type = match parts.next()? {
            "CE" => OptionType::Ce,
            "PE" => OptionType::Pe,
            _ => return None,
        };
        let strike: i64 = parts.next()?.parse().ok()?;
        let index_name = parts.next()?.to_string();
        Some((index_name, strike, option_type))
    }
}

/// Synthetic option premium: intrinsic value plus a time value that decays
/// linearly with distance from the money, rounded to the 0.05 tick with a
/// 0.05 floor.
pub fn synthetic_option_ltp(index_ltp: f64, strike: i64, option_type: OptionType) -> f64 {
    if index_ltp <= 0.0 || strike <= 0 {
        return 0.05;
    }

    let strike = strike as f64;
    let intrinsic = match option_type {
        OptionType::Ce => (index_ltp - strike).max(0.0),
        OptionType::Pe => (strike - index_ltp).max(0.0),
    };

    let distance_from_atm = (index_ltp - strike).abs();
    let atm_time_value = 150.0;
    let time_decay_factor = (1.0 - distance_from_atm / 500.0).max(0.0);
    let time_value = atm_time_value * time_decay_factor;

    let ltp = (intrinsic + time_value) / 0.05;
    let ltp = ltp.round() * 0.05;
    (ltp.max(0.05) * 100.0).round() / 100.0
}

#[async_trait]
impl ExecutionVenue for PaperVenue {
    async fn place_order(
        &self,
        security_id: &str,
        side: OrderSide,
        qty: i64,
        index_name: &str,
    ) -> Result<OrderConfirmation> {
        let fill_price = self.option_ltp(security_id).await?;
        debug!(
            security = %security_id,
            side = %side,
            qty,
            index = %index_name,
            fill = fill_price,
            "paper fill simulated"
        );
        Ok(OrderConfirmation {
            order_id: format!("PAPER-{}", uuid::Uuid::new_v4()),
            fill_price: Some(fill_price),
        })
    }

    async fn index_ltp(&self, index_name: &str) -> Result<f64> {
        if let Some(upstream) = &self.quotes {
            return upstream.index_ltp(index_name).await;
        }
        self.injected
            .read()
            .await
            .get(&index_name.to_uppercase())
            .copied()
            .filter(|p| *p > 0.0)
            .ok_or_else(|| Error::MarketData(format!("no paper price for {index_name}")))
    }

    async fn option_ltp(&self, security_id: &str) -> Result<f64> {
        let (index_name, strike, option_type) = Self::parse_simulated_id(security_id)
            .ok_or_else(|| {
                Error::MarketData(format!("not a simulated security id: {security_id}"))
            })?;
        let index_ltp = self.index_ltp(&index_name).await?;
        Ok(synthetic_option_ltp(index_ltp, strike, option_type))
    }

    async fn atm_option_security_id(
        &self,
        index_name: &str,
        strike: i64,
        option_type: OptionType,
        _expiry: &str,
    ) -> Result<String> {
        Ok(Self::simulated_security_id(index_name, strike, option_type))
    }

    async fn nearest_expiry(&self, index_name: &str) -> Result<String> {
        let spec = index_spec(index_name)
            .ok_or_else(|| Error::Config(format!("unknown index: {index_name}")))?;

        let ist = to_ist(Utc::now());
        let today = ist.weekday().num_days_from_monday() as i64;
        let expiry_weekday = spec.expiry_day.num_days_from_monday() as i64;
        let mut days_ahead = (expiry_weekday - today).rem_euclid(7);
        if days_ahead == 0 && ist.hour() >= 15 {
            days_ahead = 7;
        }
        let expiry = ist.date_naive() + Duration::days(days_ahead);
        Ok(expiry.format("%Y-%m-%d").to_string())
    }
}
