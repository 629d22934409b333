//! The boundary between intents and the execution venue.
//!
//! This is the ONLY component that calls `ExecutionVenue::place_order`. A
//! ledger transition happens strictly after the venue confirms: a failed
//! entry creates nothing, a failed exit leaves the position untouched for
//! the next cycle to retry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use common::{ExecutionVenue, OrderConfirmation, OrderSide, Result};

pub struct ExecutionCoordinator {
    venue: Arc<dyn ExecutionVenue>,
    /// When the last order (entry or exit) was placed, across all
    /// instances. Drives the global minimum order cooldown.
    last_order_time: Option<DateTime<Utc>>,
}

impl ExecutionCoordinator {
    pub fn new(venue: Arc<dyn ExecutionVenue>) -> Self {
        Self { venue, last_order_time: None }
    }

    pub fn venue(&self) -> &Arc<dyn ExecutionVenue> {
        &self.venue
    }

    pub fn last_order_time(&self) -> Option<DateTime<Utc>> {
        self.last_order_time
    }

    /// Whether the global order cooldown allows a new order at `now`.
    pub fn cooldown_clear(&self, now: DateTime<Utc>, cooldown_secs: u32) -> bool {
        if cooldown_secs == 0 {
            return true;
        }
        match self.last_order_time {
            Some(last) => (now - last).num_seconds() >= cooldown_secs as i64,
            None => true,
        }
    }

    pub fn cooldown_remaining(&self, now: DateTime<Utc>, cooldown_secs: u32) -> i64 {
        match self.last_order_time {
            Some(last) if cooldown_secs > 0 => {
                (cooldown_secs as i64 - (now - last).num_seconds()).max(0)
            }
            _ => 0,
        }
    }

    /// Place a buy order and await confirmation. Stamps the cooldown clock
    /// only on success; a failure leaves no trace.
    pub async fn execute_entry(
        &mut self,
        now: DateTime<Utc>,
        security_id: &str,
        qty: i64,
        index_name: &str,
    ) -> Result<OrderConfirmation> {
        info!(security = %security_id, qty, index = %index_name, "placing ENTRY BUY order");
        match self.venue.place_order(security_id, OrderSide::Buy, qty, index_name).await {
            Ok(confirmation) => {
                info!(order_id = %confirmation.order_id, "entry order confirmed");
                self.last_order_time = Some(now);
                Ok(confirmation)
            }
            Err(e) => {
                error!(security = %security_id, error = %e, "entry order failed");
                Err(e)
            }
        }
    }

    /// Place a sell order and await confirmation. The caller keeps its
    /// position on failure and retries on the next evaluation cycle.
    pub async fn execute_exit(
        &mut self,
        now: DateTime<Utc>,
        security_id: &str,
        qty: i64,
        index_name: &str,
    ) -> Result<OrderConfirmation> {
        info!(security = %security_id, qty, index = %index_name, "placing EXIT SELL order");
        match self.venue.place_order(security_id, OrderSide::Sell, qty, index_name).await {
            Ok(confirmation) => {
                info!(order_id = %confirmation.order_id, "exit order confirmed");
                self.last_order_time = Some(now);
                Ok(confirmation)
            }
            Err(e) => {
                error!(security = %security_id, error = %e, "exit order failed, position kept open");
                Err(e)
            }
        }
    }
}
