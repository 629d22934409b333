use async_trait::async_trait;

use crate::{OptionType, OrderSide, Result};

/// Confirmation returned by the venue for a placed order.
///
/// `fill_price` may be absent for venues that confirm placement before the
/// fill price is known; callers then quote the option LTP separately.
#[derive(Debug, Clone)]
pub struct OrderConfirmation {
    pub order_id: String,
    pub fill_price: Option<f64>,
}

/// Abstraction over the execution venue.
///
/// `BrokerClient` implements this for live trading, `PaperVenue` for
/// simulation. Only the `ExecutionCoordinator` in `crates/engine` should hold
/// a reference to a `dyn ExecutionVenue`; every order must pass the decision
/// and risk gates before reaching it.
///
/// All methods are fallible. A returned error means "no data this tick" and
/// must never be substituted with a zero or default price.
#[async_trait]
pub trait ExecutionVenue: Send + Sync {
    /// Submit a market order and wait for the venue's confirmation.
    async fn place_order(
        &self,
        security_id: &str,
        side: OrderSide,
        qty: i64,
        index_name: &str,
    ) -> Result<OrderConfirmation>;

    /// Latest traded price of the underlying index.
    async fn index_ltp(&self, index_name: &str) -> Result<f64>;

    /// Latest traded price of an option contract.
    async fn option_ltp(&self, security_id: &str) -> Result<f64>;

    /// Resolve the tradeable security id for an ATM option.
    async fn atm_option_security_id(
        &self,
        index_name: &str,
        strike: i64,
        option_type: OptionType,
        expiry: &str,
    ) -> Result<String>;

    /// Nearest expiry date for the index, `YYYY-MM-DD`.
    async fn nearest_expiry(&self, index_name: &str) -> Result<String>;
}
