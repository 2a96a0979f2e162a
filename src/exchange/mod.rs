//! Exchange integrations.
//!
//! Defines the `ExchangeClient` trait the purchase engine talks to and
//! provides the Kraken REST implementation.

pub mod kraken;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{OrderStatus, Side};

/// Abstraction over a spot exchange account.
///
/// Any error returned here is surfaced by the purchase engine as an
/// exchange failure for the current window.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Available balance of `currency` (e.g. `EUR`).
    async fn get_balance(&self, currency: &str) -> Result<Decimal>;

    /// Reference buy price for `pair` (e.g. `BTC/EUR`).
    async fn get_price(&self, pair: &str) -> Result<Decimal>;

    /// Submit a limit order and return the exchange-assigned order id.
    async fn place_limit_order(
        &self,
        pair: &str,
        side: Side,
        amount: Decimal,
        price: Decimal,
    ) -> Result<String>;

    /// Current status: `Pending`, `Filled` or `Cancelled`.
    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatus>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;
}
