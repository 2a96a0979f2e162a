//! Fake exchange for integration testing.
//!
//! Provides a deterministic `ExchangeClient` implementation with a
//! controllable balance and price, scripted placement failures and a
//! configurable fill delay. All state is in-memory.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::Instant;

use dca_bot::engine::clock::Clock;
use dca_bot::exchange::ExchangeClient;
use dca_bot::types::{OrderStatus, Side};

/// An order as the fake exchange received it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub id: String,
    pub pair: String,
    pub side: Side,
    pub amount: Decimal,
    pub price: Decimal,
}

pub struct FakeExchange {
    balance: Mutex<Decimal>,
    price: Mutex<Decimal>,
    /// Status polls before an order reports filled; `None` never fills.
    fill_after_polls: Mutex<Option<u32>>,
    /// Remaining placement calls that fail before one succeeds.
    place_failures: Mutex<u32>,
    orders: Mutex<Vec<PlacedOrder>>,
    polls: Mutex<HashMap<String, u32>>,
    cancelled: Mutex<Vec<String>>,
}

impl FakeExchange {
    /// 1000 EUR, BTC at 50 000, orders fill on the first poll.
    pub fn new() -> Self {
        Self {
            balance: Mutex::new(dec!(1000)),
            price: Mutex::new(dec!(50000)),
            fill_after_polls: Mutex::new(Some(1)),
            place_failures: Mutex::new(0),
            orders: Mutex::new(Vec::new()),
            polls: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    pub fn set_balance(&self, balance: Decimal) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn set_fill_after(&self, polls: Option<u32>) {
        *self.fill_after_polls.lock().unwrap() = polls;
    }

    pub fn fail_next_placements(&self, n: u32) {
        *self.place_failures.lock().unwrap() = n;
    }

    pub fn orders(&self) -> Vec<PlacedOrder> {
        self.orders.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeClient for FakeExchange {
    async fn get_balance(&self, _currency: &str) -> Result<Decimal> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn get_price(&self, _pair: &str) -> Result<Decimal> {
        Ok(*self.price.lock().unwrap())
    }

    async fn place_limit_order(
        &self,
        pair: &str,
        side: Side,
        amount: Decimal,
        price: Decimal,
    ) -> Result<String> {
        {
            let mut failures = self.place_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(anyhow!("EOrder:Insufficient funds"));
            }
        }

        let mut orders = self.orders.lock().unwrap();
        let id = format!("FAKE-{}", orders.len() + 1);
        orders.push(PlacedOrder {
            id: id.clone(),
            pair: pair.to_string(),
            side,
            amount,
            price,
        });
        Ok(id)
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatus> {
        if self.cancelled.lock().unwrap().iter().any(|c| c == order_id) {
            return Ok(OrderStatus::Cancelled);
        }
        let mut polls = self.polls.lock().unwrap();
        let count = polls.entry(order_id.to_string()).or_insert(0);
        *count += 1;

        match *self.fill_after_polls.lock().unwrap() {
            Some(n) if *count >= n => Ok(OrderStatus::Filled),
            _ => Ok(OrderStatus::Pending),
        }
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.cancelled.lock().unwrap().push(order_id.to_string());
        Ok(())
    }
}

/// Wall clock that follows tokio's (pausable) clock from a fixed origin.
pub struct TokioClock {
    origin: DateTime<Utc>,
    started: Instant,
}

impl TokioClock {
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            started: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap();
        self.origin + elapsed
    }
}
