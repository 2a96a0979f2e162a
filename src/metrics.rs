//! In-process purchase metrics.
//!
//! Counters for attempts, successes and failures plus a few gauges about
//! the last fill and the last observed fiat balance. Nothing is exported
//! over the network; snapshots are logged.

use rust_decimal::Decimal;
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// Point-in-time copy of all metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub order_attempts: u64,
    pub order_successes: u64,
    pub order_failures: u64,
    pub last_order_amount: Option<Decimal>,
    pub last_order_price: Option<Decimal>,
    pub last_order_latency: Option<Duration>,
    pub last_fiat_balance: Option<Decimal>,
}

#[derive(Debug, Default)]
pub struct PurchaseMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl PurchaseMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<F: FnOnce(&mut MetricsSnapshot)>(&self, f: F) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }

    pub fn record_attempt(&self) {
        self.with(|m| m.order_attempts += 1);
    }

    pub fn record_success(&self, amount: Decimal, price: Decimal, latency: Duration) {
        self.with(|m| {
            m.order_successes += 1;
            m.last_order_amount = Some(amount);
            m.last_order_price = Some(price);
            m.last_order_latency = Some(latency);
        });
    }

    pub fn record_failure(&self) {
        self.with(|m| m.order_failures += 1);
    }

    pub fn update_balance(&self, fiat: Decimal) {
        self.with(|m| m.last_fiat_balance = Some(fiat));
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Emit the current snapshot as one structured log line.
    pub fn log_summary(&self) {
        let m = self.snapshot();
        info!(
            attempts = m.order_attempts,
            successes = m.order_successes,
            failures = m.order_failures,
            last_amount = ?m.last_order_amount,
            last_price = ?m.last_order_price,
            last_latency_ms = m.last_order_latency.map(|d| d.as_millis() as u64),
            fiat_balance = ?m.last_fiat_balance,
            "Purchase metrics"
        );
    }
}
