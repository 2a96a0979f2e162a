//! Purchase attempt.
//!
//! Sizes one limit buy from the fiat balance and the current bid, submits
//! it, and polls until it fills, the exchange cancels it, or the wait
//! budget runs out (in which case it is cancelled). Every path ends in a
//! definitive `AttemptOutcome`; nothing here returns an error.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::TradingConfig;
use crate::exchange::ExchangeClient;
use crate::metrics::PurchaseMetrics;
use crate::types::{AttemptOutcome, BotError, OrderStatus, PurchaseOrder, Side};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How an attempt treats the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Size from balance, place and poll a real order.
    Live,
    /// Real lookups, simulated placement and immediate fill.
    DryRun,
    /// Real order for exactly the minimum amount.
    Test,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Live => write!(f, "live"),
            ExecutionMode::DryRun => write!(f, "dry-run"),
            ExecutionMode::Test => write!(f, "test"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PurchaseConfig {
    /// `BASE/QUOTE`, e.g. `BTC/EUR`.
    pub pair: String,
    /// Fiat currency whose balance funds the purchase.
    pub quote_currency: String,
    pub spend_fraction: Decimal,
    pub min_coin_amount: Decimal,
    pub amount_precision: u32,
    pub price_precision: u32,
    /// How long a submitted order may stay unfilled before it is cancelled.
    pub max_wait: Duration,
    pub poll_interval: Duration,
    pub test_max_retries: u32,
    pub test_retry_delay: Duration,
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            pair: "BTC/EUR".to_string(),
            quote_currency: "EUR".to_string(),
            spend_fraction: dec!(0.20),
            min_coin_amount: dec!(0.00005),
            amount_precision: 8,
            price_precision: 1,
            max_wait: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(10),
            test_max_retries: 10,
            test_retry_delay: Duration::from_secs(5),
        }
    }
}

impl PurchaseConfig {
    pub fn from_trading(t: &TradingConfig) -> Result<Self, BotError> {
        let decimal = |name: &str, v: f64| {
            Decimal::from_f64(v)
                .map(|d| d.normalize())
                .ok_or_else(|| BotError::Config(format!("{name} is not representable: {v}")))
        };

        Ok(Self {
            pair: t.symbol.clone(),
            quote_currency: t.quote_currency().to_string(),
            spend_fraction: decimal("spend_fraction", t.spend_fraction)?,
            min_coin_amount: decimal("min_coin_amount", t.min_coin_amount)?,
            amount_precision: t.amount_precision,
            price_precision: t.price_precision,
            max_wait: t
                .order_timeout_minutes
                .checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    BotError::Config(format!(
                        "order timeout of {} minutes is out of range",
                        t.order_timeout_minutes
                    ))
                })?,
            poll_interval: Duration::from_secs(t.fill_poll_interval_secs),
            test_max_retries: t.max_retries.max(1),
            test_retry_delay: Duration::from_secs(t.retry_delay_seconds),
        })
    }
}

/// Result of a test-mode run: the last outcome and how many tries it took.
#[derive(Debug, Clone, PartialEq)]
pub struct TestRunReport {
    pub attempts: u32,
    pub outcome: AttemptOutcome,
}

// ---------------------------------------------------------------------------
// Purchaser
// ---------------------------------------------------------------------------

pub struct Purchaser {
    exchange: Arc<dyn ExchangeClient>,
    config: PurchaseConfig,
    metrics: Arc<PurchaseMetrics>,
}

impl Purchaser {
    pub fn new(exchange: Arc<dyn ExchangeClient>, config: PurchaseConfig) -> Self {
        Self::with_metrics(exchange, config, Arc::new(PurchaseMetrics::new()))
    }

    pub fn with_metrics(
        exchange: Arc<dyn ExchangeClient>,
        config: PurchaseConfig,
        metrics: Arc<PurchaseMetrics>,
    ) -> Self {
        Self {
            exchange,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &PurchaseConfig {
        &self.config
    }

    pub fn metrics(&self) -> &PurchaseMetrics {
        &self.metrics
    }

    /// Size an order from a balance and a reference price.
    ///
    /// Test mode buys exactly the minimum; the other modes spend
    /// `balance × spend_fraction`. The coin amount is floored to the
    /// exchange precision and must not fall below the minimum.
    pub fn size_order(
        &self,
        balance: Decimal,
        price: Decimal,
        mode: ExecutionMode,
    ) -> Result<PurchaseOrder, AttemptOutcome> {
        let cfg = &self.config;
        let limit_price =
            price.round_dp_with_strategy(cfg.price_precision, RoundingStrategy::ToZero);
        if limit_price <= Decimal::ZERO {
            return Err(AttemptOutcome::ExchangeError(format!(
                "unusable price {price} for {}",
                cfg.pair
            )));
        }

        let (spend, coins) = match mode {
            ExecutionMode::Test => {
                let coins = cfg.min_coin_amount;
                (coins * limit_price, coins)
            }
            ExecutionMode::Live | ExecutionMode::DryRun => {
                let spend = balance * cfg.spend_fraction;
                let coins = (spend / limit_price)
                    .round_dp_with_strategy(cfg.amount_precision, RoundingStrategy::ToZero);
                (spend, coins)
            }
        };

        if coins < cfg.min_coin_amount {
            return Err(AttemptOutcome::InsufficientAmount {
                computed: coins,
                minimum: cfg.min_coin_amount,
            });
        }

        Ok(PurchaseOrder::new(spend, coins, limit_price))
    }

    /// Run one attempt and report its outcome.
    pub async fn attempt(&self, mode: ExecutionMode) -> AttemptOutcome {
        self.metrics.record_attempt();
        let outcome = self.execute(mode).await;
        if !outcome.is_success() {
            self.metrics.record_failure();
        }
        outcome
    }

    /// Test mode: retry the minimum purchase up to the configured bound.
    pub async fn run_test_purchase(&self) -> TestRunReport {
        let max = self.config.test_max_retries.max(1);
        let mut last = AttemptOutcome::ExchangeError("no attempt made".into());

        for attempt in 1..=max {
            info!(attempt, max, amount = %self.config.min_coin_amount, "Test purchase attempt");
            last = self.attempt(ExecutionMode::Test).await;
            if last.is_success() {
                return TestRunReport {
                    attempts: attempt,
                    outcome: last,
                };
            }

            warn!(attempt, max, outcome = %last, "Test purchase attempt failed");
            if attempt < max {
                tokio::time::sleep(self.config.test_retry_delay).await;
            }
        }

        error!(attempts = max, outcome = %last, "Test purchase retries exhausted");
        TestRunReport {
            attempts: max,
            outcome: last,
        }
    }

    // -- Internal helpers ------------------------------------------------

    async fn execute(&self, mode: ExecutionMode) -> AttemptOutcome {
        let cfg = &self.config;
        let started = Instant::now();

        let balance = match self.exchange.get_balance(&cfg.quote_currency).await {
            Ok(b) => b,
            Err(e) => return exchange_failure("balance lookup", e),
        };
        self.metrics.update_balance(balance);
        info!(
            mode = %mode,
            currency = %cfg.quote_currency,
            balance = format!("{balance:.2}"),
            "Fiat balance"
        );

        let price = match self.exchange.get_price(&cfg.pair).await {
            Ok(p) => p,
            Err(e) => return exchange_failure("price lookup", e),
        };

        let mut order = match self.size_order(balance, price, mode) {
            Ok(order) => order,
            Err(outcome) => {
                warn!(mode = %mode, pair = %cfg.pair, price = %price, outcome = %outcome, "Order not submitted");
                return outcome;
            }
        };
        info!(
            mode = %mode,
            pair = %cfg.pair,
            spend = format!("{:.2}", order.spend_amount),
            amount = %order.coin_amount,
            price = %order.limit_price,
            "Order sized"
        );

        if mode == ExecutionMode::DryRun {
            let order_id = format!("dry-run-{}", uuid::Uuid::new_v4());
            order.order_id = Some(order_id.clone());
            order.status = OrderStatus::Filled;
            info!(order = %order, "[DRY RUN] Would place limit buy; simulating immediate fill");
            self.metrics
                .record_success(order.coin_amount, order.limit_price, started.elapsed());
            return AttemptOutcome::Success {
                order_id,
                filled_amount: order.coin_amount,
            };
        }

        let order_id = match self
            .exchange
            .place_limit_order(&cfg.pair, Side::Buy, order.coin_amount, order.limit_price)
            .await
        {
            Ok(id) => id,
            Err(e) => return exchange_failure("order placement", e),
        };
        order.order_id = Some(order_id.clone());
        info!(order = %order, "Limit buy placed, waiting for fill");

        let outcome = self.await_fill(&mut order, &order_id).await;
        if let AttemptOutcome::Success { filled_amount, .. } = &outcome {
            self.metrics
                .record_success(*filled_amount, order.limit_price, started.elapsed());
        }
        outcome
    }

    /// Poll until filled, cancelled by the exchange, or `max_wait` elapses.
    /// Poll errors are logged and polling continues until the deadline.
    async fn await_fill(&self, order: &mut PurchaseOrder, order_id: &str) -> AttemptOutcome {
        let deadline = Instant::now() + self.config.max_wait;

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;

            match self.exchange.get_order_status(order_id).await {
                Ok(OrderStatus::Filled) => {
                    order.status = OrderStatus::Filled;
                    info!(order = %order, "Order filled");
                    return AttemptOutcome::Success {
                        order_id: order_id.to_string(),
                        filled_amount: order.coin_amount,
                    };
                }
                Ok(OrderStatus::PartiallyFilled(filled)) => {
                    return partial_fill(order, order_id, filled);
                }
                Ok(OrderStatus::Cancelled) => {
                    order.status = OrderStatus::Cancelled;
                    warn!(order = %order, "Order cancelled by exchange");
                    return AttemptOutcome::ExchangeError(format!(
                        "order {order_id} cancelled by exchange"
                    ));
                }
                Ok(status) => debug!(order_id, status = %status, "Order not filled yet"),
                Err(e) => warn!(order_id, error = %e, "Order status poll failed"),
            }
        }

        order.status = OrderStatus::TimedOut;
        warn!(
            order = %order,
            waited_secs = self.config.max_wait.as_secs(),
            "Order not filled in time, cancelling"
        );

        let cancelled = self.exchange.cancel_order(order_id).await;

        // The cancel can lose a race with a late fill, and a cancelled
        // order may still have executed in part.
        match self.exchange.get_order_status(order_id).await {
            Ok(OrderStatus::Filled) => {
                order.status = OrderStatus::Filled;
                info!(order = %order, "Order filled while cancelling");
                return AttemptOutcome::Success {
                    order_id: order_id.to_string(),
                    filled_amount: order.coin_amount,
                };
            }
            Ok(OrderStatus::PartiallyFilled(filled)) => {
                return partial_fill(order, order_id, filled);
            }
            Ok(_) => {}
            Err(e) => warn!(order_id, error = %e, "Status check after cancel failed"),
        }

        match cancelled {
            Ok(()) => AttemptOutcome::OrderTimeout {
                order_id: order_id.to_string(),
            },
            Err(cancel_err) => {
                error!(order_id, error = %cancel_err, "Failed to cancel timed-out order");
                AttemptOutcome::ExchangeError(format!(
                    "order {order_id} timed out and cancel failed: {cancel_err:#}"
                ))
            }
        }
    }
}

/// Part of the volume executed before the order closed. Counted as the
/// week's purchase so the fallback does not buy the full amount again.
fn partial_fill(order: &mut PurchaseOrder, order_id: &str, filled: Decimal) -> AttemptOutcome {
    order.status = OrderStatus::PartiallyFilled(filled);
    warn!(
        order = %order,
        filled = %filled,
        requested = %order.coin_amount,
        "Order closed after a partial fill"
    );
    AttemptOutcome::Success {
        order_id: order_id.to_string(),
        filled_amount: filled,
    }
}

fn exchange_failure(step: &str, e: anyhow::Error) -> AttemptOutcome {
    error!(step, error = %e, "Exchange call failed");
    AttemptOutcome::ExchangeError(format!("{step}: {e:#}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
