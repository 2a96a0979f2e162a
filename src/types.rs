//! Shared types for the DCA bot.
//!
//! The persisted weekly record, the transient order, attempt outcomes and
//! the domain error taxonomy. Exchange, engine and storage modules all
//! depend on these without depending on each other.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Persisted state
// ---------------------------------------------------------------------------

/// ISO week marker used to scope the persisted record, e.g. `2026-W42`.
pub fn week_identifier(at: DateTime<Utc>) -> String {
    let week = at.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// The single durable record. Overwritten on every save, never appended.
///
/// Every flag is relative to `week_identifier`; a record for another week
/// is stale and reads as the default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub week_identifier: Option<String>,
    #[serde(default)]
    pub primary_attempt_succeeded: bool,
    /// Set before the primary purchase starts so a restart inside the
    /// window does not place a second order.
    #[serde(default)]
    pub primary_attempted: bool,
    #[serde(default)]
    pub fallback_attempted: bool,
    #[serde(default)]
    pub fallback_attempt_succeeded: bool,
}

impl PersistedState {
    /// Fresh record for the given week.
    pub fn for_week(week: &str) -> Self {
        Self {
            week_identifier: Some(week.to_string()),
            ..Self::default()
        }
    }

    /// The record as it applies to `week`: itself if it belongs to that
    /// week, otherwise an empty record for it.
    pub fn scoped_to(&self, week: &str) -> Self {
        if self.week_identifier.as_deref() == Some(week) {
            self.clone()
        } else {
            Self::for_week(week)
        }
    }

    /// Whether a purchase already went through this record's week.
    pub fn purchased(&self) -> bool {
        self.primary_attempt_succeeded || self.fallback_attempt_succeeded
    }

    /// Union of two records for `week`. A flag set in either stays set.
    pub fn merged_with(&self, other: &Self, week: &str) -> Self {
        let a = self.scoped_to(week);
        let b = other.scoped_to(week);
        Self {
            week_identifier: Some(week.to_string()),
            primary_attempt_succeeded: a.primary_attempt_succeeded || b.primary_attempt_succeeded,
            primary_attempted: a.primary_attempted || b.primary_attempted,
            fallback_attempted: a.fallback_attempted || b.fallback_attempted,
            fallback_attempt_succeeded: a.fallback_attempt_succeeded
                || b.fallback_attempt_succeeded,
        }
    }
}

impl fmt::Display for PersistedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "week={} primary={} fallback={}",
            self.week_identifier.as_deref().unwrap_or("none"),
            attempt_label(self.primary_attempted, self.primary_attempt_succeeded),
            attempt_label(self.fallback_attempted, self.fallback_attempt_succeeded),
        )
    }
}

fn attempt_label(attempted: bool, succeeded: bool) -> &'static str {
    match (attempted, succeeded) {
        (_, true) => "succeeded",
        (true, false) => "failed",
        (false, false) => "pending",
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Order direction. Only buys are ever placed; `Sell` exists so the
/// exchange signature stays honest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Wire value used by the exchange (`buy` / `sell`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a submitted order. The exchange reports all but the last;
/// `TimedOut` is ours, set when the fill deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    /// Closed (cancelled or expired) after executing this much volume.
    PartiallyFilled(Decimal),
    TimedOut,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Filled => write!(f, "filled"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
            OrderStatus::PartiallyFilled(v) => write!(f, "partially filled ({v})"),
            OrderStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// One attempted trade. Lives for the duration of a single attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseOrder {
    /// Fiat committed (quote currency).
    pub spend_amount: Decimal,
    /// Coins requested, floored to exchange precision.
    pub coin_amount: Decimal,
    pub limit_price: Decimal,
    pub order_id: Option<String>,
    pub status: OrderStatus,
}

impl PurchaseOrder {
    pub fn new(spend_amount: Decimal, coin_amount: Decimal, limit_price: Decimal) -> Self {
        Self {
            spend_amount,
            coin_amount,
            limit_price,
            order_id: None,
            status: OrderStatus::Pending,
        }
    }
}

impl fmt::Display for PurchaseOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} (spend {:.2}, id {}, {})",
            self.coin_amount,
            self.limit_price,
            self.spend_amount,
            self.order_id.as_deref().unwrap_or("-"),
            self.status,
        )
    }
}

// ---------------------------------------------------------------------------
// Attempt outcome
// ---------------------------------------------------------------------------

/// Definitive result of one purchase attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success {
        order_id: String,
        filled_amount: Decimal,
    },
    /// Computed amount below the configured minimum; nothing was submitted.
    InsufficientAmount {
        computed: Decimal,
        minimum: Decimal,
    },
    /// Order was not filled before the deadline and has been cancelled.
    OrderTimeout { order_id: String },
    ExchangeError(String),
    /// The window could not be marked as attempted; nothing was submitted.
    StateUnavailable(String),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success { .. })
    }

    /// The failure as a domain error, `None` on success.
    pub fn as_error(&self) -> Option<BotError> {
        match self {
            AttemptOutcome::Success { .. } => None,
            AttemptOutcome::InsufficientAmount { computed, minimum } => {
                Some(BotError::InsufficientAmount {
                    computed: *computed,
                    minimum: *minimum,
                })
            }
            AttemptOutcome::OrderTimeout { order_id } => {
                Some(BotError::OrderTimeout(order_id.clone()))
            }
            AttemptOutcome::ExchangeError(detail) => Some(BotError::Exchange(detail.clone())),
            AttemptOutcome::StateUnavailable(detail) => {
                Some(BotError::StateUnavailable(detail.clone()))
            }
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Success {
                order_id,
                filled_amount,
            } => write!(f, "filled {filled_amount} (order {order_id})"),
            other => match other.as_error() {
                Some(e) => write!(f, "{e}"),
                None => Ok(()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain error taxonomy. Only `Config` is fatal; everything else resolves
/// to "this window failed".
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Insufficient amount: computed {computed}, minimum {minimum}")]
    InsufficientAmount { computed: Decimal, minimum: Decimal },

    #[error("Order {0} not filled before deadline, cancelled")]
    OrderTimeout(String),

    #[error("State file corrupt: {0}")]
    StateCorruption(String),

    #[error("State could not be saved: {0}")]
    StateUnavailable(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
