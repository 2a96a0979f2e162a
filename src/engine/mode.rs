//! Execution modes.
//!
//! Picked once at startup and dispatched to one of three paths:
//! - `Live`: scheduler loop until shutdown
//! - `DryRun`: one simulated purchase, then exit
//! - `Test`: one real minimum-size purchase with bounded retries, then exit

use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::clock::Clock;
use super::purchase::{ExecutionMode, Purchaser, TestRunReport};
use super::scheduler::{Scheduler, WeeklySchedule, Window};
use crate::alerts::{AlertLevel, Alerter};
use crate::storage::StateStore;
use crate::types::{week_identifier, AttemptOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Live,
    DryRun,
    Test,
}

impl RunMode {
    /// Test mode wins over dry run; dry run wins over live.
    pub fn select(dry_run: bool, test_mode: bool) -> Self {
        if test_mode {
            RunMode::Test
        } else if dry_run {
            RunMode::DryRun
        } else {
            RunMode::Live
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Live => write!(f, "LIVE"),
            RunMode::DryRun => write!(f, "DRY RUN"),
            RunMode::Test => write!(f, "TEST MODE"),
        }
    }
}

/// Startup notice sent once the alert channel is up.
pub fn startup_message(
    mode: RunMode,
    schedule: &WeeklySchedule,
    base: &str,
    quote: &str,
    spend_fraction: f64,
) -> String {
    format!(
        "DCA bot started ({mode}): buying {base} with {:.0}% of the {quote} balance. \
         Primary {}, fallback {}",
        spend_fraction * 100.0,
        schedule.primary,
        schedule.fallback
    )
}

/// Dry run: report what the scheduler would decide right now (without
/// writing state), then simulate one purchase.
pub async fn run_dry(
    purchaser: &Purchaser,
    schedule: &WeeklySchedule,
    store: &dyn StateStore,
    now: DateTime<Utc>,
) -> AttemptOutcome {
    let state = store.load();
    let decision = schedule.decide(now, &state);
    info!(
        week = %week_identifier(now),
        state = %state,
        decision = %decision,
        next_primary = %schedule.next_start(Window::Primary, now),
        next_fallback = %schedule.next_start(Window::Fallback, now),
        "[DRY RUN] Scheduler decision (state is not modified)"
    );

    let outcome = purchaser.attempt(ExecutionMode::DryRun).await;
    info!(outcome = %outcome, "[DRY RUN] Completed");
    purchaser.metrics().log_summary();
    outcome
}

/// Test mode: minimum purchase, retried up to the configured bound.
pub async fn run_test(purchaser: &Purchaser, alerter: &Alerter) -> TestRunReport {
    let cfg = purchaser.config();
    info!(
        pair = %cfg.pair,
        amount = %cfg.min_coin_amount,
        max_retries = cfg.test_max_retries,
        "[TEST MODE] Attempting one real purchase with the minimum amount"
    );

    let report = purchaser.run_test_purchase().await;
    if report.outcome.is_success() {
        info!(attempts = report.attempts, outcome = %report.outcome, "[TEST MODE] Test purchase completed");
        alerter
            .send(AlertLevel::Success, &format!("test purchase: {}", report.outcome))
            .await;
    } else {
        error!(attempts = report.attempts, outcome = %report.outcome, "[TEST MODE] Test purchase failed");
        alerter
            .send(AlertLevel::Error, &format!("test purchase failed: {}", report.outcome))
            .await;
    }
    purchaser.metrics().log_summary();
    report
}

/// Live mode: evaluate the schedule every `poll_interval` until `shutdown`
/// resolves. Returns the number of evaluations that ran a purchase.
pub async fn run_live<F>(
    scheduler: &Scheduler,
    clock: &dyn Clock,
    poll_interval: Duration,
    shutdown: F,
) -> usize
where
    F: Future<Output = ()>,
{
    let schedule = scheduler.schedule();
    let now = clock.now();
    info!(
        primary = %schedule.primary,
        fallback = %schedule.fallback,
        window_minutes = schedule.tolerance.num_minutes(),
        next_primary = %schedule.next_start(Window::Primary, now),
        state = %scheduler.state(),
        "Scheduler started"
    );

    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut attempts = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let eval = scheduler.evaluate(clock.now()).await;
                if eval.outcome.is_some() {
                    attempts += 1;
                    scheduler.purchaser().metrics().log_summary();
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    attempts
}
