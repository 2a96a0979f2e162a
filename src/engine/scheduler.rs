//! Weekly scheduler.
//!
//! Two windows per ISO week: a primary attempt (default Monday 02:00 UTC)
//! and a fallback later the same week (default Sunday 02:00 UTC) that only
//! runs if the primary did not buy. Each window is the half-open interval
//! `[target, target + tolerance)`. Per week the record moves
//! not attempted → primary attempted → fallback attempted (terminal).
//!
//! The "attempted" marker for a window is persisted before its purchase
//! starts, so a restart inside the window never places a second order. If
//! that save fails the purchase is skipped. The scheduler also keeps the
//! record in memory, so an unwritable store cannot make it decide twice.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc, Weekday};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use super::purchase::{ExecutionMode, Purchaser};
use crate::alerts::{AlertLevel, Alerter};
use crate::config::ScheduleConfig;
use crate::storage::StateStore;
use crate::types::{week_identifier, AttemptOutcome, BotError, PersistedState};

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Primary,
    Fallback,
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Window::Primary => write!(f, "primary"),
            Window::Fallback => write!(f, "fallback"),
        }
    }
}

/// Day of week plus UTC time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub day: Weekday,
    pub time: NaiveTime,
}

impl WindowSpec {
    pub fn new(day: Weekday, time: NaiveTime) -> Self {
        Self { day, time }
    }

    pub fn parse(day: &str, time: &str) -> Result<Self, BotError> {
        let day: Weekday = day
            .trim()
            .parse()
            .map_err(|_| BotError::Config(format!("invalid weekday: {day}")))?;
        let time = NaiveTime::parse_from_str(time.trim(), "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(time.trim(), "%H:%M:%S"))
            .map_err(|_| BotError::Config(format!("invalid time (want HH:MM): {time}")))?;
        Ok(Self { day, time })
    }

    /// Distance from Monday 00:00 of the same week.
    fn offset(&self) -> Duration {
        Duration::days(self.day.num_days_from_monday() as i64)
            + Duration::seconds(self.time.num_seconds_from_midnight() as i64)
    }

    /// This window's instant within the ISO week containing `at`.
    pub fn target_in_week_of(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let monday =
            at.date_naive() - Duration::days(at.weekday().num_days_from_monday() as i64);
        (monday + Duration::days(self.day.num_days_from_monday() as i64))
            .and_time(self.time)
            .and_utc()
    }
}

impl fmt::Display for WindowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} UTC", self.day, self.time.format("%H:%M"))
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    OutsideWindow,
    PrimaryAlreadyAttempted,
    AlreadyPurchased,
    FallbackAlreadyAttempted,
}

impl fmt::Display for IdleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdleReason::OutsideWindow => write!(f, "outside any window"),
            IdleReason::PrimaryAlreadyAttempted => {
                write!(f, "primary already attempted this week")
            }
            IdleReason::AlreadyPurchased => write!(f, "already purchased this week"),
            IdleReason::FallbackAlreadyAttempted => {
                write!(f, "fallback already attempted this week")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Run(Window),
    Idle(IdleReason),
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Run(w) => write!(f, "run {w} attempt"),
            Decision::Idle(r) => write!(f, "idle ({r})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Weekly schedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WeeklySchedule {
    pub primary: WindowSpec,
    pub fallback: WindowSpec,
    pub tolerance: Duration,
}

impl Default for WeeklySchedule {
    fn default() -> Self {
        let two_am = NaiveTime::from_hms_opt(2, 0, 0).unwrap_or_default();
        Self {
            primary: WindowSpec::new(Weekday::Mon, two_am),
            fallback: WindowSpec::new(Weekday::Sun, two_am),
            tolerance: Duration::minutes(60),
        }
    }
}

impl WeeklySchedule {
    /// Both windows must fit in one ISO week, in order, without overlapping.
    pub fn new(
        primary: WindowSpec,
        fallback: WindowSpec,
        tolerance: Duration,
    ) -> Result<Self, BotError> {
        if tolerance <= Duration::zero() {
            return Err(BotError::Config("schedule window must be positive".into()));
        }
        if primary.offset() + tolerance > fallback.offset() {
            return Err(BotError::Config(format!(
                "fallback ({fallback}) must start after the primary window ({primary}) ends"
            )));
        }
        if fallback.offset() + tolerance > Duration::days(7) {
            return Err(BotError::Config(format!(
                "fallback window ({fallback}) must end before the week does"
            )));
        }
        Ok(Self {
            primary,
            fallback,
            tolerance,
        })
    }

    pub fn from_config(cfg: &ScheduleConfig) -> Result<Self, BotError> {
        let tolerance = i64::try_from(cfg.window_minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .ok_or_else(|| {
                BotError::Config(format!("window of {} minutes is out of range", cfg.window_minutes))
            })?;
        Self::new(
            WindowSpec::parse(&cfg.primary_day, &cfg.primary_time)?,
            WindowSpec::parse(&cfg.fallback_day, &cfg.fallback_time)?,
            tolerance,
        )
    }

    fn spec(&self, window: Window) -> WindowSpec {
        match window {
            Window::Primary => self.primary,
            Window::Fallback => self.fallback,
        }
    }

    /// The window `now` falls into, if any.
    pub fn window_at(&self, now: DateTime<Utc>) -> Option<Window> {
        [Window::Primary, Window::Fallback].into_iter().find(|w| {
            let start = self.spec(*w).target_in_week_of(now);
            now >= start && now < start + self.tolerance
        })
    }

    /// Next start of `window` at or after `now`.
    pub fn next_start(&self, window: Window, now: DateTime<Utc>) -> DateTime<Utc> {
        let start = self.spec(window).target_in_week_of(now);
        if start >= now {
            start
        } else {
            start + Duration::days(7)
        }
    }

    /// Pure decision rule: what to do at `now` given the persisted record.
    pub fn decide(&self, now: DateTime<Utc>, state: &PersistedState) -> Decision {
        let week = state.scoped_to(&week_identifier(now));

        match self.window_at(now) {
            None => Decision::Idle(IdleReason::OutsideWindow),
            Some(Window::Primary) => {
                if week.primary_attempted || week.primary_attempt_succeeded {
                    Decision::Idle(IdleReason::PrimaryAlreadyAttempted)
                } else {
                    Decision::Run(Window::Primary)
                }
            }
            Some(Window::Fallback) => {
                if week.purchased() {
                    Decision::Idle(IdleReason::AlreadyPurchased)
                } else if week.fallback_attempted {
                    Decision::Idle(IdleReason::FallbackAlreadyAttempted)
                } else {
                    Decision::Run(Window::Fallback)
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// What one evaluation did.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub at: DateTime<Utc>,
    pub week: String,
    pub decision: Decision,
    pub outcome: Option<AttemptOutcome>,
}

pub struct Scheduler {
    schedule: WeeklySchedule,
    purchaser: Purchaser,
    store: Arc<dyn StateStore>,
    alerter: Alerter,
    /// Last record this process decided on, whether or not it reached disk.
    remembered: Mutex<Option<PersistedState>>,
}

impl Scheduler {
    pub fn new(
        schedule: WeeklySchedule,
        purchaser: Purchaser,
        store: Arc<dyn StateStore>,
        alerter: Alerter,
    ) -> Self {
        Self {
            schedule,
            purchaser,
            store,
            alerter,
            remembered: Mutex::new(None),
        }
    }

    pub fn schedule(&self) -> &WeeklySchedule {
        &self.schedule
    }

    pub fn purchaser(&self) -> &Purchaser {
        &self.purchaser
    }

    /// Current record as stored.
    pub fn state(&self) -> PersistedState {
        self.store.load()
    }

    /// Evaluate the decision rule at `now` and act on it.
    pub async fn evaluate(&self, now: DateTime<Utc>) -> Evaluation {
        let week = week_identifier(now);
        let state = self.current_record(&week);
        let decision = self.schedule.decide(now, &state);

        let Decision::Run(window) = decision else {
            debug!(week = %week, decision = %decision, "Scheduler idle");
            return Evaluation {
                at: now,
                week,
                decision,
                outcome: None,
            };
        };

        let mut record = state;
        match window {
            Window::Primary => record.primary_attempted = true,
            Window::Fallback => record.fallback_attempted = true,
        }
        self.remember(&record);
        if let Err(e) = self.store.save(&record) {
            error!(
                window = %window,
                week = %week,
                error = %e,
                "Could not mark window as attempted, skipping purchase"
            );
            let outcome = AttemptOutcome::StateUnavailable(format!("{e:#}"));
            self.report(window, &week, &outcome).await;
            return Evaluation {
                at: now,
                week,
                decision,
                outcome: Some(outcome),
            };
        }

        info!(window = %window, week = %week, mode = "live", "Starting purchase attempt");
        let outcome = self.purchaser.attempt(ExecutionMode::Live).await;

        match window {
            Window::Primary => record.primary_attempt_succeeded = outcome.is_success(),
            Window::Fallback => record.fallback_attempt_succeeded = outcome.is_success(),
        }
        self.remember(&record);
        self.persist(&record);
        self.report(window, &week, &outcome).await;

        Evaluation {
            at: now,
            week,
            decision,
            outcome: Some(outcome),
        }
    }

    /// Stored record for `week`, merged with what this process remembers.
    fn current_record(&self, week: &str) -> PersistedState {
        let stored = self.store.load();
        match &*self.remembered.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(mem) => stored.merged_with(mem, week),
            None => stored.scoped_to(week),
        }
    }

    fn remember(&self, record: &PersistedState) {
        *self.remembered.lock().unwrap_or_else(|e| e.into_inner()) = Some(record.clone());
    }

    fn persist(&self, record: &PersistedState) {
        if let Err(e) = self.store.save(record) {
            error!(error = %e, state = %record, "Failed to save state");
        }
    }

    async fn report(&self, window: Window, week: &str, outcome: &AttemptOutcome) {
        match (window, outcome) {
            (_, AttemptOutcome::Success { .. }) => {
                info!(window = %window, week, outcome = %outcome, "Weekly purchase complete");
                self.alerter
                    .send(
                        AlertLevel::Success,
                        &format!("{window} purchase for {week}: {outcome}"),
                    )
                    .await;
            }
            (Window::Primary, _) => {
                let retry_at = self.schedule.fallback;
                warn!(
                    window = %window,
                    week,
                    reason = %outcome,
                    fallback = %retry_at,
                    "Primary attempt failed, fallback scheduled"
                );
                self.alerter
                    .send(
                        AlertLevel::Warning,
                        &format!("primary attempt for {week} failed: {outcome}. Fallback on {retry_at}"),
                    )
                    .await;
            }
            (Window::Fallback, _) => {
                error!(
                    window = %window,
                    week,
                    reason = %outcome,
                    "Fallback attempt failed, no purchase this week"
                );
                self.alerter
                    .send(
                        AlertLevel::Error,
                        &format!("fallback attempt for {week} failed: {outcome}. No purchase this week"),
                    )
                    .await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
