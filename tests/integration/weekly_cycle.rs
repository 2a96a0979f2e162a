//! Weekly cycle scenarios: primary, fallback, restarts and week rollover.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

use dca_bot::alerts::Alerter;
use dca_bot::engine::clock::ManualClock;
use dca_bot::engine::mode::run_live;
use dca_bot::engine::purchase::{PurchaseConfig, Purchaser};
use dca_bot::engine::scheduler::{Decision, IdleReason, Scheduler, WeeklySchedule, Window};
use dca_bot::storage::{JsonStateStore, MemoryStateStore, StateStore};
use dca_bot::types::{AttemptOutcome, PersistedState, Side};

use crate::fake_exchange::{FakeExchange, TokioClock};

/// 2026-10-12 is the Monday of ISO week 42.
fn at(day: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, day, h, m, 0).unwrap()
}

fn scheduler(fake: &Arc<FakeExchange>, store: Arc<dyn StateStore>) -> Scheduler {
    Scheduler::new(
        WeeklySchedule::default(),
        Purchaser::new(fake.clone(), PurchaseConfig::default()),
        store,
        Alerter::disabled(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_monday_success_then_idle_all_week() {
    let fake = Arc::new(FakeExchange::new());
    let store = Arc::new(MemoryStateStore::new());
    let s = scheduler(&fake, store.clone());

    let eval = s.evaluate(at(12, 2, 0)).await;
    assert_eq!(eval.week, "2026-W42");
    assert!(eval.outcome.unwrap().is_success());

    // 20% of 1000 EUR at 50 000
    let orders = fake.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, Side::Buy);
    assert_eq!(orders[0].amount, dec!(0.004));
    assert_eq!(orders[0].price, dec!(50000));

    assert_eq!(
        s.evaluate(at(12, 2, 30)).await.decision,
        Decision::Idle(IdleReason::PrimaryAlreadyAttempted)
    );
    assert_eq!(
        s.evaluate(at(18, 2, 0)).await.decision,
        Decision::Idle(IdleReason::AlreadyPurchased)
    );
    assert_eq!(fake.orders().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_fallback_insufficient_amount() {
    let fake = Arc::new(FakeExchange::new());
    fake.set_fill_after(None);
    let store = Arc::new(MemoryStateStore::new());
    let s = scheduler(&fake, store.clone());

    let primary = s.evaluate(at(12, 2, 0)).await;
    assert_eq!(
        primary.outcome,
        Some(AttemptOutcome::OrderTimeout {
            order_id: "FAKE-1".into()
        })
    );
    assert_eq!(fake.cancelled(), vec!["FAKE-1".to_string()]);

    let state = store.load();
    assert!(state.primary_attempted);
    assert!(!state.primary_attempt_succeeded);

    // 20% of 0.10 EUR buys far less than the minimum.
    fake.set_balance(dec!(0.10));
    let fallback = s.evaluate(at(18, 2, 0)).await;
    assert_eq!(fallback.decision, Decision::Run(Window::Fallback));
    assert!(matches!(
        fallback.outcome,
        Some(AttemptOutcome::InsufficientAmount { .. })
    ));
    assert_eq!(fake.orders().len(), 1);

    // Terminal for the week.
    assert_eq!(
        s.evaluate(at(18, 2, 30)).await.decision,
        Decision::Idle(IdleReason::FallbackAlreadyAttempted)
    );
    assert!(store.load().fallback_attempted);
}

#[tokio::test(start_paused = true)]
async fn test_next_week_starts_fresh() {
    let fake = Arc::new(FakeExchange::new());
    fake.fail_next_placements(2);
    let store = Arc::new(MemoryStateStore::new());
    let s = scheduler(&fake, store.clone());

    // Both windows fail in week 42.
    assert!(!s.evaluate(at(12, 2, 0)).await.outcome.unwrap().is_success());
    assert!(!s.evaluate(at(18, 2, 0)).await.outcome.unwrap().is_success());

    // Week 43 Monday runs the primary again.
    let eval = s.evaluate(at(19, 2, 0)).await;
    assert_eq!(eval.week, "2026-W43");
    assert_eq!(eval.decision, Decision::Run(Window::Primary));
    assert!(eval.outcome.unwrap().is_success());

    let state = store.load();
    assert_eq!(state.week_identifier.as_deref(), Some("2026-W43"));
    assert!(state.primary_attempt_succeeded);
    assert!(!state.fallback_attempted);
}

#[tokio::test(start_paused = true)]
async fn test_restart_inside_window_does_not_buy_twice() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bot_state.json");
    let fake = Arc::new(FakeExchange::new());

    let first = scheduler(&fake, Arc::new(JsonStateStore::new(&path)));
    assert!(first.evaluate(at(12, 2, 0)).await.outcome.unwrap().is_success());
    drop(first);

    let restarted = scheduler(&fake, Arc::new(JsonStateStore::new(&path)));
    let eval = restarted.evaluate(at(12, 2, 20)).await;
    assert_eq!(
        eval.decision,
        Decision::Idle(IdleReason::PrimaryAlreadyAttempted)
    );
    assert_eq!(fake.orders().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_crash_mid_primary_leads_to_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bot_state.json");

    // What a crash right after marking the primary leaves on disk.
    let store = JsonStateStore::new(&path);
    store
        .save(&PersistedState {
            week_identifier: Some("2026-W42".into()),
            primary_attempted: true,
            ..PersistedState::default()
        })
        .unwrap();

    let fake = Arc::new(FakeExchange::new());
    let s = scheduler(&fake, Arc::new(JsonStateStore::new(&path)));

    assert_eq!(
        s.evaluate(at(12, 2, 10)).await.decision,
        Decision::Idle(IdleReason::PrimaryAlreadyAttempted)
    );
    assert!(fake.orders().is_empty());

    let fallback = s.evaluate(at(18, 2, 0)).await;
    assert!(fallback.outcome.unwrap().is_success());
    let state = JsonStateStore::new(&path).load();
    assert!(state.fallback_attempt_succeeded);
    assert!(state.purchased());
}

#[tokio::test(start_paused = true)]
async fn test_live_loop_places_exactly_one_order() {
    let fake = Arc::new(FakeExchange::new());
    let store = Arc::new(MemoryStateStore::new());
    let s = scheduler(&fake, store.clone());
    let clock = TokioClock::starting_at(at(12, 1, 30));

    let shutdown = tokio::time::sleep(Duration::hours(3).to_std().unwrap());
    let attempts = run_live(&s, &clock, std::time::Duration::from_secs(60), shutdown).await;

    assert_eq!(attempts, 1);
    assert_eq!(fake.orders().len(), 1);
    assert!(store.load().primary_attempt_succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_unwritable_state_dir_places_no_orders() {
    // The state file's parent is a regular file, so every save fails.
    let blocker = tempfile::NamedTempFile::new().unwrap();
    let path = blocker.path().join("bot_state.json");
    let fake = Arc::new(FakeExchange::new());
    let s = scheduler(&fake, Arc::new(JsonStateStore::new(&path)));

    let first = s.evaluate(at(12, 2, 0)).await;
    assert!(matches!(
        first.outcome,
        Some(AttemptOutcome::StateUnavailable(_))
    ));
    for minute in [1, 2, 59] {
        assert!(s.evaluate(at(12, 2, minute)).await.outcome.is_none());
    }
    assert!(fake.orders().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_polls_inside_window_buy_once() {
    let fake = Arc::new(FakeExchange::new());
    let stale = PersistedState {
        week_identifier: Some("2026-W41".into()),
        primary_attempted: true,
        primary_attempt_succeeded: true,
        ..PersistedState::default()
    };
    let store = Arc::new(MemoryStateStore::with_state(stale));
    let s = scheduler(&fake, store.clone());

    // Wall clock frozen inside the primary window while the loop polls.
    let clock = ManualClock::new(at(12, 2, 15));
    let shutdown = tokio::time::sleep(std::time::Duration::from_secs(10 * 60));
    let attempts = run_live(&s, &clock, std::time::Duration::from_secs(60), shutdown).await;

    assert_eq!(attempts, 1);
    assert_eq!(fake.orders().len(), 1);
    let state = store.load();
    assert_eq!(state.week_identifier.as_deref(), Some("2026-W42"));
    assert!(state.primary_attempt_succeeded);
}
