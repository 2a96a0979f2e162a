//! One-shot modes: dry run and test purchase.

use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

use dca_bot::alerts::Alerter;
use dca_bot::engine::mode::{run_dry, run_test};
use dca_bot::engine::purchase::{PurchaseConfig, Purchaser};
use dca_bot::engine::scheduler::WeeklySchedule;
use dca_bot::storage::{MemoryStateStore, StateStore};
use dca_bot::types::{AttemptOutcome, PersistedState};

use crate::fake_exchange::FakeExchange;

#[tokio::test]
async fn test_dry_run_never_places_or_persists() {
    let fake = Arc::new(FakeExchange::new());
    let purchaser = Purchaser::new(fake.clone(), PurchaseConfig::default());
    let store = MemoryStateStore::new();
    let now = Utc.with_ymd_and_hms(2026, 10, 12, 2, 0, 0).unwrap();

    let outcome = run_dry(&purchaser, &WeeklySchedule::default(), &store, now).await;

    match outcome {
        AttemptOutcome::Success {
            order_id,
            filled_amount,
        } => {
            assert!(order_id.starts_with("dry-run-"));
            assert_eq!(filled_amount, dec!(0.004));
        }
        other => panic!("unexpected outcome: {other}"),
    }
    assert!(fake.orders().is_empty());
    assert_eq!(store.save_count(), 0);
    assert_eq!(store.load(), PersistedState::default());
}

#[tokio::test(start_paused = true)]
async fn test_test_mode_retries_then_buys_minimum() {
    let fake = Arc::new(FakeExchange::new());
    fake.fail_next_placements(2);
    let purchaser = Purchaser::new(fake.clone(), PurchaseConfig::default());

    let report = run_test(&purchaser, &Alerter::disabled()).await;

    assert_eq!(report.attempts, 3);
    assert!(report.outcome.is_success());
    let orders = fake.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].amount, dec!(0.00005));

    let m = purchaser.metrics().snapshot();
    assert_eq!(m.order_attempts, 3);
    assert_eq!(m.order_successes, 1);
    assert_eq!(m.order_failures, 2);
}

#[tokio::test(start_paused = true)]
async fn test_test_mode_gives_up_after_max_retries() {
    let fake = Arc::new(FakeExchange::new());
    fake.fail_next_placements(100);
    let config = PurchaseConfig {
        test_max_retries: 4,
        ..PurchaseConfig::default()
    };
    let purchaser = Purchaser::new(fake.clone(), config);

    let report = run_test(&purchaser, &Alerter::disabled()).await;

    assert_eq!(report.attempts, 4);
    assert!(matches!(report.outcome, AttemptOutcome::ExchangeError(_)));
    assert!(fake.orders().is_empty());
}
