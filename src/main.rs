//! DCA bot: weekly Kraken purchase with a Sunday fallback attempt.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the exchange client and dispatches to the selected run mode:
//! the live scheduler loop, a one-shot dry run or a one-shot test buy.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use dca_bot::alerts::{AlertLevel, Alerter};
use dca_bot::config::AppConfig;
use dca_bot::engine::clock::{Clock, SystemClock};
use dca_bot::engine::mode::{self, RunMode};
use dca_bot::engine::purchase::{PurchaseConfig, Purchaser};
use dca_bot::engine::scheduler::{Scheduler, WeeklySchedule, Window};
use dca_bot::exchange::kraken::KrakenClient;
use dca_bot::metrics::PurchaseMetrics;
use dca_bot::storage::{JsonStateStore, StateStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Config errors are fatal before anything touches the exchange
    let cfg = AppConfig::from_env()?;

    init_logging(&cfg);

    let run_mode = RunMode::select(cfg.bot.dry_run, cfg.bot.test_mode);
    let schedule = WeeklySchedule::from_config(&cfg.schedule)?;
    info!(
        mode = %run_mode,
        symbol = %cfg.trading.symbol,
        spend_fraction = cfg.trading.spend_fraction,
        min_amount = cfg.trading.min_coin_amount,
        primary = %schedule.primary,
        fallback = %schedule.fallback,
        "DCA bot starting up"
    );

    // -- Initialise components -------------------------------------------

    let env = |key: &str| std::env::var(key).ok();
    let credentials = cfg.credentials(env)?;
    let kraken = KrakenClient::new(
        Some(credentials),
        Some(cfg.exchange.base_url.clone()),
        cfg.exchange.bid_level,
        Duration::from_secs(cfg.exchange.request_timeout_secs),
    )?;

    let alerter = match cfg.telegram(env)? {
        Some((token, chat_id)) => {
            info!("Telegram alerts enabled");
            Alerter::telegram(token, chat_id, None)?
        }
        None => Alerter::disabled(),
    };
    alerter
        .send(
            AlertLevel::Info,
            &mode::startup_message(
                run_mode,
                &schedule,
                cfg.trading.base_currency(),
                cfg.trading.quote_currency(),
                cfg.trading.spend_fraction,
            ),
        )
        .await;

    let metrics = Arc::new(PurchaseMetrics::new());
    let purchaser = Purchaser::with_metrics(
        Arc::new(kraken),
        PurchaseConfig::from_trading(&cfg.trading)?,
        metrics.clone(),
    );

    let store: Arc<dyn StateStore> = Arc::new(JsonStateStore::new(&cfg.bot.state_file));
    let clock = SystemClock;

    // -- Dispatch --------------------------------------------------------

    match run_mode {
        RunMode::Test => {
            let report = mode::run_test(&purchaser, &alerter).await;
            info!(attempts = report.attempts, outcome = %report.outcome, "Test mode finished");
        }
        RunMode::DryRun => {
            mode::run_dry(&purchaser, &schedule, store.as_ref(), clock.now()).await;
        }
        RunMode::Live => {
            let now = clock.now();
            info!(
                state = %store.load(),
                next_primary = %schedule.next_start(Window::Primary, now),
                next_fallback = %schedule.next_start(Window::Fallback, now),
                state_file = %cfg.bot.state_file,
                "Entering scheduler loop. Press Ctrl+C to stop."
            );
            if !alerter.is_enabled() {
                warn!("Alerts disabled; failures will only appear in the log");
            }

            let scheduler = Scheduler::new(schedule, purchaser, store, alerter);
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            let attempts = mode::run_live(
                &scheduler,
                &clock,
                Duration::from_secs(cfg.bot.poll_interval_secs),
                shutdown,
            )
            .await;
            info!(attempts, "Scheduler stopped");
        }
    }

    metrics.log_summary();
    info!("DCA bot shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging(cfg: &AppConfig) {
    use tracing_subscriber::fmt::time::{ChronoLocal, ChronoUtc};
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dca_bot=info"));

    // Timestamps only; scheduling always runs on UTC.
    match (cfg.logging.json, cfg.logging.use_utc()) {
        (true, true) => fmt()
            .json()
            .with_env_filter(env_filter)
            .with_timer(ChronoUtc::rfc_3339())
            .with_target(true)
            .init(),
        (true, false) => fmt()
            .json()
            .with_env_filter(env_filter)
            .with_timer(ChronoLocal::rfc_3339())
            .with_target(true)
            .init(),
        (false, true) => fmt()
            .with_env_filter(env_filter)
            .with_timer(ChronoUtc::rfc_3339())
            .with_target(true)
            .init(),
        (false, false) => fmt()
            .with_env_filter(env_filter)
            .with_timer(ChronoLocal::rfc_3339())
            .with_target(true)
            .init(),
    }
}
