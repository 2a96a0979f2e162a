//! Configuration loading from TOML with environment variable overrides.
//!
//! Reads `config.toml` (optional; every section has defaults) and then
//! applies the environment variables the deployment sets (`DRY_RUN`,
//! `TEST_MODE`, `BALANCE_PERCENTAGE`, ...). Secrets are referenced by
//! env-var name and resolved at startup into `SecretString`s.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::exchange::kraken::{KrakenCredentials, DEFAULT_BASE_URL, DEFAULT_BID_LEVEL};
use crate::storage::DEFAULT_STATE_FILE;
use crate::types::BotError;

/// Default config file path, overridable with `DCA_CONFIG`.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Upper bound for any minute-valued setting: one week.
pub const MAX_MINUTES: u64 = 7 * 24 * 60;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub trading: TradingConfig,
    pub schedule: ScheduleConfig,
    pub exchange: ExchangeConfig,
    pub alerts: AlertsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BotConfig {
    /// Simulate order placement; one evaluation then exit.
    pub dry_run: bool,
    /// One real minimum-size purchase, then exit. Wins over `dry_run`.
    pub test_mode: bool,
    pub state_file: String,
    /// Seconds between scheduler evaluations in live mode.
    pub poll_interval_secs: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            test_mode: false,
            state_file: DEFAULT_STATE_FILE.to_string(),
            poll_interval_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TradingConfig {
    /// `BASE/QUOTE`, e.g. `BTC/EUR`.
    pub symbol: String,
    pub min_coin_amount: f64,
    /// Fraction of the quote balance spent per purchase (0.20 = 20%).
    pub spend_fraction: f64,
    /// Decimal places the exchange accepts for order volume.
    pub amount_precision: u32,
    /// Decimal places the exchange accepts for the limit price.
    pub price_precision: u32,
    pub order_timeout_minutes: u64,
    pub fill_poll_interval_secs: u64,
    /// Test mode only.
    pub max_retries: u32,
    /// Test mode only.
    pub retry_delay_seconds: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: "BTC/EUR".to_string(),
            min_coin_amount: 0.00005,
            spend_fraction: 0.20,
            amount_precision: 8,
            price_precision: 1,
            order_timeout_minutes: 5,
            fill_poll_interval_secs: 10,
            max_retries: 10,
            retry_delay_seconds: 5,
        }
    }
}

impl TradingConfig {
    pub fn base_currency(&self) -> &str {
        self.symbol.split_once('/').map(|(b, _)| b).unwrap_or(&self.symbol)
    }

    pub fn quote_currency(&self) -> &str {
        self.symbol.split_once('/').map(|(_, q)| q).unwrap_or("EUR")
    }
}

/// Weekly windows. Days accept `Mon`/`Monday` etc.; times are `HH:MM` UTC.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    pub primary_day: String,
    pub primary_time: String,
    pub fallback_day: String,
    pub fallback_time: String,
    /// Width of each window after its target time.
    pub window_minutes: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            primary_day: "Mon".to_string(),
            primary_time: "02:00".to_string(),
            fallback_day: "Sun".to_string(),
            fallback_time: "02:00".to_string(),
            window_minutes: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,
    /// 1-based bid level used as the limit price.
    pub bid_level: usize,
    pub request_timeout_secs: u64,
    pub api_key_env: String,
    pub api_secret_env: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            bid_level: DEFAULT_BID_LEVEL,
            request_timeout_secs: 30,
            api_key_env: "KRAKEN_API_KEY".to_string(),
            api_secret_env: "KRAKEN_API_SECRET".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlertsConfig {
    pub telegram_enabled: bool,
    pub telegram_bot_token_env: String,
    pub telegram_chat_id_env: String,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            telegram_enabled: false,
            telegram_bot_token_env: "TELEGRAM_BOT_TOKEN".to_string(),
            telegram_chat_id_env: "TELEGRAM_CHAT_ID".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
    /// Log timestamp zone: unset/`UTC` for UTC, anything else for host local.
    /// Scheduling is always UTC regardless.
    pub timezone: Option<String>,
}

impl LoggingConfig {
    pub fn use_utc(&self) -> bool {
        match self.timezone.as_deref() {
            None => true,
            Some(tz) => tz.is_empty() || tz.eq_ignore_ascii_case("utc"),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Load the file named by `DCA_CONFIG` (or the default), apply process
    /// environment overrides and validate.
    pub fn from_env() -> Result<Self> {
        let path =
            std::env::var("DCA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let mut config = Self::load(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), BotError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DRY_RUN") {
            self.bot.dry_run = parse_bool("DRY_RUN", &v)?;
        }
        if let Some(v) = get("TEST_MODE") {
            self.bot.test_mode = parse_bool("TEST_MODE", &v)?;
        }
        if let Some(v) = get("STATE_FILE") {
            self.bot.state_file = v;
        }
        if let Some(v) = get("TRADING_SYMBOL") {
            self.trading.symbol = v;
        }
        if let Some(v) = get("MIN_BTC_AMOUNT") {
            self.trading.min_coin_amount = parse_num("MIN_BTC_AMOUNT", &v)?;
        }
        if let Some(v) = get("BALANCE_PERCENTAGE") {
            let pct: f64 = parse_num("BALANCE_PERCENTAGE", &v)?;
            self.trading.spend_fraction = pct / 100.0;
        }
        if let Some(v) = get("ORDER_TIMEOUT_MINUTES") {
            self.trading.order_timeout_minutes = parse_num("ORDER_TIMEOUT_MINUTES", &v)?;
        }
        if let Some(v) = get("MAX_RETRIES") {
            self.trading.max_retries = parse_num("MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("RETRY_DELAY_SECONDS") {
            self.trading.retry_delay_seconds = parse_num("RETRY_DELAY_SECONDS", &v)?;
        }
        // MONDAY_TIME / SUNDAY_TIME are the older names; the new ones win.
        if let Some(v) = get("PRIMARY_TIME").or_else(|| get("MONDAY_TIME")) {
            self.schedule.primary_time = v;
        }
        if let Some(v) = get("FALLBACK_TIME").or_else(|| get("SUNDAY_TIME")) {
            self.schedule.fallback_time = v;
        }
        if let Some(v) = get("TELEGRAM_ENABLED") {
            self.alerts.telegram_enabled = parse_bool("TELEGRAM_ENABLED", &v)?;
        }
        if let Some(v) = get("TZ") {
            self.logging.timezone = Some(v);
        }
        if get("DCA_LOG_JSON").is_some() {
            self.logging.json = true;
        }
        Ok(())
    }

    /// Reject values that would make the bot misbehave rather than fail.
    pub fn validate(&self) -> Result<(), BotError> {
        let t = &self.trading;
        if !t.symbol.contains('/') {
            return Err(BotError::Config(format!(
                "trading symbol must look like BASE/QUOTE, got {}",
                t.symbol
            )));
        }
        if !(t.spend_fraction > 0.0 && t.spend_fraction <= 1.0) {
            return Err(BotError::Config(format!(
                "spend fraction must be in (0, 1], got {}",
                t.spend_fraction
            )));
        }
        if t.min_coin_amount <= 0.0 {
            return Err(BotError::Config(format!(
                "minimum coin amount must be positive, got {}",
                t.min_coin_amount
            )));
        }
        if t.order_timeout_minutes == 0 || t.fill_poll_interval_secs == 0 {
            return Err(BotError::Config(
                "order timeout and fill poll interval must be non-zero".into(),
            ));
        }
        if self.bot.poll_interval_secs == 0 {
            return Err(BotError::Config("poll interval must be non-zero".into()));
        }
        if t.order_timeout_minutes > MAX_MINUTES || self.schedule.window_minutes > MAX_MINUTES {
            return Err(BotError::Config(format!(
                "order timeout ({} min) and schedule window ({} min) may not exceed one week",
                t.order_timeout_minutes, self.schedule.window_minutes
            )));
        }
        if self.schedule.window_minutes * 60 < self.bot.poll_interval_secs {
            return Err(BotError::Config(format!(
                "schedule window ({} min) is shorter than the poll interval ({} s); windows could be skipped",
                self.schedule.window_minutes, self.bot.poll_interval_secs
            )));
        }
        if self.exchange.bid_level == 0 {
            return Err(BotError::Config("bid level is 1-based".into()));
        }
        Ok(())
    }

    /// Resolve exchange credentials from the environment. Missing
    /// credentials are fatal in every mode: even a dry run reads balances.
    pub fn credentials<F>(&self, lookup: F) -> Result<KrakenCredentials, BotError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = resolve(&lookup, &self.exchange.api_key_env)?;
        let secret = resolve(&lookup, &self.exchange.api_secret_env)?;
        Ok(KrakenCredentials::new(key, secret))
    }

    /// Telegram token and chat id when alerts are enabled.
    pub fn telegram<F>(&self, lookup: F) -> Result<Option<(SecretString, String)>, BotError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if !self.alerts.telegram_enabled {
            return Ok(None);
        }
        let token = resolve(&lookup, &self.alerts.telegram_bot_token_env)?;
        let chat_id = resolve(&lookup, &self.alerts.telegram_chat_id_env)?;
        Ok(Some((SecretString::new(token), chat_id)))
    }
}

fn resolve<F>(lookup: &F, env_name: &str) -> Result<String, BotError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(env_name)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| BotError::Config(format!("Environment variable not set: {env_name}")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, BotError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(BotError::Config(format!("{key}: expected a boolean, got {other}"))),
    }
}

fn parse_num<T: FromStr>(key: &str, raw: &str) -> Result<T, BotError> {
    raw.trim()
        .parse()
        .map_err(|_| BotError::Config(format!("{key}: invalid number {raw}")))
}
