//! Kraken spot exchange integration.
//!
//! API docs: https://docs.kraken.com/api/
//! Base URL: https://api.kraken.com
//! Public endpoints: `GET /0/public/Depth`
//! Private endpoints: `POST /0/private/{Balance,AddOrder,QueryOrders,CancelOrder}`
//!
//! Auth: every private request carries a strictly increasing `nonce` in its
//! form body plus two headers:
//! - `API-Key`: the public key
//! - `API-Sign`: base64(HMAC-SHA512(base64decode(secret), path ‖ SHA256(nonce ‖ body)))
//!
//! Kraken prefixes legacy asset codes (`ZEUR`, `XXBT`) and calls bitcoin
//! `XBT`; the helpers below translate between those and plain tickers.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::ExchangeClient;
use crate::types::{OrderStatus, Side};

type HmacSha512 = Hmac<Sha512>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://api.kraken.com";

/// Book level used as the limit price when none is configured (1-based).
pub const DEFAULT_BID_LEVEL: usize = 3;

const USER_AGENT: &str = "dca-bot/0.1.0";

// ---------------------------------------------------------------------------
// API response types (Kraken JSON → Rust)
// ---------------------------------------------------------------------------

/// Every Kraken response is wrapped in `{ "error": [...], "result": ... }`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    error: Vec<String>,
    result: Option<T>,
}

/// One side of `/0/public/Depth`: `[price, volume, timestamp]` triples.
#[derive(Debug, Deserialize)]
struct Book {
    #[serde(default)]
    bids: Vec<(String, String, serde_json::Value)>,
}

#[derive(Debug, Deserialize)]
struct AddOrderResult {
    #[serde(default)]
    txid: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OrderInfo {
    status: String,
    #[serde(default)]
    vol_exec: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CancelResult {
    #[serde(default)]
    count: u32,
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// API key pair. Both halves stay wrapped until the request is signed.
#[derive(Debug)]
pub struct KrakenCredentials {
    pub api_key: SecretString,
    pub api_secret: SecretString,
}

impl KrakenCredentials {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key: SecretString::new(api_key),
            api_secret: SecretString::new(api_secret),
        }
    }
}

/// Compute the `API-Sign` header for a private request.
pub fn sign(secret_b64: &str, path: &str, nonce: u64, post_data: &str) -> Result<String> {
    let key = STANDARD
        .decode(secret_b64)
        .context("Kraken API secret is not valid base64")?;

    let mut sha = Sha256::new();
    sha.update(nonce.to_string().as_bytes());
    sha.update(post_data.as_bytes());
    let digest = sha.finalize();

    let mut mac =
        HmacSha512::new_from_slice(&key).map_err(|e| anyhow!("Invalid HMAC key: {e}"))?;
    mac.update(path.as_bytes());
    mac.update(&digest);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct KrakenClient {
    http: Client,
    base_url: String,
    credentials: Option<KrakenCredentials>,
    bid_level: usize,
    last_nonce: AtomicU64,
}

impl KrakenClient {
    /// Create a new Kraken client.
    ///
    /// `credentials` are only needed for private endpoints; price lookups
    /// work without them. `timeout` bounds every individual request.
    pub fn new(
        credentials: Option<KrakenCredentials>,
        base_url: Option<String>,
        bid_level: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client for Kraken")?;

        Ok(Self {
            http,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            credentials,
            bid_level: bid_level.max(1),
            last_nonce: AtomicU64::new(0),
        })
    }

    // -- Internal helpers ------------------------------------------------

    /// Millisecond nonce, bumped if the clock has not moved since the last one.
    fn next_nonce(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut prev = self.last_nonce.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match self.last_nonce.compare_exchange(
                prev,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    async fn public<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "Kraken public request");

        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Kraken request {path} failed"))?;

        Self::read_response(path, resp).await
    }

    async fn private<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let creds = self
            .credentials
            .as_ref()
            .context("Kraken API credentials required for private endpoints")?;

        let nonce = self.next_nonce();
        let body = encode_form(nonce, params);
        let signature = sign(creds.api_secret.expose_secret(), path, nonce, &body)?;

        debug!(path, "Kraken private request");

        let resp = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header("API-Key", creds.api_key.expose_secret().as_str())
            .header("API-Sign", signature)
            .header(
                "Content-Type",
                "application/x-www-form-urlencoded; charset=utf-8",
            )
            .body(body)
            .send()
            .await
            .with_context(|| format!("Kraken request {path} failed"))?;

        Self::read_response(path, resp).await
    }

    async fn read_response<T: DeserializeOwned>(path: &str, resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .with_context(|| format!("Failed to read Kraken {path} response"))?;

        if !status.is_success() {
            anyhow::bail!("Kraken API error {status} on {path}: {body}");
        }

        parse_envelope(path, &body)
    }
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

fn parse_envelope<T: DeserializeOwned>(path: &str, body: &str) -> Result<T> {
    let envelope: Envelope<T> = serde_json::from_str(body)
        .with_context(|| format!("Failed to parse Kraken {path} response"))?;

    if !envelope.error.is_empty() {
        anyhow::bail!("Kraken {path} rejected: {}", envelope.error.join(", "));
    }

    envelope
        .result
        .with_context(|| format!("Kraken {path} response has no result"))
}

fn encode_form(nonce: u64, params: &[(&str, String)]) -> String {
    let mut body = format!("nonce={nonce}");
    for (key, value) in params {
        body.push('&');
        body.push_str(key);
        body.push('=');
        body.push_str(&urlencoding::encode(value));
    }
    body
}

/// `BTC/EUR` → `XBTEUR`. Pairs without a separator pass through.
pub fn kraken_pair(pair: &str) -> String {
    match pair.split_once('/') {
        Some((base, quote)) => format!("{}{}", kraken_asset(base), kraken_asset(quote)),
        None => pair.to_uppercase(),
    }
}

fn kraken_asset(ticker: &str) -> String {
    match ticker.to_uppercase().as_str() {
        "BTC" => "XBT".to_string(),
        other => other.to_string(),
    }
}

/// Balance for `currency`, tolerant of Kraken's `X`/`Z` prefixed codes.
/// An asset missing from the response means a zero balance.
fn find_balance(balances: &HashMap<String, String>, currency: &str) -> Result<Decimal> {
    let code = kraken_asset(currency);
    let candidates = [
        code.clone(),
        format!("Z{code}"),
        format!("X{code}"),
        currency.to_uppercase(),
    ];

    match candidates.iter().find_map(|c| balances.get(c)) {
        Some(raw) => Decimal::from_str(raw)
            .with_context(|| format!("Invalid Kraken balance for {currency}: {raw}")),
        None => Ok(Decimal::ZERO),
    }
}

/// Bid price at 1-based `level` of the first book in the response.
fn bid_at_level(books: &HashMap<String, Book>, level: usize) -> Result<Decimal> {
    let book = books
        .values()
        .next()
        .context("Kraken depth response contains no book")?;

    let (price, _, _) = book.bids.get(level - 1).with_context(|| {
        format!(
            "Not enough bid levels in the order book ({} < {level})",
            book.bids.len()
        )
    })?;

    Decimal::from_str(price).with_context(|| format!("Invalid Kraken bid price: {price}"))
}

fn map_status(raw: &str) -> Result<OrderStatus> {
    match raw {
        "pending" | "open" => Ok(OrderStatus::Pending),
        "closed" => Ok(OrderStatus::Filled),
        "canceled" | "cancelled" | "expired" => Ok(OrderStatus::Cancelled),
        other => Err(anyhow!("Unknown Kraken order status: {other}")),
    }
}

/// Status with executed volume folded in: a closed-but-not-filled order
/// that executed anything is a partial fill.
fn order_status(info: &OrderInfo) -> Result<OrderStatus> {
    let status = map_status(&info.status)?;
    let executed = match info.vol_exec.as_deref() {
        Some(raw) => Decimal::from_str(raw)
            .with_context(|| format!("Invalid Kraken executed volume: {raw}"))?,
        None => Decimal::ZERO,
    };
    Ok(match status {
        OrderStatus::Cancelled if executed > Decimal::ZERO => {
            OrderStatus::PartiallyFilled(executed.normalize())
        }
        other => other,
    })
}

// ---------------------------------------------------------------------------
// ExchangeClient trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ExchangeClient for KrakenClient {
    async fn get_balance(&self, currency: &str) -> Result<Decimal> {
        let balances: HashMap<String, String> =
            self.private("/0/private/Balance", &[]).await?;
        let balance = find_balance(&balances, currency)?;
        debug!(currency, balance = %balance, "Kraken balance fetched");
        Ok(balance)
    }

    /// Bid at the configured book level rather than the top of book, so
    /// the limit order sits slightly below the best bid.
    async fn get_price(&self, pair: &str) -> Result<Decimal> {
        let kpair = kraken_pair(pair);
        let count = self.bid_level.to_string();
        let books: HashMap<String, Book> = self
            .public("/0/public/Depth", &[("pair", kpair.as_str()), ("count", count.as_str())])
            .await?;
        let price = bid_at_level(&books, self.bid_level)?;
        debug!(pair, level = self.bid_level, price = %price, "Kraken bid fetched");
        Ok(price)
    }

    async fn place_limit_order(
        &self,
        pair: &str,
        side: Side,
        amount: Decimal,
        price: Decimal,
    ) -> Result<String> {
        let params = [
            ("ordertype", "limit".to_string()),
            ("pair", kraken_pair(pair)),
            ("price", price.to_string()),
            ("type", side.as_str().to_string()),
            ("volume", amount.to_string()),
        ];
        let result: AddOrderResult = self.private("/0/private/AddOrder", &params).await?;

        let order_id = result
            .txid
            .into_iter()
            .next()
            .context("Kraken AddOrder returned no transaction id")?;

        info!(
            order_id = %order_id,
            pair,
            side = %side,
            amount = %amount,
            price = %price,
            "Kraken limit order placed"
        );
        Ok(order_id)
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatus> {
        let orders: HashMap<String, OrderInfo> = self
            .private("/0/private/QueryOrders", &[("txid", order_id.to_string())])
            .await?;

        let info = orders
            .get(order_id)
            .or_else(|| orders.values().next())
            .with_context(|| format!("Kraken has no record of order {order_id}"))?;

        debug!(
            order_id,
            status = %info.status,
            vol_exec = info.vol_exec.as_deref().unwrap_or("0"),
            "Kraken order status"
        );
        order_status(info)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let result: CancelResult = self
            .private("/0/private/CancelOrder", &[("txid", order_id.to_string())])
            .await?;
        info!(order_id, cancelled = result.count, "Kraken order cancel acknowledged");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
