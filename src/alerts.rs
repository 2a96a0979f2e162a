//! Outbound alerts.
//!
//! Sends attempt outcomes to a Telegram chat through the Bot API
//! `sendMessage` endpoint. Delivery is best-effort: failures are logged
//! and never reach the caller.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

/// Severity of an alert; controls the message prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Info => write!(f, "INFO"),
            AlertLevel::Success => write!(f, "SUCCESS"),
            AlertLevel::Warning => write!(f, "WARNING"),
            AlertLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Prefix a message with its level marker.
pub fn format_message(level: AlertLevel, message: &str) -> String {
    match level {
        AlertLevel::Info => message.to_string(),
        AlertLevel::Success => format!("✅ SUCCESS: {message}"),
        AlertLevel::Warning => format!("⚠️ WARNING: {message}"),
        AlertLevel::Error => format!("🚨 ERROR: {message}"),
    }
}

struct TelegramTarget {
    http: Client,
    base_url: String,
    token: SecretString,
    chat_id: String,
}

/// Alert sink. A disabled alerter accepts every call and does nothing.
pub struct Alerter {
    telegram: Option<TelegramTarget>,
}

impl Alerter {
    pub fn disabled() -> Self {
        Self { telegram: None }
    }

    /// `base_url` defaults to the public Bot API.
    pub fn telegram(
        token: SecretString,
        chat_id: String,
        base_url: Option<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client for Telegram")?;

        Ok(Self {
            telegram: Some(TelegramTarget {
                http,
                base_url: base_url
                    .unwrap_or_else(|| DEFAULT_TELEGRAM_API.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                token,
                chat_id,
            }),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.telegram.is_some()
    }

    /// Best-effort delivery: failures are logged and swallowed.
    pub async fn send(&self, level: AlertLevel, message: &str) {
        match self.try_send(level, message).await {
            Ok(true) => debug!(level = %level, "Telegram alert sent"),
            Ok(false) => {}
            Err(e) => warn!(level = %level, error = %e, "Telegram alert failed"),
        }
    }

    /// Deliver one alert. `Ok(false)` when alerts are disabled.
    pub async fn try_send(&self, level: AlertLevel, message: &str) -> Result<bool> {
        let Some(target) = &self.telegram else {
            return Ok(false);
        };

        let url = format!(
            "{}/bot{}/sendMessage",
            target.base_url,
            target.token.expose_secret()
        );
        let body = serde_json::json!({
            "chat_id": target.chat_id,
            "text": format_message(level, message),
        });

        // The URL carries the bot token; keep it out of the error.
        let resp = target
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("request failed: {}", e.without_url()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Telegram rejected alert ({status}): {body}"));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_format_message_prefixes() {
        assert_eq!(format_message(AlertLevel::Info, "hi"), "hi");
        assert_eq!(format_message(AlertLevel::Success, "done"), "✅ SUCCESS: done");
        assert_eq!(format_message(AlertLevel::Warning, "hmm"), "⚠️ WARNING: hmm");
        assert_eq!(format_message(AlertLevel::Error, "boom"), "🚨 ERROR: boom");
    }

    /// Serve one HTTP request with `status` and `body`; returns the base URL
    /// and a handle yielding the raw request text.
    async fn one_shot_server(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                if request_complete(&raw) {
                    break;
                }
            }
            let request = String::from_utf8_lossy(&raw).into_owned();
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });
        (format!("http://{addr}"), handle)
    }

    /// Headers received and `content-length` bytes of body after them.
    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(head_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..head_end]
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        raw.len() >= head_end + 4 + length
    }

    fn alerter(base_url: String) -> Alerter {
        Alerter::telegram(
            SecretString::new("123:abc".to_string()),
            "42".to_string(),
            Some(base_url),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_disabled_alerter_is_noop() {
        let alerter = Alerter::disabled();
        assert!(!alerter.is_enabled());
        assert!(!alerter.try_send(AlertLevel::Error, "ignored").await.unwrap());
        alerter.send(AlertLevel::Error, "ignored").await;
    }

    #[tokio::test]
    async fn test_send_posts_to_bot_endpoint() {
        let (url, server) = one_shot_server("200 OK", r#"{"ok":true}"#).await;
        let alerter = alerter(url);

        assert!(alerter.try_send(AlertLevel::Success, "bought").await.unwrap());

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /bot123:abc/sendMessage"));
        assert!(request.contains(r#""chat_id":"42""#));
        assert!(request.contains("SUCCESS: bought"));
    }

    #[tokio::test]
    async fn test_rejected_alert_is_an_error() {
        let (url, server) = one_shot_server(
            "400 Bad Request",
            r#"{"ok":false,"description":"Bad Request: chat not found"}"#,
        )
        .await;
        let alerter = alerter(url);

        let err = alerter
            .try_send(AlertLevel::Error, "boom")
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("400"));
        assert!(err.contains("chat not found"));
        assert!(!err.contains("123:abc"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_hides_token() {
        // Bind then drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let alerter = alerter(format!("http://{addr}"));

        let err = alerter
            .try_send(AlertLevel::Warning, "hmm")
            .await
            .unwrap_err()
            .to_string();
        assert!(!err.contains("123:abc"));
        // Best-effort path swallows the same failure.
        alerter.send(AlertLevel::Warning, "hmm").await;
    }
}
