//! Outbound alert delivery.
//!
//! Defines the `Notifier` trait and two implementations: a webhook
//! poster and a log-only fallback used when no webhook is configured.
//! Delivery failures are reported to the caller, which logs them and
//! moves on; nothing here retries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::types::{format_rate_pct, FundbotError};

/// Name the bot signs its webhook messages with.
const SENDER: &str = "fundbot";

const WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Abstraction over the alert transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one fully formatted message.
    async fn send(&self, message: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Fill an alert template.
///
/// `{{rate}}` is the threshold that was crossed, `{{newRate}}` and
/// `{{oldRate}}` the rates either side of the crossing, all formatted as
/// percentages per day.
pub fn render_template(
    template: &str,
    symbol: &str,
    threshold: f64,
    new_rate: f64,
    old_rate: f64,
) -> String {
    template
        .replace("{{rate}}", &format_rate_pct(threshold))
        .replace("{{newRate}}", &format_rate_pct(new_rate))
        .replace("{{oldRate}}", &format_rate_pct(old_rate))
        .replace("{{symbol}}", symbol)
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    message: &'a str,
    from: &'a str,
}

/// Posts alerts as JSON to a webhook URL.
pub struct WebhookNotifier {
    http: Client,
    url: SecretString,
}

impl WebhookNotifier {
    pub fn new(url: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        let payload = WebhookPayload {
            message,
            from: SENDER,
        };

        let resp = self
            .http
            .post(self.url.expose_secret().as_str())
            .json(&payload)
            .send()
            .await
            .map_err(|e| FundbotError::Notification(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FundbotError::Notification(format!("webhook returned {status}")).into());
        }

        debug!(status = %status, "Webhook delivered");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Log-only
// ---------------------------------------------------------------------------

/// Writes alerts to the log instead of sending them anywhere.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        info!(alert = message, "Alert");
        Ok(())
    }
}

/// Pick the notifier for an optional webhook URL.
pub fn from_webhook(url: Option<SecretString>) -> Result<Box<dyn Notifier>> {
    Ok(match url {
        Some(url) => Box::new(WebhookNotifier::new(url)?),
        None => Box::new(LogNotifier),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
