//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the alert webhook URL) are referenced by env-var name in the
//! config and resolved at runtime into a `SecretString`.
//!
//! Market, tier and alert definitions are checked by [`AppConfig::validate`]
//! before any rebalance task starts; a malformed definition is fatal.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::time::Duration;
use tracing::warn;

use crate::allocation::easing::Easing;
use crate::types::FundbotError;

/// Hard bounds on the lending period accepted by the exchange, in days.
pub const MIN_PERIOD_DAYS: u32 = 2;
pub const MAX_PERIOD_DAYS: u32 = 120;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub markets: Vec<MarketConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// How often each market is rebalanced.
    pub update_interval_minutes: u64,
    /// Minimum gap between any two exchange calls, across all markets.
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
    /// Upper bound on any single exchange call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// How many refresh/wait/re-check rounds before giving up on a balance.
    #[serde(default = "default_settle_max_attempts")]
    pub settle_max_attempts: u32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_rate_limit_ms() -> u64 {
    250
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_settle_max_attempts() -> u32 {
    12
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    /// Only `"paper"` is built in; live connectivity plugs in behind
    /// `FundingExchange`.
    #[serde(default = "default_exchange_mode")]
    pub mode: String,
    /// Seconds between synthetic trade-rate ticks in paper mode.
    #[serde(default = "default_feed_interval_secs")]
    pub feed_interval_secs: u64,
    /// Starting wallets for the paper exchange, keyed by symbol.
    #[serde(default)]
    pub paper: HashMap<String, PaperWalletConfig>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            mode: default_exchange_mode(),
            feed_interval_secs: default_feed_interval_secs(),
            paper: HashMap::new(),
        }
    }
}

fn default_exchange_mode() -> String {
    "paper".to_string()
}

fn default_feed_interval_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaperWalletConfig {
    pub balance: f64,
    /// Reference floating rate, fractional per day.
    pub frr: f64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotificationsConfig {
    /// Name of the env var holding the webhook URL. No URL → log-only alerts.
    pub webhook_url_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

/// One funding market (symbol) and how to ladder offers into it.
#[derive(Debug, Deserialize, Clone)]
pub struct MarketConfig {
    pub symbol: String,
    /// Settle time after cancelling, before reading the available balance.
    #[serde(default = "default_sleep_secs")]
    pub sleep_secs: u64,
    pub min_order_size: f64,
    /// Decimal places used when rounding offer amounts.
    #[serde(default = "default_rounding")]
    pub rounding: u32,
    #[serde(default = "default_min_days")]
    pub min_days: u32,
    #[serde(default = "default_max_days")]
    pub max_days: u32,
    pub tiers: Vec<OfferTier>,
    #[serde(default)]
    pub alerts: Vec<AlertRuleConfig>,
}

fn default_sleep_secs() -> u64 {
    5
}

fn default_rounding() -> u32 {
    5
}

fn default_min_days() -> u32 {
    MIN_PERIOD_DAYS
}

fn default_max_days() -> u32 {
    30
}

impl MarketConfig {
    pub fn settle_duration(&self) -> Duration {
        Duration::from_secs(self.sleep_secs)
    }

    /// Lending period bounds clamped to what the exchange accepts.
    pub fn period_bounds(&self) -> (u32, u32) {
        let lo = self.min_days.clamp(MIN_PERIOD_DAYS, MAX_PERIOD_DAYS);
        let hi = self.max_days.clamp(lo, MAX_PERIOD_DAYS);
        (lo, hi)
    }

    fn validate(&self) -> Result<(), FundbotError> {
        let symbol = &self.symbol;
        if symbol.trim().is_empty() {
            return Err(FundbotError::Config("market symbol must not be empty".into()));
        }
        if !self.min_order_size.is_finite() || self.min_order_size < 0.0 {
            return Err(FundbotError::Config(format!(
                "{symbol}: min_order_size must be a non-negative number"
            )));
        }
        if self.rounding > 12 {
            return Err(FundbotError::Config(format!(
                "{symbol}: rounding of {} decimal places is not supported",
                self.rounding
            )));
        }
        if self.min_days > self.max_days {
            return Err(FundbotError::Config(format!(
                "{symbol}: min_days ({}) exceeds max_days ({})",
                self.min_days, self.max_days
            )));
        }
        if self.tiers.is_empty() {
            return Err(FundbotError::Config(format!("{symbol}: at least one tier is required")));
        }
        for (i, tier) in self.tiers.iter().enumerate() {
            tier.validate()
                .map_err(|msg| FundbotError::Config(format!("{symbol} tier {i}: {msg}")))?;
        }
        for (i, alert) in self.alerts.iter().enumerate() {
            alert
                .validate()
                .map_err(|msg| FundbotError::Config(format!("{symbol} alert {i}: {msg}")))?;
        }

        let total_pct: f64 = self.tiers.iter().map(|t| t.amount).sum();
        if total_pct > 100.0 {
            warn!(
                symbol = %symbol,
                total_pct,
                "Tier amounts exceed 100% of funds; later tiers will be starved"
            );
        }
        Ok(())
    }
}

/// A slice of a market's funds offered within its own rate/period band.
#[derive(Debug, Deserialize, Clone)]
pub struct OfferTier {
    /// Percentage of total funds this tier targets.
    pub amount: f64,
    pub min_order_size: f64,
    pub order_count: u32,
    /// Absolute floors for the ladder ends, in percent per day.
    pub at_least_low: f64,
    pub at_least_high: f64,
    /// Multiples of the reference floating rate for the ladder ends.
    pub frr_multiple_low: f64,
    pub frr_multiple_high: f64,
    #[serde(default = "default_easing")]
    pub easing: String,
    /// Fraction (0–1) by which individual order amounts may vary.
    #[serde(default)]
    pub randomise: f64,
    /// Fraction (0–1) of random spread added to the rate ladder.
    #[serde(default)]
    pub rate_jitter: f64,
    /// Rates (percent per day) mapped onto the shortest and longest period.
    pub lending_period_low: f64,
    pub lending_period_high: f64,
}

fn default_easing() -> String {
    "linear".to_string()
}

impl OfferTier {
    /// The easing curve for this tier; unknown names fall back to linear.
    pub fn easing(&self) -> Easing {
        Easing::parse_or_linear(&self.easing)
    }

    fn validate(&self) -> Result<(), String> {
        let finite = [
            self.amount,
            self.min_order_size,
            self.at_least_low,
            self.at_least_high,
            self.frr_multiple_low,
            self.frr_multiple_high,
            self.randomise,
            self.rate_jitter,
            self.lending_period_low,
            self.lending_period_high,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err("all numeric fields must be finite".into());
        }
        if self.amount <= 0.0 || self.amount > 100.0 {
            return Err(format!("amount must be in (0, 100], got {}", self.amount));
        }
        if self.min_order_size < 0.0 {
            return Err("min_order_size must not be negative".into());
        }
        if self.order_count == 0 {
            return Err("order_count must be at least 1".into());
        }
        if self.at_least_low < 0.0 || self.at_least_low > self.at_least_high {
            return Err("at_least_low must be between 0 and at_least_high".into());
        }
        if self.frr_multiple_low < 0.0 || self.frr_multiple_low > self.frr_multiple_high {
            return Err("frr_multiple_low must be between 0 and frr_multiple_high".into());
        }
        if !(0.0..=1.0).contains(&self.randomise) || !(0.0..=1.0).contains(&self.rate_jitter) {
            return Err("randomise and rate_jitter must be within [0, 1]".into());
        }
        if self.lending_period_low > self.lending_period_high {
            return Err("lending_period_low must not exceed lending_period_high".into());
        }
        if Easing::parse(&self.easing).is_none() {
            warn!(easing = %self.easing, "Unknown easing method, using linear");
        }
        Ok(())
    }
}

/// Alert definition as it appears in the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct AlertRuleConfig {
    /// Threshold in percent per day (0.05 = 0.05% per day).
    pub rate: f64,
    /// Message template; `{{rate}}`, `{{newRate}}`, `{{oldRate}}` and
    /// `{{symbol}}` are substituted.
    pub message: String,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
}

fn default_cooldown_minutes() -> u64 {
    5
}

impl AlertRuleConfig {
    fn validate(&self) -> Result<(), String> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(format!("rate must be a positive percentage, got {}", self.rate));
        }
        if self.message.trim().is_empty() {
            return Err("message must not be empty".into());
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject malformed markets before anything starts.
    pub fn validate(&self) -> Result<(), FundbotError> {
        if self.server.update_interval_minutes == 0 {
            return Err(FundbotError::Config(
                "server.update_interval_minutes must be at least 1".into(),
            ));
        }
        if self.server.settle_max_attempts == 0 {
            return Err(FundbotError::Config(
                "server.settle_max_attempts must be at least 1".into(),
            ));
        }
        if self.markets.is_empty() {
            return Err(FundbotError::Config("no markets configured".into()));
        }

        let mut seen = HashSet::new();
        for market in &self.markets {
            market.validate()?;
            if !seen.insert(market.symbol.to_uppercase()) {
                return Err(FundbotError::Config(format!(
                    "market {} is configured more than once",
                    market.symbol
                )));
            }
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.server.update_interval_minutes * 60)
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.server.rate_limit_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.server.call_timeout_secs)
    }

    /// The webhook URL, if one is configured and its env var is set.
    pub fn webhook_url(&self) -> Option<SecretString> {
        let env = self.notifications.webhook_url_env.as_deref()?;
        match Self::resolve_env(env) {
            Ok(url) if !url.trim().is_empty() => Some(SecretString::new(url)),
            _ => {
                warn!(env, "Webhook URL env var not set; alerts will only be logged");
                None
            }
        }
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
