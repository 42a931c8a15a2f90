//! Rate alert evaluation with per-rule cooldowns.
//!
//! Each market owns one `AlertEngine`. It is driven only from the rate
//! tracker task, so cooldown state lives here without any locking.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AlertRuleConfig;
use crate::notifications::{render_template, Notifier};
use crate::types::format_rate_pct;

/// One alert threshold and its cooldown state.
#[derive(Debug, Clone)]
pub struct AlertRule {
    /// Fractional daily rate that triggers the alert.
    pub threshold: f64,
    pub message: String,
    pub cooldown: Duration,
    /// `None` until the rule fires for the first time.
    pub last_triggered: Option<DateTime<Utc>>,
}

impl AlertRule {
    pub fn from_config(cfg: &AlertRuleConfig) -> Self {
        Self {
            threshold: cfg.rate / 100.0,
            message: cfg.message.clone(),
            cooldown: Duration::minutes(cfg.cooldown_minutes as i64),
            last_triggered: None,
        }
    }

    /// Whether an `old → new` move crosses this threshold upwards.
    pub fn is_crossed(&self, old_rate: f64, new_rate: f64) -> bool {
        old_rate < self.threshold && self.threshold <= new_rate
    }

    pub fn is_cooling_down(&self, now: DateTime<Utc>) -> bool {
        match self.last_triggered {
            Some(last) => now - last < self.cooldown,
            None => false,
        }
    }
}

/// What happened to one crossed threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AlertOutcome {
    /// Notification handed to the transport.
    Fired {
        symbol: String,
        threshold: f64,
        message: String,
        delivered: bool,
    },
    /// Crossed again before the cooldown elapsed; logged only.
    Suppressed {
        symbol: String,
        threshold: f64,
        retry_after: DateTime<Utc>,
    },
}

impl AlertOutcome {
    pub fn is_fired(&self) -> bool {
        matches!(self, AlertOutcome::Fired { .. })
    }
}

/// Alert rules for one market and the transport they fire through.
pub struct AlertEngine {
    symbol: String,
    rules: Vec<AlertRule>,
    notifier: Arc<dyn Notifier>,
}

impl AlertEngine {
    /// Rules are kept sorted by ascending threshold.
    pub fn new(symbol: &str, configs: &[AlertRuleConfig], notifier: Arc<dyn Notifier>) -> Self {
        let mut rules: Vec<AlertRule> = configs.iter().map(AlertRule::from_config).collect();
        rules.sort_by(|a, b| a.threshold.total_cmp(&b.threshold));
        Self {
            symbol: symbol.to_string(),
            rules,
            notifier,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Check every rule against a rate move and fire those that qualify.
    ///
    /// Only upward moves are considered. A single jump can fire several
    /// rules, each gated by its own cooldown.
    pub async fn evaluate(
        &mut self,
        old_rate: f64,
        new_rate: f64,
        now: DateTime<Utc>,
    ) -> Vec<AlertOutcome> {
        let mut outcomes = Vec::new();
        if new_rate <= old_rate {
            return outcomes;
        }

        for rule in self.rules.iter_mut() {
            if !rule.is_crossed(old_rate, new_rate) {
                continue;
            }

            if let Some(last) = rule.last_triggered.filter(|_| rule.is_cooling_down(now)) {
                let retry_after = last + rule.cooldown;
                info!(
                    symbol = %self.symbol,
                    threshold = %format_rate_pct(rule.threshold),
                    new_rate = %format_rate_pct(new_rate),
                    retry_after = %retry_after,
                    "Alert threshold crossed during cooldown, suppressed"
                );
                outcomes.push(AlertOutcome::Suppressed {
                    symbol: self.symbol.clone(),
                    threshold: rule.threshold,
                    retry_after,
                });
                continue;
            }

            let message =
                render_template(&rule.message, &self.symbol, rule.threshold, new_rate, old_rate);
            rule.last_triggered = Some(now);

            let delivered = match self.notifier.send(&message).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(symbol = %self.symbol, error = %e, "Alert delivery failed");
                    false
                }
            };

            info!(
                symbol = %self.symbol,
                threshold = %format_rate_pct(rule.threshold),
                old_rate = %format_rate_pct(old_rate),
                new_rate = %format_rate_pct(new_rate),
                delivered,
                "Alert fired"
            );
            outcomes.push(AlertOutcome::Fired {
                symbol: self.symbol.clone(),
                threshold: rule.threshold,
                message,
                delivered,
            });
        }

        outcomes
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
