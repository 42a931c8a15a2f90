//! In-memory paper exchange.
//!
//! Simulates a funding wallet per symbol, our open offers, and a
//! reference rate. Cancelling an offer releases its funds but leaves the
//! available balance unknown until the next `refresh_balance`, the same
//! way a live wallet calculation lags behind order updates. A synthetic
//! random-walk trade feed drives the rate tracker in dry runs.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::FundingExchange;
use crate::config::PaperWalletConfig;
use crate::types::{OfferRequest, RateSample};

const VENUE_NAME: &str = "paper";

/// Relative overshoot of the available balance an offer may carry.
const ROUNDING_SLACK: f64 = 1e-3;

/// Largest relative step of the synthetic trade-rate walk per tick.
const FEED_MAX_STEP: f64 = 0.08;

/// Pull of the synthetic walk back towards the reference rate per tick.
const FEED_REVERSION: f64 = 0.1;

#[derive(Debug, Clone)]
struct Wallet {
    balance: f64,
    reserved: f64,
    /// Set after offers change; cleared by `refresh_balance`.
    calc_pending: bool,
}

impl Wallet {
    fn available(&self) -> f64 {
        (self.balance - self.reserved).max(0.0)
    }
}

/// An offer resting on the paper book.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperOffer {
    pub id: String,
    pub request: OfferRequest,
}

#[derive(Debug, Default)]
struct PaperState {
    wallets: HashMap<String, Wallet>,
    reference_rates: HashMap<String, f64>,
    offers: Vec<PaperOffer>,
}

pub struct PaperExchange {
    state: Mutex<PaperState>,
    feed_interval: Duration,
}

impl PaperExchange {
    pub fn new(feed_interval: Duration) -> Self {
        Self {
            state: Mutex::new(PaperState::default()),
            feed_interval,
        }
    }

    /// Build from the `[exchange.paper.<SYMBOL>]` config tables.
    pub fn from_config(wallets: &HashMap<String, PaperWalletConfig>, feed_interval: Duration) -> Self {
        let exchange = Self::new(feed_interval);
        for (symbol, wallet) in wallets {
            exchange.seed_wallet(symbol, wallet.balance, wallet.frr);
        }
        exchange
    }

    /// Create or reset a wallet.
    pub fn seed_wallet(&self, symbol: &str, balance: f64, reference_rate: f64) {
        if let Ok(mut state) = self.state.lock() {
            state.wallets.insert(
                symbol.to_string(),
                Wallet {
                    balance,
                    reserved: 0.0,
                    calc_pending: false,
                },
            );
            state.reference_rates.insert(symbol.to_string(), reference_rate);
        }
    }

    /// Snapshot of resting offers for a symbol.
    pub fn offers(&self, symbol: &str) -> Vec<PaperOffer> {
        self.state
            .lock()
            .map(|s| {
                s.offers
                    .iter()
                    .filter(|o| o.request.symbol == symbol)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn state(&self) -> Result<MutexGuard<'_, PaperState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("paper exchange state lock poisoned"))
    }
}

#[async_trait]
impl FundingExchange for PaperExchange {
    async fn list_open_offers(&self, symbol: &str) -> Result<Vec<String>> {
        let state = self.state()?;
        Ok(state
            .offers
            .iter()
            .filter(|o| o.request.symbol == symbol)
            .map(|o| o.id.clone())
            .collect())
    }

    async fn cancel_offer(&self, offer_id: &str) -> Result<()> {
        let mut state = self.state()?;
        let pos = state
            .offers
            .iter()
            .position(|o| o.id == offer_id)
            .ok_or_else(|| anyhow!("unknown offer {offer_id}"))?;
        let offer = state.offers.remove(pos);

        if let Some(wallet) = state.wallets.get_mut(&offer.request.symbol) {
            wallet.reserved = (wallet.reserved - offer.request.amount).max(0.0);
            wallet.calc_pending = true;
        }
        debug!(offer_id, "Paper offer cancelled");
        Ok(())
    }

    async fn new_offer(&self, offer: &OfferRequest) -> Result<String> {
        let mut state = self.state()?;
        let wallet = state
            .wallets
            .get_mut(&offer.symbol)
            .ok_or_else(|| anyhow!("no funding wallet for {}", offer.symbol))?;

        // the last rung of a ladder may carry up to half a rounding unit
        if offer.amount > wallet.available() + offer.amount * ROUNDING_SLACK {
            bail!(
                "insufficient {} funds: offer {} exceeds available {}",
                offer.symbol,
                offer.amount,
                wallet.available()
            );
        }
        wallet.reserved += offer.amount.min(wallet.available());
        wallet.calc_pending = true;

        let id = uuid::Uuid::new_v4().to_string();
        state.offers.push(PaperOffer {
            id: id.clone(),
            request: offer.clone(),
        });
        debug!(offer_id = %id, offer = %offer, "Paper offer placed");
        Ok(id)
    }

    async fn refresh_balance(&self, symbol: &str) -> Result<()> {
        let mut state = self.state()?;
        if let Some(wallet) = state.wallets.get_mut(symbol) {
            wallet.calc_pending = false;
        }
        Ok(())
    }

    async fn available_funds(&self, symbol: &str) -> Result<Option<f64>> {
        let state = self.state()?;
        Ok(match state.wallets.get(symbol) {
            Some(w) if w.calc_pending => None,
            Some(w) => Some(w.available()),
            None => Some(0.0),
        })
    }

    async fn total_funds(&self, symbol: &str) -> Result<f64> {
        let state = self.state()?;
        Ok(state.wallets.get(symbol).map(|w| w.balance).unwrap_or(0.0))
    }

    async fn reference_rate(&self, symbol: &str) -> Result<f64> {
        let state = self.state()?;
        Ok(state.reference_rates.get(symbol).copied().unwrap_or(0.0))
    }

    async fn stream_rates(&self, symbols: Vec<String>, sink: mpsc::Sender<RateSample>) -> Result<()> {
        let mut rng = StdRng::from_entropy();
        let mut last: HashMap<String, f64> = HashMap::new();
        let mut ticker = tokio::time::interval(self.feed_interval);
        info!(symbols = ?symbols, "Paper rate feed started");

        loop {
            ticker.tick().await;
            for symbol in &symbols {
                let frr = self.reference_rate(symbol).await?;
                if frr <= 0.0 {
                    continue;
                }
                let prev = *last.get(symbol).unwrap_or(&frr);
                let step = rng.gen_range(-FEED_MAX_STEP..FEED_MAX_STEP);
                let next = (prev * (1.0 + step) + (frr - prev) * FEED_REVERSION).max(0.0);
                last.insert(symbol.clone(), next);

                if sink.send(RateSample::new(symbol.as_str(), next, Utc::now())).await.is_err() {
                    info!("Rate sink closed, paper feed stopping");
                    return Ok(());
                }
            }
        }
    }

    fn name(&self) -> &str {
        VENUE_NAME
    }
}
