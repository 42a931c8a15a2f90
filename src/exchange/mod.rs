//! Exchange connectivity.
//!
//! Defines the `FundingExchange` trait the rebalancers drive. The wire
//! protocol of any real venue lives behind this trait; the crate ships
//! an in-memory paper exchange for dry runs.

pub mod paper;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::{OfferRequest, RateSample};

/// Abstraction over a funding (margin lending) venue.
///
/// Balance reads come from state the exchange keeps up to date from its
/// own streams; `refresh_balance` only asks for that state to be
/// recalculated, which may take a while to land.
#[async_trait]
pub trait FundingExchange: Send + Sync {
    /// Ids of our open funding offers for a symbol.
    async fn list_open_offers(&self, symbol: &str) -> Result<Vec<String>>;

    async fn cancel_offer(&self, offer_id: &str) -> Result<()>;

    /// Submit an offer. Returns the new offer id.
    async fn new_offer(&self, offer: &OfferRequest) -> Result<String>;

    /// Ask for the available balance of a symbol to be recalculated.
    async fn refresh_balance(&self, symbol: &str) -> Result<()>;

    /// Funds free to offer, or `None` while a recalculation is pending.
    async fn available_funds(&self, symbol: &str) -> Result<Option<f64>>;

    /// Total funding wallet balance, lent or not.
    async fn total_funds(&self, symbol: &str) -> Result<f64>;

    /// Current reference floating rate, 0 if unknown.
    async fn reference_rate(&self, symbol: &str) -> Result<f64>;

    /// Forward every observed trade rate into `sink` until it closes.
    async fn stream_rates(&self, symbols: Vec<String>, sink: mpsc::Sender<RateSample>) -> Result<()>;

    /// Venue name for logging.
    fn name(&self) -> &str;
}
