//! fundbot: tiered funding-offer rebalancer with rate alerts.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod allocation;
pub mod exchange;
pub mod notifications;
pub mod tracker;
pub mod engine;
pub mod dashboard;
