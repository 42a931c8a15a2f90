//! Global minimum spacing between exchange calls.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum gap between consecutive exchange calls across every
/// market that shares it. Callers queue on the lock, so the gap holds
/// even when several rebalancers want the exchange at once.
#[derive(Debug)]
pub struct CallThrottle {
    min_gap: Duration,
    last: Mutex<Option<Instant>>,
}

impl CallThrottle {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last: Mutex::new(None),
        }
    }

    pub fn min_gap(&self) -> Duration {
        self.min_gap
    }

    /// Wait until at least `min_gap` has passed since the previous call.
    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            tokio::time::sleep_until(prev + self.min_gap).await;
        }
        *last = Some(Instant::now());
    }
}
