//! Rebalance engine: one cancel → settle → allocate → place state machine
//! per market, a shared inter-call throttle, and the staggered scheduler
//! that drives them.

pub mod rebalancer;
pub mod scheduler;
pub mod throttle;

pub use rebalancer::{CycleSettings, Rebalancer};
pub use throttle::CallThrottle;
