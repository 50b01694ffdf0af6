//! Simulated collaborators for local runs and tests

pub mod simulated_gateway;
pub mod simulated_wallet;

pub use simulated_gateway::SimulatedGateway;
pub use simulated_wallet::{FailRule, SimulatedWallet};

use rand::Rng;
use std::time::Duration;

/// `base` plus up to 50% random jitter
pub(crate) fn jittered(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    if base_ms == 0 {
        return Duration::ZERO;
    }
    let jitter = rand::thread_rng().gen_range(0..=base_ms / 2);
    Duration::from_millis(base_ms + jitter)
}
