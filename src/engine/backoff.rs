// src/engine/backoff.rs

use std::time::Duration;

/// Upper bound for any backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

const MULTIPLIER: u32 = 2;

/// Exponential backoff: `base * 2^(n - 1)` for the n-th consecutive
/// failure, capped at [`MAX_BACKOFF`]. A zero base never waits.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self { base, failures: 0 }
    }

    /// Register a failure and return how long to wait before trying again.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        delay_for(self.base, self.failures)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Delay before retrying after the `failure`-th consecutive failure.
pub fn delay_for(base: Duration, failure: u32) -> Duration {
    if failure == 0 || base.is_zero() {
        return Duration::ZERO;
    }
    let factor = MULTIPLIER.checked_pow(failure - 1).unwrap_or(u32::MAX);
    base.checked_mul(factor)
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF)
}
