//! Bounded exponential backoff for reconnects

use std::time::Duration;

use oddsfeed_core::ReconnectConfig;

/// Doubling delay capped at a maximum, reset on success
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay())
    }

    /// Record a failure and return how long to wait before the next attempt.
    ///
    /// The n-th consecutive failure waits `min(base * 2^(n-1), max)`.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.delay_for(self.failures)
    }

    fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |d| d.min(self.max))
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}
