//! Outbox retry policy: capped exponential backoff with jitter.

use chrono::Duration;
use haven_domain::SyncConfig;
use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl RetryPolicy {
    /// At least one attempt is always allowed; jitter is clamped to `0..=1`.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.backoff_base_ms,
            max_delay_ms: config.backoff_max_ms.max(config.backoff_base_ms),
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }

    /// Whether another attempt is allowed after `failed_attempts` failures.
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }

    /// Delay before the next attempt, ignoring jitter.
    pub fn base_delay(&self, failed_attempts: u32) -> u64 {
        let exponent = failed_attempts.saturating_sub(1).min(20);
        self.base_delay_ms.saturating_mul(1u64 << exponent).min(self.max_delay_ms)
    }

    /// Delay before the next attempt after `failed_attempts` failures.
    ///
    /// Jitter spreads retries of different items (and of different app
    /// instances sharing a server) so they do not line up.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let base = self.base_delay(failed_attempts) as f64;
        let spread = base * self.jitter;
        let jittered = if spread > 0.0 {
            base + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            base
        };
        let capped = jittered.clamp(0.0, self.max_delay_ms as f64);
        Duration::milliseconds(capped.round() as i64)
    }
}
