// SPDX-License-Identifier: MIT OR Apache-2.0
//! Exponential backoff with jitter for gateway reconnect attempts (spec
//! §4.9: "gateway connect failure ⇒ retry with backoff, capped").

use std::time::Duration;

use rand::Rng;

/// Backoff timing configuration for reconnect attempts.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound no computed delay exceeds.
    pub max_delay: Duration,
    /// Jitter factor in `[0.0, 1.0]`: the fraction of the nominal delay that
    /// may be randomly subtracted. `0.0` disables jitter.
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.5,
        }
    }
}

/// Tracks the reconnect attempt count and hands out successive delays.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    /// Start a fresh backoff sequence at attempt zero.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Compute the next delay and advance the attempt counter.
    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        let delay = compute_delay(&self.config, self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Reset to attempt zero — called once a reconnect succeeds.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Compute the backoff delay for a given zero-indexed attempt, capped at
/// `config.max_delay` and randomly shortened by up to `jitter_factor`.
#[must_use]
pub fn compute_delay(config: &BackoffConfig, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let delay_ms = (config.base_delay.as_millis() as u64).saturating_mul(exp);
    let capped_ms = delay_ms.min(config.max_delay.as_millis() as u64);

    let jitter_factor = config.jitter_factor.clamp(0.0, 1.0);
    if jitter_factor > 0.0 && capped_ms > 0 {
        let jitter_range = (capped_ms as f64 * jitter_factor) as u64;
        let jitter = if jitter_range > 0 { rand::thread_rng().gen_range(0..jitter_range) } else { 0 };
        Duration::from_millis(capped_ms.saturating_sub(jitter))
    } else {
        Duration::from_millis(capped_ms)
    }
}
