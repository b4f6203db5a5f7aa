//! Reconnect policy with jittered exponential back-off, used by the
//! WebSocket agent transport when its connection to the gateway drops.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    /// Initial delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (cap).
    pub max_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub backoff_factor: f64,
    /// Maximum number of consecutive failures before giving up. `0` means
    /// unlimited retries.
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            max_attempts: 0,
        }
    }
}

impl ReconnectBackoff {
    /// Compute the delay for the given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        // ~25% jitter to spread out reconnect storms after a shared outage.
        let jitter = capped_ms * 0.25 * pseudo_random_fraction(attempt);
        Duration::from_millis((capped_ms + jitter) as u64)
    }

    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Cheap deterministic fraction in `[0, 1)` derived from the attempt number
/// — not cryptographic, just enough to avoid every reconnecting client
/// landing on the exact same delay.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2654435761);
    (hash as f64) / (u32::MAX as f64)
}
