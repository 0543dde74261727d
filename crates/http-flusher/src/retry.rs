use std::time::Duration;

use reqwest::StatusCode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub enabled: bool,
    /// Retries after the first send. Total sends = `max_attempts + 1`.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Non-2xx statuses worth retrying. Empty means every non-2xx status.
    pub retry_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            retry_status_codes: Vec::new(),
        }
    }
}

impl RetryConfig {
    /// Whether another send is allowed after `attempt` retries have already run.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        self.enabled && attempt < self.max_attempts
    }

    /// Transport errors are always retry-eligible; statuses go through this.
    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        if status.is_success() {
            return false;
        }
        self.retry_status_codes.is_empty() || self.retry_status_codes.contains(&status.as_u16())
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        next_delay(attempt, self.initial_delay, self.max_delay)
    }
}

/// Jittered exponential backoff: uniform in `[base/2, base]` where
/// `base = min(initial * 2^attempt, max)`.
pub fn next_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    next_delay_with(&mut fastrand::Rng::new(), attempt, initial, max)
}

/// [`next_delay`] drawing from a caller-supplied generator.
pub fn next_delay_with(
    rng: &mut fastrand::Rng,
    attempt: u32,
    initial: Duration,
    max: Duration,
) -> Duration {
    let upper = backoff_ceiling(attempt, initial, max);
    let upper_ns = u64::try_from(upper.as_nanos()).unwrap_or(u64::MAX);
    let lower_ns = upper_ns / 2;
    Duration::from_nanos(rng.u64(lower_ns..=upper_ns))
}

/// `min(initial * 2^attempt, max)` without overflowing.
pub fn backoff_ceiling(attempt: u32, initial: Duration, max: Duration) -> Duration {
    initial
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(max)
}
