use std::time::Duration;

use rand::Rng;

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(250);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// How often and how patiently a listing request is retried after a
/// retryable server error.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration, max: Duration, jitter: bool) -> Self {
        Self {
            max_retries,
            base,
            max,
            jitter,
        }
    }

    pub fn with_retries(max_retries: u32) -> Self {
        Self::new(max_retries, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, true)
    }

    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO, false)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// `attempt` counts failures so far, starting at 0.
    pub fn should_retry(&self, attempt: u32, retryable: bool) -> bool {
        retryable && attempt < self.max_retries
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let exp = base_ms.saturating_mul(1u64 << attempt.min(16)).min(max_ms);
        if self.jitter && exp > 0 {
            Duration::from_millis(rng.gen_range(exp / 2..=exp))
        } else {
            Duration::from_millis(exp)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_retries(2)
    }
}
