//! Retry policy for transient provider failures.
//!
//! [`BackoffConfig::none()`] is the default: a failed call is reported as-is.
//! [`BackoffConfig::standard()`] suits long dataset runs where one rate-limit
//! hiccup should not abort the whole document.

use std::time::Duration;

/// Exponential backoff with full jitter.
///
/// ```
/// use llm_tasks::backend::BackoffConfig;
///
/// assert_eq!(BackoffConfig::none().max_retries, 0);
/// assert_eq!(BackoffConfig::standard().max_retries, 3);
/// assert_eq!(BackoffConfig::with_retries(5).max_retries, 5);
/// ```
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay for the first retry.
    pub initial_delay: Duration,
    /// Growth factor per retry.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Randomize each delay within `[0, computed]`.
    pub jitter: bool,
    /// HTTP statuses that are retried.
    pub retryable_statuses: Vec<u16>,
    /// Provider error codes that are retried (Qianfan: 2 service unavailable,
    /// 18 QPS limit, 336100 internal error).
    pub retryable_provider_codes: Vec<i64>,
    /// Prefer the provider's `Retry-After` hint over the computed delay.
    pub respect_retry_after: bool,
}

impl BackoffConfig {
    /// No retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::standard()
        }
    }

    /// 3 retries, 1s initial, doubling, capped at 30s.
    pub fn standard() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
            retryable_statuses: vec![429, 500, 502, 503, 504],
            retryable_provider_codes: vec![2, 18, 336100],
            respect_retry_after: true,
        }
    }

    /// Standard policy with an explicit retry count (0 disables retry).
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::standard()
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let secs = if self.jitter {
            fastrand::f64() * capped
        } else {
            capped
        };
        Duration::from_secs_f64(secs)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deterministic() -> BackoffConfig {
        BackoffConfig {
            jitter: false,
            ..BackoffConfig::standard()
        }
    }

    #[test]
    fn delays_double_until_capped() {
        let config = deterministic();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[test]
    fn jittered_delay_stays_in_range() {
        let config = BackoffConfig::standard();
        for _ in 0..100 {
            assert!(config.delay_for_attempt(1) <= Duration::from_secs(2));
        }
    }

    #[test]
    fn default_is_no_retry() {
        assert_eq!(BackoffConfig::default().max_retries, 0);
    }
}
