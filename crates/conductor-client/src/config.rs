use conductor_types::Collaborator;
use std::time::Duration;

/// Default number of attempts per call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay before the second attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);
/// Default ceiling for the backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(2);

/// Bounded retry with exponential backoff.
///
/// The delay before attempt `n + 1` is `base_delay * 2^(n - 1)`, capped at
/// `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Backoff to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Where and how to reach one collaborator operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub collaborator: Collaborator,
    /// Full URL including the operation path.
    pub url: String,
    /// Timeout for a single attempt.
    pub timeout: Duration,
}

impl Endpoint {
    pub fn new(
        collaborator: Collaborator,
        base_url: &str,
        path: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            collaborator,
            url: format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
            timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(350));
        assert_eq!(policy.delay_after(30), Duration::from_millis(350));
    }

    #[test]
    fn at_least_one_attempt() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn endpoint_joins_slashes() {
        let ep = Endpoint::new(
            Collaborator::Vad,
            "http://vad-service:7001/",
            "/detect",
            Duration::from_secs(10),
        );
        assert_eq!(ep.url, "http://vad-service:7001/detect");
    }
}
