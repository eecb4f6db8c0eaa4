//! Retry scheduling.
//!
//! Each failed attempt goes back through the retry queue with its own
//! per-message TTL: the delay doubles per attempt from the base and is
//! capped, so a persistently failing order reaches the DLQ in bounded
//! time.

/// Retry budget and backoff parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_ttl_ms: u64,
    pub max_ttl_ms: u64,
}

impl RetryPolicy {
    /// Whether attempt number `next_retry` (1-based) is within budget.
    pub fn should_retry(&self, next_retry: u32) -> bool {
        next_retry <= self.max_retries
    }

    /// Delay for attempt number `attempt` (1-based):
    /// `min(max_ttl_ms, base_ttl_ms * 2^(attempt-1))`.
    pub fn ttl_for_attempt(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(63);
        self.base_ttl_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_ttl_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_ttl_ms: 2_000,
            max_ttl_ms: 60_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_schedule() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.ttl_for_attempt(1), 2_000);
        assert_eq!(policy.ttl_for_attempt(2), 4_000);
        assert_eq!(policy.ttl_for_attempt(3), 8_000);
        assert_eq!(policy.ttl_for_attempt(4), 16_000);
        assert_eq!(policy.ttl_for_attempt(5), 32_000);
        // Capped from here on.
        assert_eq!(policy.ttl_for_attempt(6), 60_000);
        assert_eq!(policy.ttl_for_attempt(40), 60_000);
    }

    #[test]
    fn test_budget_boundary() {
        let policy = RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::default()
        };

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.ttl_for_attempt(u32::MAX), 60_000);
    }
}
