use std::time::Duration;

/// How a failed source call should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The source reported quota exhaustion.
    RateLimited,
    /// Network or timeout trouble.
    Transient,
    /// Permission, not-found or malformed request. Never retried.
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts allowed for one call, including the first.
    pub max_attempts: u32,
    /// Used when a rate-limit signal carries no advisory wait.
    pub default_rate_limit_wait: Duration,
    /// Ceiling for any rate-limit wait, advisory or default.
    pub max_rate_limit_wait: Duration,
    /// Base wait for transient failures, scaled linearly by attempt.
    pub transient_wait: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            default_rate_limit_wait: Duration::from_secs(10),
            max_rate_limit_wait: Duration::from_secs(300),
            transient_wait: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Decide what to do after attempt number `attempt` (1-based) failed.
    pub fn should_retry(
        &self,
        attempt: u32,
        class: FailureClass,
        advisory_wait: Option<Duration>,
    ) -> RetryDecision {
        if class == FailureClass::Fatal || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        let wait = match class {
            FailureClass::RateLimited => advisory_wait
                .unwrap_or(self.default_rate_limit_wait)
                .min(self.max_rate_limit_wait),
            FailureClass::Transient => self.transient_wait.saturating_mul(attempt.max(1)),
            FailureClass::Fatal => return RetryDecision::GiveUp,
        };
        RetryDecision::RetryAfter(wait)
    }
}
