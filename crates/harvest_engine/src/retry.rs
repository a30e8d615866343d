use std::future::Future;

use engine_logging::{engine_error, engine_warn};
use harvest_core::{BackoffPolicy, FailureClass, RetryDecision};

use crate::gate::RateGate;
use crate::SourceError;

/// Runs `call` through `gate`, retrying per `policy`.
///
/// Fatal failures come back unchanged. A retryable failure that outlives the
/// attempt budget comes back as [`crate::FailureKind::RetriesExhausted`].
pub async fn call_with_backoff<T, F, Fut>(
    policy: &BackoffPolicy,
    gate: &RateGate,
    operation: &str,
    mut call: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt: u32 = 0;
    loop {
        gate.acquire().await;
        attempt += 1;

        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match policy.should_retry(attempt, err.class(), err.retry_after) {
            RetryDecision::RetryAfter(wait) => {
                engine_warn!(
                    "{}: {} (attempt {}/{}), retrying in {:?}",
                    operation,
                    err,
                    attempt,
                    policy.max_attempts,
                    wait
                );
                tokio::time::sleep(wait).await;
            }
            RetryDecision::GiveUp if err.class() == FailureClass::Fatal => {
                return Err(err);
            }
            RetryDecision::GiveUp => {
                engine_error!("{}: giving up after {} attempts: {}", operation, attempt, err);
                return Err(SourceError::retries_exhausted(attempt, err));
            }
        }
    }
}
