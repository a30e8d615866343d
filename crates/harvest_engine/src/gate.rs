use std::sync::Arc;
use std::time::Duration;

use harvest_core::BackoffPolicy;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Issues one permit at a time, at least `interval` apart.
///
/// Clones share the same schedule, so concurrent channel harvests stay inside
/// one quota. Waiters are served in arrival order.
#[derive(Debug, Clone)]
pub struct RateGate {
    interval: Duration,
    last_issued: Arc<Mutex<Option<Instant>>>,
}

impl RateGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_issued: Arc::new(Mutex::new(None)),
        }
    }

    pub fn unthrottled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits until the next call may be made, then claims the slot.
    pub async fn acquire(&self) {
        let mut last = self.last_issued.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Retry policy plus the gates for each family of source calls.
#[derive(Debug, Clone)]
pub struct Pacing {
    pub backoff: BackoffPolicy,
    /// History pages and thread replies.
    pub listing: RateGate,
    /// Channel and user lookups.
    pub lookup: RateGate,
}

impl Pacing {
    pub fn new(backoff: BackoffPolicy, listing_interval: Duration, lookup_interval: Duration) -> Self {
        Self {
            backoff,
            listing: RateGate::new(listing_interval),
            lookup: RateGate::new(lookup_interval),
        }
    }

    /// No spacing between calls; backoff still applies.
    pub fn unthrottled(backoff: BackoffPolicy) -> Self {
        Self::new(backoff, Duration::ZERO, Duration::ZERO)
    }
}
