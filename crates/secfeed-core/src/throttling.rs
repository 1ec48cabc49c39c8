use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Request budget shared by every fetch worker of a run.
#[derive(Clone)]
pub struct RequestBudget {
    limiter: Arc<DirectRateLimiter>,
    per_minute: u32,
}

impl RequestBudget {
    pub fn per_minute(limit: u32) -> Self {
        let limit = NonZeroU32::new(limit.max(1)).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(limit))),
            per_minute: limit.get(),
        }
    }

    pub fn limit(&self) -> u32 {
        self.per_minute
    }

    /// Wait until a permit is available.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }
}

impl std::fmt::Debug for RequestBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBudget")
            .field("per_minute", &self.per_minute)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn burst_is_bounded_by_the_per_minute_limit() {
        let budget = RequestBudget::per_minute(2);

        for _ in 0..2 {
            tokio::time::timeout(Duration::from_millis(100), budget.acquire())
                .await
                .expect("permit within the burst");
        }
        assert!(
            tokio::time::timeout(Duration::from_millis(50), budget.acquire())
                .await
                .is_err()
        );
    }

    #[test]
    fn zero_limit_is_clamped_to_one() {
        assert_eq!(RequestBudget::per_minute(0).limit(), 1);
    }

    #[tokio::test]
    async fn clones_share_one_budget() {
        let budget = RequestBudget::per_minute(1);
        let worker = budget.clone();

        tokio::time::timeout(Duration::from_millis(100), budget.acquire())
            .await
            .expect("first permit");
        assert!(
            tokio::time::timeout(Duration::from_millis(50), worker.acquire())
                .await
                .is_err()
        );
    }
}
