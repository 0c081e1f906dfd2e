use crewforge_core::WorkerId;
use std::collections::HashMap;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

struct Bucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl Bucket {
    fn per_minute(requests_per_minute: u32, now: Instant) -> Self {
        let max_tokens = f64::from(requests_per_minute);
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_rate: max_tokens / 60.0,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }
}

/// Token bucket rate limiter keyed by worker.
///
/// A worker's bucket is shared by every task and delegation that worker
/// handles. When the bucket is empty a caller reserves the next token and
/// sleeps until it refills, so requests queue in arrival order and are never
/// rejected. A caller dropped while it sleeps gives its token back. Workers
/// without a configured limit pass straight through.
pub struct RateLimiter {
    buckets: Mutex<HashMap<WorkerId, Bucket>>,
}

impl RateLimiter {
    /// Create a limiter with no limits configured.
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Create a limiter from `(worker, max requests per minute)` pairs.
    ///
    /// A limit of zero is treated as "unlimited".
    pub fn from_limits(limits: impl IntoIterator<Item = (WorkerId, u32)>) -> Self {
        let now = Instant::now();
        let buckets = limits
            .into_iter()
            .filter(|(_, rpm)| *rpm > 0)
            .map(|(worker, rpm)| (worker, Bucket::per_minute(rpm, now)))
            .collect();
        Self {
            buckets: Mutex::new(buckets),
        }
    }

    /// Wait until the worker may issue one more request.
    ///
    /// Returns how long the caller was delayed.
    pub async fn acquire(&self, worker: &WorkerId) -> Duration {
        let wait = {
            let mut buckets = self.buckets.lock();
            let Some(bucket) = buckets.get_mut(worker) else {
                return Duration::ZERO;
            };
            bucket.refill(Instant::now());
            bucket.tokens -= 1.0;
            if bucket.tokens >= 0.0 {
                Duration::ZERO
            } else {
                Duration::from_secs_f64(-bucket.tokens / bucket.refill_rate)
            }
        };

        if !wait.is_zero() {
            debug!(worker = %worker, wait_ms = wait.as_millis() as u64, "Rate limit reached, delaying request");
            let mut reservation = Reservation {
                limiter: self,
                worker,
                pending: true,
            };
            tokio::time::sleep(wait).await;
            reservation.redeem();
        }
        wait
    }

    /// Try to consume one token without waiting.
    /// Returns `true` if allowed, `false` if the worker is currently throttled.
    pub async fn try_acquire(&self, worker: &WorkerId) -> bool {
        let mut buckets = self.buckets.lock();
        let Some(bucket) = buckets.get_mut(worker) else {
            return true;
        };
        bucket.refill(Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whether a limit is configured for the worker.
    pub async fn is_limited(&self, worker: &WorkerId) -> bool {
        self.buckets.lock().contains_key(worker)
    }
}

/// A token taken by a caller that is still sleeping for it.
struct Reservation<'a> {
    limiter: &'a RateLimiter,
    worker: &'a WorkerId,
    pending: bool,
}

impl Reservation<'_> {
    fn redeem(&mut self) {
        self.pending = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        if let Some(bucket) = self.limiter.buckets.lock().get_mut(self.worker) {
            bucket.tokens = (bucket.tokens + 1.0).min(bucket.max_tokens);
            debug!(worker = %self.worker, "Delayed request abandoned, token returned");
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_allows_burst() {
        let worker = WorkerId::new("researcher");
        let limiter = RateLimiter::from_limits([(worker.clone(), 5)]);
        for _ in 0..5 {
            assert!(limiter.try_acquire(&worker).await);
        }
        assert!(!limiter.try_acquire(&worker).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_worker_never_waits() {
        let limiter = RateLimiter::from_limits([(WorkerId::new("manager"), 1)]);
        let other = WorkerId::new("writer");
        assert!(!limiter.is_limited(&other).await);
        for _ in 0..10 {
            assert_eq!(limiter.acquire(&other).await, Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_delays_instead_of_dropping() {
        let worker = WorkerId::new("manager");
        let limiter = RateLimiter::from_limits([(worker.clone(), 1)]);
        let start = Instant::now();

        assert_eq!(limiter.acquire(&worker).await, Duration::ZERO);
        let second = limiter.acquire(&worker).await;
        assert!(second >= Duration::from_secs(59), "waited {second:?}");
        assert!(start.elapsed() >= Duration::from_secs(59));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_queue_in_order() {
        let worker = WorkerId::new("manager");
        let limiter = Arc::new(RateLimiter::from_limits([(worker.clone(), 1)]));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = Arc::clone(&limiter);
            let worker = worker.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(&worker).await;
                start.elapsed()
            }));
        }

        let mut finished = Vec::new();
        for handle in handles {
            finished.push(handle.await.unwrap());
        }
        finished.sort();

        assert!(finished[0] < Duration::from_secs(1));
        assert!(finished[1] >= Duration::from_secs(59));
        assert!(finished[2] >= Duration::from_secs(119));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_wait_returns_its_token() {
        let worker = WorkerId::new("manager");
        let limiter = RateLimiter::from_limits([(worker.clone(), 1)]);

        assert_eq!(limiter.acquire(&worker).await, Duration::ZERO);
        let abandoned =
            tokio::time::timeout(Duration::from_secs(10), limiter.acquire(&worker)).await;
        assert!(abandoned.is_err());

        // Only the first request is owed; the refill is 10s further along.
        let next = limiter.acquire(&worker).await;
        assert!(next >= Duration::from_secs(49), "waited {next:?}");
        assert!(next <= Duration::from_secs(51), "waited {next:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_limit_means_unlimited() {
        let worker = WorkerId::new("writer");
        let limiter = RateLimiter::from_limits([(worker.clone(), 0)]);
        assert!(!limiter.is_limited(&worker).await);
    }
}
