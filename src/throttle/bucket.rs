//! Token bucket with blocking, cancellable consumption.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::throttle::context::ConnectionContext;
use crate::throttle::error::WaitError;

/// A token bucket that refills continuously up to its capacity.
///
/// Consumers reserve tokens up front: when the bucket is short the balance
/// goes negative and the caller sleeps until the refill has covered the
/// deficit. A cancelled wait hands its tokens back.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_update: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant, capacity: f64, refill_rate: f64) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;
    }
}

impl TokenBucket {
    /// Create a full bucket holding `capacity` tokens, refilled at
    /// `refill_rate` tokens per second.
    pub fn new(refill_rate: f64, capacity: u64) -> Self {
        Self {
            capacity,
            refill_rate: refill_rate.max(0.0),
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_update: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Current balance. Negative while earlier reservations are outstanding.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().expect("token bucket mutex poisoned");
        state.refill(Instant::now(), self.capacity as f64, self.refill_rate);
        state.tokens
    }

    /// Take `n` tokens only if they are available right now.
    pub fn try_acquire(&self, n: usize) -> bool {
        let mut state = self.state.lock().expect("token bucket mutex poisoned");
        state.refill(Instant::now(), self.capacity as f64, self.refill_rate);
        if state.tokens >= n as f64 {
            state.tokens -= n as f64;
            true
        } else {
            false
        }
    }

    /// Wait until `n` tokens are available, then consume them.
    ///
    /// Returns how long the caller was held back. Fails without consuming
    /// anything when `ctx` ends first, or when the required wait would run
    /// past the context deadline.
    pub async fn wait_n(&self, n: usize, ctx: &ConnectionContext) -> Result<Duration, WaitError> {
        if n == 0 {
            return Ok(Duration::ZERO);
        }
        if ctx.is_cancelled() {
            return Err(WaitError::Cancelled { requested: n });
        }
        if ctx.is_expired() {
            return Err(WaitError::DeadlineExceeded {
                requested: n,
                wait: Duration::ZERO,
            });
        }

        let wait = self.reserve(n, Instant::now(), ctx.deadline())?;
        if wait.is_zero() {
            return Ok(wait);
        }

        tokio::select! {
            biased;
            _ = tokio::time::sleep(wait) => Ok(wait),
            _ = ctx.done() => {
                self.release(n);
                if ctx.is_cancelled() {
                    Err(WaitError::Cancelled { requested: n })
                } else {
                    Err(WaitError::DeadlineExceeded { requested: n, wait })
                }
            }
        }
    }

    fn reserve(
        &self,
        n: usize,
        now: Instant,
        deadline: Option<Instant>,
    ) -> Result<Duration, WaitError> {
        let mut state = self.state.lock().expect("token bucket mutex poisoned");
        state.refill(now, self.capacity as f64, self.refill_rate);

        let requested = n as f64;
        let deficit = requested - state.tokens;
        let wait = if deficit <= 0.0 {
            Duration::ZERO
        } else if self.refill_rate <= 0.0 {
            return Err(WaitError::Exhausted {
                requested: n,
                capacity: self.capacity,
            });
        } else {
            Duration::try_from_secs_f64(deficit / self.refill_rate).unwrap_or(Duration::MAX)
        };

        if let Some(deadline) = deadline {
            if now.checked_add(wait).map_or(true, |ready| ready > deadline) {
                return Err(WaitError::DeadlineExceeded { requested: n, wait });
            }
        }

        state.tokens -= requested;
        Ok(wait)
    }

    fn release(&self, n: usize) {
        let mut state = self.state.lock().expect("token bucket mutex poisoned");
        state.refill(Instant::now(), self.capacity as f64, self.refill_rate);
        state.tokens = (state.tokens + n as f64).min(self.capacity as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn assert_near(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 0.5,
            "expected ~{expected} tokens, found {actual}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_available_immediately() {
        let bucket = TokenBucket::new(10.0, 100);
        let ctx = ConnectionContext::background();

        let start = Instant::now();
        let waited = bucket.wait_n(100, &ctx).await.unwrap();
        assert_eq!(waited, Duration::ZERO);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_near(bucket.available(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_only_for_the_deficit() {
        let bucket = TokenBucket::new(100.0, 100);
        let ctx = ConnectionContext::background();
        bucket.wait_n(100, &ctx).await.unwrap();

        let start = Instant::now();
        bucket.wait_n(50, &ctx).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(600), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn requests_larger_than_capacity_wait_for_the_rest() {
        let bucket = TokenBucket::new(10.0, 10);
        let ctx = ConnectionContext::background();

        let waited = bucket.wait_n(30, &ctx).await.unwrap();
        assert_eq!(waited, Duration::from_secs(2));
        assert_near(bucket.available(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_capacity() {
        let bucket = TokenBucket::new(50.0, 20);
        assert!(bucket.try_acquire(20));
        assert!(!bucket.try_acquire(1));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_near(bucket.available(), 20.0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_returns_tokens() {
        let bucket = Arc::new(TokenBucket::new(10.0, 100));
        let ctx = ConnectionContext::background();
        bucket.wait_n(100, &ctx).await.unwrap();

        let waiter = {
            let bucket = bucket.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { bucket.wait_n(50, &ctx).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        ctx.cancel();

        let result = waiter.await.unwrap();
        assert_eq!(result, Err(WaitError::Cancelled { requested: 50 }));
        // One second of refill, nothing spent on the aborted wait.
        assert_near(bucket.available(), 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_share_one_balance() {
        let bucket = Arc::new(TokenBucket::new(100.0, 100));
        let ctx = ConnectionContext::background();

        let start = Instant::now();
        let waiters: Vec<_> = (0..5)
            .map(|_| {
                let bucket = bucket.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move { bucket.wait_n(100, &ctx).await })
            })
            .collect();

        let mut waits = Vec::new();
        for waiter in waiters {
            waits.push(waiter.await.unwrap().unwrap());
        }
        waits.sort();

        // 500 tokens admitted: one burst plus four seconds of refill.
        assert_eq!(waits.first(), Some(&Duration::ZERO));
        assert_eq!(waits.last(), Some(&Duration::from_secs(4)));
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert_near(bucket.available(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_past_deadline_fails_fast() {
        let bucket = TokenBucket::new(1.0, 10);
        let ctx = ConnectionContext::background().with_timeout(Duration::from_secs(1));
        bucket.wait_n(10, &ctx).await.unwrap();

        let start = Instant::now();
        let err = bucket.wait_n(5, &ctx).await.unwrap_err();
        assert!(matches!(err, WaitError::DeadlineExceeded { requested: 5, .. }));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_near(bucket.available(), 0.0);
    }

    #[tokio::test]
    async fn zero_rate_bucket_is_exhausted() {
        let bucket = TokenBucket::new(0.0, 5);
        let ctx = ConnectionContext::background();
        bucket.wait_n(5, &ctx).await.unwrap();

        let err = bucket.wait_n(1, &ctx).await.unwrap_err();
        assert_eq!(
            err,
            WaitError::Exhausted {
                requested: 1,
                capacity: 5
            }
        );
    }

    #[tokio::test]
    async fn cancelled_context_consumes_nothing() {
        let bucket = TokenBucket::new(1.0, 10);
        let ctx = ConnectionContext::background();
        ctx.cancel();

        assert!(bucket.wait_n(4, &ctx).await.is_err());
        assert_near(bucket.available(), 10.0);
    }
}
