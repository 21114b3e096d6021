//! Rate limiting and retry policy for registry calls.
//!
//! Cross-cutting call policy the apply engine threads every registry
//! mutation through: a token bucket caps the call rate, and transient
//! failures are retried with exponential backoff. The policy is opaque
//! to callers — they hand over a closure and get the final outcome.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::registry::RegistryResult;

/// Token bucket refilled continuously at a fixed per-second rate.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    per_second: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(per_second: u32) -> Self {
        let per_second = f64::from(per_second.max(1));
        Self {
            capacity: per_second,
            per_second,
            state: Mutex::new(BucketState {
                tokens: per_second,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Takes one token, sleeping until the bucket refills if necessary.
    async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.per_second).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.per_second)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// The call policy wrapping every registry mutation.
#[derive(Debug)]
pub struct ApiPolicy {
    bucket: TokenBucket,
    attempts: u32,
    backoff_factor: f64,
}

impl ApiPolicy {
    /// Creates a policy.
    ///
    /// # Arguments
    ///
    /// * `rate_per_sec` - Maximum registry calls per second
    /// * `attempts` - Tries per operation, first included (min 1)
    /// * `backoff_factor` - Backoff base in seconds; the sleep before
    ///   retry `n` is `factor * 2^n`
    pub fn new(rate_per_sec: u32, attempts: u32, backoff_factor: f64) -> Self {
        Self {
            bucket: TokenBucket::new(rate_per_sec),
            attempts: attempts.max(1),
            backoff_factor: backoff_factor.max(0.0),
        }
    }

    /// Runs one registry call under the policy.
    ///
    /// Each attempt first takes a rate-limit token. Retryable errors are
    /// retried up to the attempt limit; a rejection is returned
    /// immediately, since re-sending an unacceptable payload cannot
    /// succeed.
    pub async fn execute<F, Fut>(&self, call: F) -> RegistryResult
    where
        F: Fn() -> Fut,
        Fut: Future<Output = RegistryResult>,
    {
        let mut attempt = 0;
        loop {
            self.bucket.acquire().await;
            match call().await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    attempt += 1;
                    if !error.is_retryable() || attempt >= self.attempts {
                        return Err(error);
                    }
                    let backoff = self.backoff_factor * f64::powi(2.0, attempt as i32 - 1);
                    debug!(attempt, backoff_secs = backoff, %error, "registry call failed, retrying");
                    if backoff > 0.0 {
                        tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_success_first_try() {
        let policy = ApiPolicy::new(100, 3, 0.0);
        let calls = AtomicU32::new(0);
        policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let policy = ApiPolicy::new(100, 3, 0.0);
        let calls = AtomicU32::new(0);
        policy
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(RegistryError::Unavailable("flap".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let policy = ApiPolicy::new(100, 2, 0.0);
        let calls = AtomicU32::new(0);
        let err = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RegistryError::Timeout("slow".into())) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err, RegistryError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_rejection_not_retried() {
        let policy = ApiPolicy::new(100, 5, 0.0);
        let calls = AtomicU32::new(0);
        let err = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RegistryError::Rejected("bad".into())) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, RegistryError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_paces_calls() {
        // 10/sec with 25 calls needs at least ~1.5s of refill beyond the
        // initial burst of 10.
        let policy = ApiPolicy::new(10, 1, 0.0);
        let start = Instant::now();
        for _ in 0..25 {
            policy.execute(|| async { Ok(()) }).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(1400));
    }
}
