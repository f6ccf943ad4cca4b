//! Token-bucket rate limiter guarding calls to the external taxon search API.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Bucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    updated_at: Instant,
}

/// Thread-safe token bucket. `acquire()` blocks the calling thread until a
/// token is available, refilling continuously based on elapsed wall time.
pub struct TokenBucketRateLimiter {
    inner: Mutex<Bucket>,
}

impl TokenBucketRateLimiter {
    pub fn new(rate: f64, burst: u32) -> Self {
        TokenBucketRateLimiter {
            inner: Mutex::new(Bucket {
                rate,
                burst: burst as f64,
                tokens: burst as f64,
                updated_at: Instant::now(),
            }),
        }
    }

    /// Blocks (via `std::thread::sleep`) until a token is available, then
    /// takes it. Call this from a `spawn_blocking` context in async callers.
    pub fn acquire(&self) {
        loop {
            let sleep_for = {
                let mut bucket = self.inner.lock();
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.updated_at).as_secs_f64();
                bucket.updated_at = now;
                bucket.tokens = (bucket.tokens + elapsed * bucket.rate).min(bucket.burst);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                if bucket.rate > 0.0 {
                    (1.0 - bucket.tokens) / bucket.rate
                } else {
                    0.1
                }
            };
            std::thread::sleep(Duration::from_secs_f64(sleep_for.max(0.01)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_capacity_allows_immediate_acquires() {
        let limiter = TokenBucketRateLimiter::new(1.0, 3);
        let start = Instant::now();
        limiter.acquire();
        limiter.acquire();
        limiter.acquire();
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn exhausted_bucket_forces_a_wait() {
        let limiter = TokenBucketRateLimiter::new(10.0, 1);
        limiter.acquire();
        let start = Instant::now();
        limiter.acquire();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
