//! Token-bucket outbound rate limiter (§4.8, Design Note 9). Grounded on the
//! same counters-in-an-interval idea as a persisted fixed-window limiter,
//! adapted to a continuously-refilling bucket and an async `acquire()` so a
//! C6 worker waits rather than polls.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

/// A process-wide token bucket: `rate` tokens/second, burst capacity equal
/// to `rate` (one second's worth).
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(rate_per_sec: u32) -> Self {
        let rate = rate_per_sec.max(1) as f64;
        Self {
            bucket: Mutex::new(Bucket {
                tokens: rate,
                capacity: rate,
                refill_per_sec: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Block (asynchronously) until a token is available, then consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                let now = Instant::now();
                bucket.refill(now);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - bucket.tokens;
                    Some(Duration::from_secs_f64(deficit / bucket.refill_per_sec))
                }
            };

            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }

    /// Non-blocking variant: `true` if a token was available and consumed.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_burst_capacity_then_refuses() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_refill() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        let start = tokio::time::Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(900));
    }
}
