use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Token bucket keyed by an arbitrary caller-chosen string (device token,
/// client IP, ...). Plain `std::sync::Mutex` over a `HashMap`, the same
/// idiom the rest of this codebase uses for process-local shared state --
/// deliberately not `governor`, this process never runs more than one
/// rate-limit table (spec 5: "documented non-strict under horizontal
/// scale -- a front proxy limiter is expected for production").
pub trait RateLimiter: Send + Sync + 'static {
    /// Returns `Ok(())` if the call is allowed, `Err(retry_after_secs)` if
    /// it should be rejected with `429` -- the seconds until the bucket
    /// refills enough for one more call (spec 4.4: "429 with Retry-After").
    fn check(&self, key: &str, per_minute: u32, burst: u32) -> Result<(), u64>;
}

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Bucket { tokens: capacity as f64, capacity: capacity as f64, refill_per_sec, last_refill: Instant::now() }
    }

    fn try_take(&mut self) -> Result<(), u64> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            let wait_secs = if self.refill_per_sec > 0.0 { deficit / self.refill_per_sec } else { 60.0 };
            Err(wait_secs.ceil().max(1.0) as u64)
        }
    }
}

#[derive(Default)]
pub struct TokenBucketLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn check(&self, key: &str, per_minute: u32, burst: u32) -> Result<(), u64> {
        let mut guard = self.buckets.lock().expect("rate limiter mutex poisoned");
        let bucket = guard
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(burst, per_minute as f64 / 60.0));
        bucket.try_take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_consumed_then_refused() {
        let limiter = TokenBucketLimiter::new();
        for _ in 0..5 {
            assert!(limiter.check("a", 60, 5).is_ok());
        }
        assert!(limiter.check("a", 60, 5).unwrap_err() >= 1);
    }

    #[test]
    fn distinct_keys_have_independent_buckets() {
        let limiter = TokenBucketLimiter::new();
        for _ in 0..3 {
            assert!(limiter.check("a", 60, 3).is_ok());
        }
        assert!(limiter.check("a", 60, 3).is_err());
        assert!(limiter.check("b", 60, 3).is_ok());
    }
}
