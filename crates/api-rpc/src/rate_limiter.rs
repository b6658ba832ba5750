//! Rate Limiter (Token Bucket Algorithm)
//!
//! Limits inbound client events per second across all connections.
//! Uses a single atomic word so the hot path never takes a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Tokens are kept in thousandths so slow refill rates still accumulate
const MILLI: u64 = 1000;

/// Token bucket packed into one `AtomicU64`
///
/// Upper 32 bits: milli-tokens. Lower 32 bits: last refill, in ms since
/// creation (wraps after ~49 days; deltas use wrapping arithmetic).
pub struct RateLimiter {
    packed: AtomicU64,
    created: Instant,
    max_milli_tokens: u64,
    refill_rate: u64,
}

impl RateLimiter {
    /// `burst` is the bucket size, `refill_rate` the tokens added per second
    ///
    /// `RateLimiter::new(200, 100)` allows 100 req/s with bursts of 200.
    pub fn new(burst: u32, refill_rate: u32) -> Self {
        let max_milli_tokens = (u64::from(burst) * MILLI).min(u64::from(u32::MAX));
        Self {
            packed: AtomicU64::new(pack(max_milli_tokens, 0)),
            created: Instant::now(),
            max_milli_tokens,
            refill_rate: u64::from(refill_rate),
        }
    }

    /// Consume one token; false when the caller should be throttled
    pub fn try_acquire(&self) -> bool {
        let now_ms = self.created.elapsed().as_millis() as u32;
        loop {
            let current = self.packed.load(Ordering::Acquire);
            let (milli_tokens, last_ms) = unpack(current);

            // ms × tokens/s = milli-tokens
            let delta_ms = u64::from(now_ms.wrapping_sub(last_ms));
            let refilled = milli_tokens
                .saturating_add(delta_ms.saturating_mul(self.refill_rate))
                .min(self.max_milli_tokens);

            let (remaining, allowed) = if refilled >= MILLI {
                (refilled - MILLI, true)
            } else {
                (refilled, false)
            };

            match self.packed.compare_exchange(
                current,
                pack(remaining, now_ms),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return allowed,
                Err(_) => continue,
            }
        }
    }

    /// Whole tokens currently available (for monitoring)
    pub fn available(&self) -> u64 {
        let (milli_tokens, _) = unpack(self.packed.load(Ordering::Acquire));
        milli_tokens / MILLI
    }
}

fn pack(milli_tokens: u64, at_ms: u32) -> u64 {
    (milli_tokens << 32) | u64::from(at_ms)
}

fn unpack(packed: u64) -> (u64, u32) {
    (packed >> 32, (packed & 0xFFFF_FFFF) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::{sleep, Duration};

    #[test]
    fn test_allows_burst_then_denies() {
        let limiter = RateLimiter::new(10, 1);

        for _ in 0..10 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.available(), 0);
    }

    #[tokio::test]
    async fn test_refills_over_time() {
        let limiter = RateLimiter::new(5, 20);
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());

        // 20 tokens/s: one token every 50ms
        sleep(Duration::from_millis(200)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_slow_rate_accumulates_across_frequent_calls() {
        // 10 tokens/s: each 20ms poll adds only a fraction of a token
        let limiter = RateLimiter::new(1, 10);
        assert!(limiter.try_acquire());

        let mut granted = false;
        for _ in 0..15 {
            sleep(Duration::from_millis(20)).await;
            if limiter.try_acquire() {
                granted = true;
                break;
            }
        }
        assert!(granted, "fractional refills must add up to a token");
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_bucket() {
        let limiter = Arc::new(RateLimiter::new(100, 1));

        let mut handles = vec![];
        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                (0..20).filter(|_| limiter.try_acquire()).count()
            }));
        }

        let mut total_allowed = 0;
        for handle in handles {
            total_allowed += handle.await.unwrap();
        }

        // 200 attempts against a bucket of 100 (refill is negligible here)
        assert!(
            (100..=102).contains(&total_allowed),
            "Expected about 100 allowed, got {}",
            total_allowed
        );
    }
}
