use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

struct BucketState {
    tokens: f64,
    last_update: Instant,
}

/// Token-bucket rate limiter: capacity `burst`, refill `rate_per_min / 60`
/// tokens per second, refilled lazily on access.
pub struct TokenBucket {
    rate_per_sec: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a bucket that starts full. A rate `<= 0` disables limiting.
    pub fn new(rate_per_min: f64, burst: u32) -> Self {
        Self {
            rate_per_sec: rate_per_min / 60.0,
            burst: f64::from(burst),
            state: Mutex::new(BucketState {
                tokens: f64::from(burst),
                last_update: Instant::now(),
            }),
        }
    }

    /// Consume one token, sleeping until one is available.
    ///
    /// Returns the total time spent waiting. The internal lock is never
    /// held across a sleep, so concurrent callers refill fairly.
    pub async fn acquire(&self) -> Duration {
        if self.rate_per_sec <= 0.0 {
            return Duration::ZERO;
        }

        let mut total_wait = Duration::ZERO;
        loop {
            let deficit = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_update).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.burst);
                state.last_update = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return total_wait;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.rate_per_sec)
            };

            tokio::time::sleep(deficit).await;
            total_wait += deficit;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_acquires_are_immediate() {
        let bucket = TokenBucket::new(6.0, 3);
        for _ in 0..3 {
            assert_eq!(bucket.acquire().await, Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn drained_bucket_waits_one_refill_period() {
        // 6 per minute = one token every 10 seconds.
        let bucket = TokenBucket::new(6.0, 2);
        bucket.acquire().await;
        bucket.acquire().await;

        let before = Instant::now();
        let waited = bucket.acquire().await;
        let elapsed = before.elapsed();
        assert!(waited >= Duration::from_millis(9_950), "waited {waited:?}");
        assert!(elapsed >= Duration::from_millis(9_950), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(10_050), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_refills_up_to_burst() {
        let bucket = TokenBucket::new(60.0, 2);
        bucket.acquire().await;
        bucket.acquire().await;

        // Far longer than needed to refill two tokens; the cap holds.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(bucket.acquire().await, Duration::ZERO);
        assert_eq!(bucket.acquire().await, Duration::ZERO);
        assert!(bucket.acquire().await > Duration::ZERO);
    }

    #[tokio::test]
    async fn zero_rate_disables_limiting() {
        let bucket = TokenBucket::new(0.0, 1);
        for _ in 0..10 {
            assert_eq!(bucket.acquire().await, Duration::ZERO);
        }
    }
}
