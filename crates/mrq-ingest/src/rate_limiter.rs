use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use mrq_core::config::RateLimitConfig;

/// Adaptive per-symbol rate limiter: a fixed request-count window
/// plus a per-request minimum spacing that backs off on 429 and decays on
/// success. One instance is owned per symbol by the dispatching task; state
/// is mutated only by that task.
pub struct RateLimiter {
    window: Mutex<VecDeque<Instant>>,
    max_requests_per_window: usize,
    window_size: Duration,
    current_delay: Mutex<Duration>,
    initial_delay: Duration,
    max_delay: Duration,
}

impl RateLimiter {
    pub fn new(cfg: &RateLimitConfig) -> Self {
        Self {
            window: Mutex::new(VecDeque::new()),
            max_requests_per_window: cfg.max_requests_per_window as usize,
            window_size: Duration::from_millis(cfg.window_ms),
            current_delay: Mutex::new(Duration::from_millis(cfg.initial_delay_ms)),
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
        }
    }

    pub fn shared(cfg: &RateLimitConfig) -> Arc<Self> {
        Arc::new(Self::new(cfg))
    }

    /// Blocks until both the fixed-window quota and the per-request spacing
    /// allow another call, then records the slot as used.
    pub async fn acquire(&self) {
        let spacing = *self.current_delay.lock().await;
        if spacing > Duration::ZERO {
            tracing::debug!("rate limiter: spacing wait {:?}", spacing);
            tokio::time::sleep(spacing).await;
        }

        loop {
            let mut slots = self.window.lock().await;
            let now = Instant::now();
            while let Some(&front) = slots.front() {
                if now.duration_since(front) >= self.window_size {
                    slots.pop_front();
                } else {
                    break;
                }
            }

            if slots.len() < self.max_requests_per_window {
                slots.push_back(now);
                return;
            }

            let wait_until = *slots.front().unwrap() + self.window_size;
            let wait = wait_until.saturating_duration_since(now);
            drop(slots);
            tracing::warn!("rate limiter: window exhausted, suspending {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Call after a 429 / rate-limit signal. `retry_after` overrides the
    /// doubled delay when the endpoint supplied one.
    pub async fn on_rate_limited(&self, retry_after: Option<Duration>) {
        let mut delay = self.current_delay.lock().await;
        let doubled = (*delay * 2).min(self.max_delay);
        *delay = retry_after.unwrap_or(doubled).min(self.max_delay);
        tracing::warn!("rate limiter: 429 received, current_delay now {:?}", *delay);
    }

    /// Call after a successful response: decay the spacing delay back toward
    /// `initial_delay`.
    pub async fn on_success(&self) {
        let mut delay = self.current_delay.lock().await;
        let decayed = Duration::from_nanos((delay.as_nanos() as u64 * 9 / 10).max(0));
        *delay = decayed.max(self.initial_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RateLimitConfig {
        RateLimitConfig {
            initial_delay_ms: 0,
            max_delay_ms: 200,
            window_ms: 200,
            max_requests_per_window: 5,
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn stays_within_window_bound() {
        let limiter = RateLimiter::new(&cfg());
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        // fifth request should not have had to wait for the window to roll.
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn backoff_doubles_then_decays() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            initial_delay_ms: 50,
            max_delay_ms: 2_000,
            window_ms: 60_000,
            max_requests_per_window: 1200,
            max_retries: 3,
        });
        limiter.on_rate_limited(None).await;
        assert_eq!(*limiter.current_delay.lock().await, Duration::from_millis(100));
        limiter.on_rate_limited(None).await;
        assert_eq!(*limiter.current_delay.lock().await, Duration::from_millis(200));
        limiter.on_success().await;
        assert_eq!(*limiter.current_delay.lock().await, Duration::from_millis(180));
    }

    #[tokio::test]
    async fn retry_after_overrides_doubling() {
        let limiter = RateLimiter::new(&cfg());
        limiter.on_rate_limited(Some(Duration::from_millis(5))).await;
        assert_eq!(*limiter.current_delay.lock().await, Duration::from_millis(5));
    }
}
