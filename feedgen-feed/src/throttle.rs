//! Outbound request gate: a token bucket consulted before every upstream
//! call, plus the extended pause applied after the upstream signals throttling.
//!
//! Semantics:
//! - `acquire` waits until one token is available, then consumes it.
//! - Tokens refill at `qps` up to `burst`. A caller that has to wait leaves
//!   the bucket in debt so the next caller queues behind it.
//! - `back_off` sleeps for the configured rate-limit delay.
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Tuning knobs for [`RequestGate`], deserialized from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Steady-state spacing between outbound calls.
    pub min_interval_ms: u64,
    /// Calls allowed back-to-back before spacing applies.
    pub burst: u32,
    /// Pause after a rate-limit response before the next query.
    pub rate_limit_backoff_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 500,
            burst: 2,
            rate_limit_backoff_ms: 2000,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct BucketCfg {
    qps: f64,
    burst: f64,
}

#[derive(Debug)]
struct BucketState {
    cfg: BucketCfg,
    tokens: f64,
    last: Instant,
}

impl BucketState {
    fn new(cfg: BucketCfg, now: Instant) -> Self {
        Self {
            cfg,
            tokens: cfg.burst,
            last: now,
        }
    }

    /// Consume `need` tokens and return how long the caller must wait first.
    fn needed_wait(&mut self, need: f64, now: Instant) -> Duration {
        let dt = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = (self.tokens + dt * self.cfg.qps).min(self.cfg.burst);
        self.tokens -= need;

        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.cfg.qps)
        }
    }
}

#[derive(Debug)]
pub struct RequestGate {
    bucket: Mutex<BucketState>,
    rate_limit_backoff: Duration,
}

impl Default for RequestGate {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}

impl RequestGate {
    pub fn new(config: ThrottleConfig) -> Self {
        // Guard against a zero interval turning into an infinite rate.
        let interval = Duration::from_millis(config.min_interval_ms.max(1));
        let cfg = BucketCfg {
            qps: 1.0 / interval.as_secs_f64(),
            burst: f64::from(config.burst.max(1)),
        };
        Self {
            bucket: Mutex::new(BucketState::new(cfg, Instant::now())),
            rate_limit_backoff: Duration::from_millis(config.rate_limit_backoff_ms),
        }
    }

    /// Wait for a permit to make one outbound call.
    pub async fn acquire(&self) {
        let wait = {
            let mut bucket = self.bucket.lock().await;
            bucket.needed_wait(1.0, Instant::now())
        };
        if !wait.is_zero() {
            tracing::trace!(target: "rate", waited_ms = wait.as_millis() as u64, "gate.wait");
            sleep(wait).await;
        }
    }

    /// Extended pause after the upstream reported throttling.
    pub async fn back_off(&self) {
        if !self.rate_limit_backoff.is_zero() {
            tracing::info!(
                target: "rate",
                backoff_ms = self.rate_limit_backoff.as_millis() as u64,
                "gate.rate_limited.backoff"
            );
            sleep(self.rate_limit_backoff).await;
        }
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        self.rate_limit_backoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(qps: f64, burst: f64) -> (BucketState, Instant) {
        let now = Instant::now();
        (BucketState::new(BucketCfg { qps, burst }, now), now)
    }

    #[test]
    fn burst_is_free_then_spacing_applies() {
        let (mut b, t0) = bucket(2.0, 2.0);
        assert_eq!(b.needed_wait(1.0, t0), Duration::ZERO);
        assert_eq!(b.needed_wait(1.0, t0), Duration::ZERO);
        assert_eq!(b.needed_wait(1.0, t0), Duration::from_millis(500));
    }

    #[test]
    fn waiting_callers_queue_behind_each_other() {
        let (mut b, t0) = bucket(2.0, 1.0);
        assert_eq!(b.needed_wait(1.0, t0), Duration::ZERO);
        assert_eq!(b.needed_wait(1.0, t0), Duration::from_millis(500));
        assert_eq!(b.needed_wait(1.0, t0), Duration::from_millis(1000));
    }

    #[test]
    fn refill_is_capped_at_burst() {
        let (mut b, t0) = bucket(10.0, 2.0);
        let later = t0 + Duration::from_secs(60);
        assert_eq!(b.needed_wait(1.0, later), Duration::ZERO);
        assert_eq!(b.needed_wait(1.0, later), Duration::ZERO);
        assert_eq!(b.needed_wait(1.0, later), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_spaces_calls_after_burst() {
        let gate = RequestGate::new(ThrottleConfig {
            min_interval_ms: 250,
            burst: 1,
            rate_limit_backoff_ms: 0,
        });
        let start = Instant::now();
        for _ in 0..4 {
            gate.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(750));
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn back_off_sleeps_the_configured_delay() {
        let gate = RequestGate::default();
        let start = Instant::now();
        gate.back_off().await;
        assert_eq!(gate.rate_limit_backoff(), Duration::from_millis(2000));
        assert!(start.elapsed() >= Duration::from_millis(2000));
    }

    #[test]
    fn zero_interval_does_not_divide_by_zero() {
        let gate = RequestGate::new(ThrottleConfig {
            min_interval_ms: 0,
            burst: 0,
            rate_limit_backoff_ms: 0,
        });
        assert!(gate.rate_limit_backoff().is_zero());
    }
}
