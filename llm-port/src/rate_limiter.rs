//! Sliding-window rate limiter and retry helper.
//!
//! No single teacher file owns this shape; the backoff math is lifted straight from
//! `enrichment-pipeline`'s `retry_delay` (capped exponent, `base * 2^attempt` clamped
//! to `max_delay`), generalized with jitter and wired to the injectable `Clock`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::clock::Clock;

const WINDOW: chrono::Duration = chrono::Duration::seconds(60);

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u64,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 50,
            tokens_per_minute: 100_000,
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter_ratio: 0.2,
        }
    }
}

struct Windows {
    requests: VecDeque<DateTime<Utc>>,
    tokens: VecDeque<(DateTime<Utc>, u64)>,
}

/// Guards LLM calls against a rolling per-minute request and token budget.
/// `wait_for_capacity` only admits once neither budget would be breached; the
/// admission decision is made after every sleep completes, never before, so the
/// rolling totals can only ever be under-budget at the moment of admission.
pub struct RateLimiter {
    config: RateLimiterConfig,
    clock: Arc<dyn Clock>,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            windows: Mutex::new(Windows {
                requests: VecDeque::new(),
                tokens: VecDeque::new(),
            }),
        }
    }

    fn prune(windows: &mut Windows, now: DateTime<Utc>) {
        let cutoff = now - WINDOW;
        while windows.requests.front().is_some_and(|ts| *ts < cutoff) {
            windows.requests.pop_front();
        }
        while windows.tokens.front().is_some_and(|(ts, _)| *ts < cutoff) {
            windows.tokens.pop_front();
        }
    }

    /// Blocks until admitting one more request plus `estimated_tokens` would not
    /// exceed either budget, then returns without reserving anything — callers
    /// must follow up with `record_usage`.
    pub async fn wait_for_capacity(&self, estimated_tokens: u64) {
        loop {
            let wait_for = {
                let mut windows = self.windows.lock().await;
                let now = self.clock.now();
                Self::prune(&mut windows, now);

                let token_total: u64 = windows.tokens.iter().map(|(_, t)| *t).sum();
                let requests_ok = (windows.requests.len() as u32) < self.config.requests_per_minute;
                let tokens_ok = token_total + estimated_tokens <= self.config.tokens_per_minute;

                if requests_ok && tokens_ok {
                    None
                } else {
                    let oldest = windows
                        .requests
                        .front()
                        .into_iter()
                        .chain(windows.tokens.front().map(|(ts, _)| ts))
                        .min()
                        .copied();
                    match oldest {
                        Some(ts) => {
                            let ready_at = ts + WINDOW;
                            (ready_at - now).to_std().ok()
                        }
                        None => None,
                    }
                }
            };

            match wait_for {
                None => return,
                Some(duration) if duration.is_zero() => continue,
                Some(duration) => {
                    debug!(millis = duration.as_millis() as u64, "rate limiter sleeping");
                    tokio::time::sleep(duration).await;
                }
            }
        }
    }

    /// Records a completed call's real (or, on failure, estimated) token cost.
    pub async fn record_usage(&self, actual_tokens: u64) {
        let mut windows = self.windows.lock().await;
        let now = self.clock.now();
        Self::prune(&mut windows, now);
        windows.requests.push_back(now);
        windows.tokens.push_back((now, actual_tokens));
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let capped_attempt = attempt.saturating_sub(1).min(6);
        let multiplier = 2_u64.saturating_pow(capped_attempt);
        let base = self.config.base_delay.as_secs().saturating_mul(multiplier);
        let capped = base.min(self.config.max_delay.as_secs());

        let jitter_span = (capped as f64 * self.config.jitter_ratio).max(0.0);
        let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        let jittered = (capped as f64 + jitter).max(0.0);
        Duration::from_secs_f64(jittered)
    }

    /// Wraps an LLM call with classification-driven retry. `op` is retried up to
    /// `max_retries` times when `classify` reports the error is retryable;
    /// non-retryable errors are returned immediately.
    pub async fn with_retry<T, E, Fut, F, C>(&self, mut op: F, classify: C) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt <= self.config.max_retries && classify(&err) => {
                    let delay = self.backoff_delay(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying llm call");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    #[tokio::test]
    async fn wait_for_capacity_admits_under_budget_immediately() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let limiter = RateLimiter::new(
            RateLimiterConfig {
                requests_per_minute: 5,
                tokens_per_minute: 1000,
                ..RateLimiterConfig::default()
            },
            clock,
        );

        limiter.wait_for_capacity(100).await;
        limiter.record_usage(100).await;
    }

    #[tokio::test]
    async fn with_retry_recovers_after_one_rate_limit_then_succeeds() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let limiter = RateLimiter::new(
            RateLimiterConfig {
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                jitter_ratio: 0.0,
                ..RateLimiterConfig::default()
            },
            clock,
        );

        let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let started = std::time::Instant::now();

        let result: Result<&'static str, &'static str> = limiter
            .with_retry(
                || {
                    let attempts = attempts.clone();
                    async move {
                        if attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                            Err("rate limited")
                        } else {
                            Ok("enriched")
                        }
                    }
                },
                |_err| true,
            )
            .await;

        assert_eq!(result, Ok("enriched"));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_millis(5));

        // Mirrors production.rs: every provider attempt records usage against the
        // window, whether it failed or succeeded.
        limiter.record_usage(10).await;
        limiter.record_usage(10).await;
        let windows = limiter.windows.lock().await;
        assert_eq!(windows.requests.len(), 2);
    }

    #[tokio::test]
    async fn backoff_delay_grows_and_caps() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let limiter = RateLimiter::new(
            RateLimiterConfig {
                jitter_ratio: 0.0,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(16),
                ..RateLimiterConfig::default()
            },
            clock,
        );

        assert_eq!(limiter.backoff_delay(1).as_secs(), 2);
        assert_eq!(limiter.backoff_delay(2).as_secs(), 4);
        assert_eq!(limiter.backoff_delay(3).as_secs(), 8);
        assert_eq!(limiter.backoff_delay(10).as_secs(), 16);
    }
}
