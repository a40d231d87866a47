//! Bounded retry with exponential back-off for upstream calls.

use super::provider::SourceError;
use rand::Rng;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-source retry schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// Extra random delay as a fraction of the computed back-off (0.0 disables).
    pub jitter: f64,
}

/// Config-file override for a source's retry schedule.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetryOverride {
    pub max_attempts: Option<u32>,
    pub min_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_backoff,
            max_backoff: max_backoff.max(min_backoff),
            jitter: 0.25,
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            min_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn apply(mut self, o: &RetryOverride) -> Self {
        if let Some(n) = o.max_attempts {
            self.max_attempts = n.max(1);
        }
        if let Some(ms) = o.min_backoff_ms {
            self.min_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = o.max_backoff_ms {
            self.max_backoff = Duration::from_millis(ms);
        }
        self.max_backoff = self.max_backoff.max(self.min_backoff);
        self
    }

    /// Delay before retry number `retry` (1-based): `min * 2^(retry-1)`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        let base = self.min_backoff.saturating_mul(1u32 << exp).min(self.max_backoff);
        if self.jitter > 0.0 && !base.is_zero() {
            let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
            Duration::try_from_secs_f64(base.as_secs_f64() * (1.0 + extra))
                .map_or(self.max_backoff, |d| d.min(self.max_backoff))
        } else {
            base
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    pub async fn run<T, F, Fut>(&self, source: &str, what: &str, mut op: F) -> Result<T, SourceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let mut delay = self.backoff(attempt);
                    if let SourceError::RateLimited { retry_after_secs } = &e {
                        delay = delay.max(Duration::from_secs(*retry_after_secs).min(self.max_backoff));
                    }
                    warn!(source, what, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(source, what, attempt, error = %e, "giving up");
                    return Err(e);
                }
            }
        }
    }
}
