use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Jittered exponential backoff for destination writes.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        let max_attempts = max_attempts.max(1);
        let base_delay = base_delay.max(Duration::from_millis(1));
        Self {
            max_attempts,
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter_pct: 0.2,
        }
    }

    pub fn with_jitter(mut self, jitter_pct: f64) -> Self {
        self.jitter_pct = jitter_pct.clamp(0.0, 1.0);
        self
    }

    /// Run once, no retries
    pub fn none() -> Self {
        Self::new(1, Duration::from_millis(1), Duration::from_millis(1))
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let cap = self.max_delay.as_millis() as u64;
        let delay = base.saturating_mul(2_u64.saturating_pow(attempt)).min(cap);
        let delay = if self.jitter_pct > 0.0 {
            let spread = (delay as f64 * self.jitter_pct) as i64;
            let delta = rand::thread_rng().gen_range(-spread..=spread);
            delay.saturating_add_signed(delta)
        } else {
            delay
        };
        Duration::from_millis(delay)
    }

    /// Run `op` until it succeeds, `retryable` rejects the error, or attempts run out.
    /// `op` receives the zero-based attempt number.
    pub async fn retry_async<F, Fut, T, E, R>(&self, mut op: F, retryable: R) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !retryable(&err) {
                        return Err(err);
                    }
                    let delay = self.next_delay(attempt - 1);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after failure"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_secs(2))
    }
}
