//! Exponential backoff with jitter for chunk dispatch retries
//! (spec §4.H): base 100ms, factor 2, capped at 1s, up to 10 attempts.

use rand::Rng;
use std::time::Duration;

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            factor: 2,
            max_delay: Duration::from_secs(1),
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt number `attempt` (1-indexed), with up to
    /// 20% jitter applied on top of the exponential backoff.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.factor.saturating_pow(attempt.saturating_sub(1).min(16));
        let scaled = self.base.saturating_mul(exp).min(self.max_delay);
        let jitter_frac: f64 = rand::thread_rng().gen_range(0.0..0.2);
        let jitter = Duration::from_secs_f64(scaled.as_secs_f64() * jitter_frac);
        scaled.saturating_add(jitter).min(self.max_delay.saturating_add(jitter))
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Retry a fallible async operation according to this policy.
    /// Returns the last error once attempts are exhausted.
    pub async fn run<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if self.exhausted(attempt) {
                        return Err(err);
                    }
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
