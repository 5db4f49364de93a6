//! Bounded retries for calls against a cluster API
//!
//! Only failures a predicate accepts are repeated; appliers pass
//! [`Error::is_transient`](crate::Error::is_transient) so connection resets
//! and 5xx responses are absorbed while 4xx answers, 409 conflicts included,
//! reach the caller on the first attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Exponential backoff schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    /// Total attempts, the first one included
    pub attempts: u32,
    /// Wait before the first retry
    pub base: Duration,
    /// Upper bound for any single wait
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 4,
            base: Duration::from_millis(200),
            cap: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    /// Default schedule with `attempts` tries (at least one)
    pub fn attempts(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            ..Default::default()
        }
    }

    /// Nominal wait before retry number `retry` (1-based): base doubled per retry, capped
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Wait with jitter, between half and the full nominal delay
    pub fn jittered(&self, retry: u32) -> Duration {
        let nominal = self.delay(retry);
        nominal.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
    }
}

/// Run `call` until it succeeds, fails with an error `retryable` rejects, or
/// the schedule runs out; the last error is returned
pub async fn retry<T, E, F, Fut>(
    backoff: &Backoff,
    what: &str,
    retryable: impl Fn(&E) -> bool,
    mut call: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = backoff.attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !retryable(&err) {
            debug!(call = what, error = %err, "not retrying");
            return Err(err);
        }
        if attempt >= attempts {
            warn!(call = what, attempts, error = %err, "giving up");
            return Err(err);
        }

        let wait = backoff.jittered(attempt);
        warn!(call = what, attempt, error = %err, wait_ms = wait.as_millis() as u64, "retrying");
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}
