use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;
use wikihist_state::StoreResult;

use crate::error::ReconcileError;

const INITIAL_DELAY_MS: u64 = 200;
const BACKOFF_FACTOR: f64 = 2.0;

/// Exponential backoff with +/-10% jitter, starting at `initial` for attempt 1.
pub fn backoff(initial: Duration, attempt: u64) -> Duration {
    let exp = BACKOFF_FACTOR.powi(attempt.saturating_sub(1) as i32);
    let base = (initial.as_millis() as f64 * exp) as u64;
    let jitter = rand::rng().random_range(0.9..1.1);
    Duration::from_millis((base as f64 * jitter) as u64)
}

/// Bounded retry for transient store failures (busy or locked database,
/// pool timeouts). Every other failure surfaces on the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(INITIAL_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub const fn no_retries() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
        }
    }

    pub(crate) async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, ReconcileError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt: u64 = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < u64::from(self.max_retries) => {
                    attempt += 1;
                    let delay = backoff(self.initial_delay, attempt);
                    warn!(
                        operation,
                        attempt,
                        ?delay,
                        error = %err,
                        "transient store error; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    return Err(ReconcileError::RetriesExhausted {
                        operation,
                        attempts: attempt + 1,
                        source: err,
                    });
                }
                Err(err) => return Err(ReconcileError::from_store(operation, err)),
            }
        }
    }
}
