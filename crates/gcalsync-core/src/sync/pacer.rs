//! Rate-limited executor for remote calls.
//!
//! Every attempt waits for the next tick of a fixed interval, so no two calls
//! are ever closer together than `rate_interval`. Transient failures are
//! retried with exponential backoff; the backoff sleep and the tick wait both
//! give way to cancellation. An HTTP call already in flight is never killed.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CoreError, RemoteError, Result};

/// Retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Backoff before the first retry; doubled for each one after.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(8);

/// Backoff schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): 8 s, 16 s, 32 s by default.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }
}

/// Paces remote calls and retries transient failures.
pub struct Pacer {
    rate_interval: Duration,
    retry: RetryPolicy,
    cancel: CancellationToken,
    // Created on first use so its clock starts inside the runtime.
    interval: Option<Interval>,
}

impl Pacer {
    pub fn new(rate_interval: Duration, retry: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            rate_interval,
            retry,
            cancel,
            interval: None,
        }
    }

    /// Run `call` on the next tick, retrying transient failures.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Cancelled`] if the token fires before an attempt or
    ///   during a wait.
    /// - [`RemoteError::Exhausted`] once every retry failed transiently.
    /// - Any non-transient error from `call`, unchanged.
    pub async fn run<T, F, Fut>(&mut self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            self.tick().await?;

            debug!(operation, attempt = retries + 1, "remote call");
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    if retries >= self.retry.max_retries {
                        warn!(operation, attempts = retries + 1, "retries exhausted");
                        return Err(RemoteError::Exhausted {
                            operation: operation.to_string(),
                            attempts: retries + 1,
                            last: err.to_string(),
                        }
                        .into());
                    }
                    let delay = self.retry.delay_for(retries);
                    warn!(
                        operation,
                        retry = retries + 1,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "transient failure, backing off"
                    );
                    retries += 1;
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(CoreError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn tick(&mut self) -> Result<()> {
        let rate_interval = self.rate_interval;
        let interval = self.interval.get_or_insert_with(|| {
            let mut interval = tokio::time::interval(rate_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        tokio::select! {
            _ = self.cancel.cancelled() => Err(CoreError::Cancelled),
            _ = interval.tick() => Ok(()),
        }
    }
}
