//! Synchronous retry runner.

use crate::config::RetryPolicy;
use crate::error::SyncResult;
use tracing::{debug, warn};

/// Runs fallible operations under a [`RetryPolicy`].
///
/// Only errors reporting [`SyncError::is_retryable`] are retried; anything
/// else returns immediately. The runner sleeps the policy's backoff delay
/// between attempts.
pub struct Retrier {
    policy: RetryPolicy,
}

impl Retrier {
    /// Creates a runner for the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Returns the policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Executes `operation`, retrying transient failures.
    pub fn run<T>(&self, mut operation: impl FnMut() -> SyncResult<T>) -> SyncResult<T> {
        let mut attempt = 0u32;

        loop {
            match operation() {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    attempt += 1;
                    if !err.is_retryable() || attempt >= self.policy.max_attempts {
                        if attempt > 1 {
                            warn!(attempt, %err, "giving up after retries");
                        }
                        return Err(err);
                    }

                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(attempt, %err, ?delay, "attempt failed, retrying");
                    std::thread::sleep(delay);
                }
            }
        }
    }
}
