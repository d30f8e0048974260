//! Engine configuration.

use std::time::Duration;
use uuid::Uuid;

/// Shared exponential-backoff policy.
///
/// Used both for reconnection and for operation-push retry. The delay for
/// attempt `n` (1-based) is `base_delay * 2^(n-1)`, capped at `max_delay`;
/// attempt 0 has no delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap for exponential growth.
    pub max_delay: Duration,
    /// Whether to add up to 25% jitter to delays.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Creates a policy with the given attempt limit.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: false,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculates the delay before the given attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(32);
        let base = self.base_delay.as_millis() as f64 * 2f64.powi(exponent as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let millis = if self.jitter {
            capped + capped * 0.25 * subsec_jitter()
        } else {
            capped
        };

        Duration::from_millis(millis as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Pseudo-random jitter factor in `[0, 1)` derived from the clock.
fn subsec_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Thresholds for multi-party burst detection.
///
/// A rapid cluster of changes to one entity is treated as a multi-party
/// merge once it contains at least `min_changes` changes from at least
/// `min_actors` distinct actors. The thresholds are policy, not protocol,
/// and are deliberately configurable.
#[derive(Debug, Clone)]
pub struct BurstConfig {
    /// Minimum accumulated changes before a burst merge runs.
    pub min_changes: usize,
    /// Minimum distinct actors among the accumulated changes.
    pub min_actors: usize,
    /// Maximum buffered changes per entity (oldest dropped beyond this).
    pub buffer_cap: usize,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            min_changes: 3,
            min_actors: 2,
            buffer_cap: 16,
        }
    }
}

/// Configuration for a sync engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Client id stamped on every operation.
    pub client_id: String,
    /// Offline queue capacity (oldest evicted beyond this).
    pub queue_capacity: usize,
    /// Batch buffer size that triggers an immediate flush.
    pub batch_size: usize,
    /// Debounce window after which a smaller batch flushes.
    pub flush_debounce: Duration,
    /// Retry policy for operation pushes and state pulls.
    pub push_retry: RetryPolicy,
    /// Retry policy for reconnection.
    pub reconnect: RetryPolicy,
    /// Burst-detection thresholds.
    pub burst: BurstConfig,
    /// Bounded timeout carried by every request.
    pub request_timeout: Duration,
}

impl EngineConfig {
    /// Creates a configuration for the given client id.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            queue_capacity: 1000,
            batch_size: 10,
            flush_debounce: Duration::from_millis(50),
            push_retry: RetryPolicy::new(3),
            reconnect: RetryPolicy::new(5).with_max_delay(Duration::from_secs(10)),
            burst: BurstConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the offline queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the flush debounce window.
    pub fn with_flush_debounce(mut self, window: Duration) -> Self {
        self.flush_debounce = window;
        self
    }

    /// Sets the push retry policy.
    pub fn with_push_retry(mut self, policy: RetryPolicy) -> Self {
        self.push_retry = policy;
        self
    }

    /// Sets the reconnect policy.
    pub fn with_reconnect(mut self, policy: RetryPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Sets the burst thresholds.
    pub fn with_burst(mut self, burst: BurstConfig) -> Self {
        self.burst = burst;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }
}
