//! Retry policy and loop-local retry state.
//!
//! The policy is deliberately flat: every non-cancellation read error feeds
//! one shared counter, and reaching the threshold triggers one fixed pause.
//!
//! ```text
//! ┌─────────┐  success / below threshold  ┌─────────┐
//! │ RUNNING │ <─────────────────────────> │  read   │
//! └─────────┘                             └─────────┘
//!      ^                                       │
//!      │ pause elapsed, counter = 0            │ counter >= max_retries
//!      │                                       v
//!      │                                ┌─────────────┐
//!      └─────────────────────────────── │   BACKOFF   │
//!                                       └─────────────┘
//! ```

use std::time::{Duration, Instant};

/// Consecutive read errors tolerated before pausing.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Pause applied once the threshold is reached.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

/// Minimum spacing between "partition at end" notices.
pub const DEFAULT_IDLE_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Count-then-pause retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Duration,
    idle_log_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF,
            idle_log_interval: DEFAULT_IDLE_LOG_INTERVAL,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the error threshold (at least 1).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Set the pause length.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the idle notice spacing.
    pub fn with_idle_log_interval(mut self, interval: Duration) -> Self {
        self.idle_log_interval = interval;
        self
    }

    /// Consecutive read errors before a pause
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Length of the pause
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Minimum spacing between idle-partition notices
    pub fn idle_log_interval(&self) -> Duration {
        self.idle_log_interval
    }
}

/// What the loop does after recording a read error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Re-poll immediately.
    Continue,
    /// Sleep for the given duration, then reset the counter.
    Pause(Duration),
}

/// Outcome of an end-of-stream read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndOfStream {
    pub backoff: Backoff,
    /// Whether the idle notice should be emitted now
    pub notify: bool,
}

/// Retry counter and idle-notice timestamp owned by one loop instance.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    retry_count: u32,
    last_idle_notice: Option<Instant>,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        let max_retries = policy.max_retries;
        let policy = policy.with_max_retries(max_retries);
        Self {
            policy,
            retry_count: 0,
            last_idle_notice: None,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Current number of consecutive read errors.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// A message was read. Resets the counter whatever the handler does next.
    pub fn record_success(&mut self) {
        self.retry_count = 0;
    }

    /// The reader reported that the partition has no new messages.
    pub fn record_end_of_stream(&mut self, now: Instant) -> EndOfStream {
        self.retry_count += 1;
        if self.retry_count < self.policy.max_retries {
            return EndOfStream {
                backoff: Backoff::Continue,
                notify: false,
            };
        }

        let notify = self.should_notify_idle(now);
        if notify {
            self.last_idle_notice = Some(now);
        }

        EndOfStream {
            backoff: Backoff::Pause(self.policy.backoff),
            notify,
        }
    }

    /// The reader failed with a non-cancellation, non-EOF error.
    pub fn record_failure(&mut self) -> Backoff {
        self.retry_count += 1;
        self.backoff()
    }

    /// Called once a pause has elapsed.
    pub fn reset(&mut self) {
        self.retry_count = 0;
    }

    fn backoff(&self) -> Backoff {
        if self.retry_count >= self.policy.max_retries {
            Backoff::Pause(self.policy.backoff)
        } else {
            Backoff::Continue
        }
    }

    fn should_notify_idle(&self, now: Instant) -> bool {
        match self.last_idle_notice {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.policy.idle_log_interval,
        }
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
