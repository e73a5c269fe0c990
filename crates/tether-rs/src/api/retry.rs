//! Retry policy with jittered exponential backoff.
//!
//! A [`RetryPolicy`] is assembled per call by merging fragments onto the
//! default (one attempt, no retries). Status failures are retried only when
//! the merged policy marks the status eligible; the wait before the next
//! attempt is `200ms * 2^attempt` plus up to 200ms of random jitter and is
//! cut short by cancellation.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Base delay for the backoff schedule.
pub const BASE_DELAY: Duration = Duration::from_millis(200);

/// Retry configuration for a single call.
///
/// Fragments are combined with [`merge`](Self::merge): `retries` and
/// `retry_above_code` only override when positive, `retry_codes` accumulate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt (0 = single attempt).
    pub retries: u32,
    /// Statuses strictly above this code are retryable. 0 disables the
    /// threshold.
    pub retry_above_code: u16,
    /// Individual statuses that are retryable regardless of the threshold.
    pub retry_codes: BTreeSet<u16>,
}

impl RetryPolicy {
    /// A fragment that only sets the retry count.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            retries,
            ..Default::default()
        }
    }

    /// Retry every status strictly above `code`.
    pub fn retry_above(mut self, code: u16) -> Self {
        self.retry_above_code = code;
        self
    }

    /// Retry the given statuses.
    pub fn retry_on(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_codes.extend(codes);
        self
    }

    /// Fold `other` into this policy.
    pub fn merge(&mut self, other: &RetryPolicy) {
        if other.retries > 0 {
            self.retries = other.retries;
        }
        if other.retry_above_code > 0 {
            self.retry_above_code = other.retry_above_code;
        }
        self.retry_codes.extend(other.retry_codes.iter().copied());
    }

    /// Merge `fragments` in order onto the default policy.
    pub fn merged<'a>(fragments: impl IntoIterator<Item = &'a RetryPolicy>) -> Self {
        let mut policy = Self::default();
        for fragment in fragments {
            policy.merge(fragment);
        }
        policy
    }

    /// Total number of attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Whether a failure status may be retried.
    pub fn can_retry(&self, status: u16) -> bool {
        (self.retry_above_code > 0 && status > self.retry_above_code)
            || self.retry_codes.contains(&status)
    }

    /// Delay before the attempt following `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let jitter = Duration::from_nanos(fastrand::u64(0..BASE_DELAY.as_nanos() as u64));
        BASE_DELAY.saturating_mul(factor).saturating_add(jitter)
    }
}

/// Sleep for `delay` unless `cancel` fires first.
///
/// Cancellation wins when both are ready at the same time.
pub async fn backoff(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
