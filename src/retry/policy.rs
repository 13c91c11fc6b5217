//! Composable retry policies.
//!
//! A [`RetryPolicy`] is a function from [`RetryStatus`] to an optional delay:
//! `None` means stop, `Some(d)` means wait `d` and try again. Policies are
//! built from small pieces and combined:
//!
//! ```
//! use std::time::Duration;
//! use undertow::retry::{RetryPolicy, RetryStatus};
//!
//! // Exponential backoff, at most 5 retries, never waiting more than 2s
//! let policy = RetryPolicy::exponential_backoff(Duration::from_millis(100))
//!     .join(RetryPolicy::limit_retries(5))
//!     .cap_delay(Duration::from_secs(2));
//!
//! let mut status = RetryStatus::new();
//! let mut delays = Vec::new();
//! while let Some(delay) = policy.apply(&status) {
//!     delays.push(delay.as_millis());
//!     status = status.apply_delay(delay);
//! }
//! assert_eq!(delays, vec![100, 200, 400, 800, 1600]);
//! ```
//!
//! # Combination
//!
//! [`join`](RetryPolicy::join) (also [`Semigroup::combine`]) continues only if
//! both policies continue, and waits the larger of the two delays. The
//! identity for `join` is [`RetryPolicy::empty`], "retry immediately,
//! forever"; [`RetryPolicy::stop`] is the absorbing element.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::monoid::Monoid;
use crate::retry::RetryStatus;
use crate::Semigroup;

type DecideFn = dyn Fn(&RetryStatus) -> Option<Duration> + Send + Sync;

/// A function deciding whether, and after how long, to retry.
#[derive(Clone)]
pub struct RetryPolicy {
    decide: Arc<DecideFn>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("decide", &"<function>")
            .finish()
    }
}

impl RetryPolicy {
    /// Build a policy from a function.
    pub fn from_fn<F>(decide: F) -> Self
    where
        F: Fn(&RetryStatus) -> Option<Duration> + Send + Sync + 'static,
    {
        RetryPolicy {
            decide: Arc::new(decide),
        }
    }

    /// Consult the policy.
    pub fn apply(&self, status: &RetryStatus) -> Option<Duration> {
        (self.decide)(status)
    }

    /// Consult the policy and, if it continues, return the status for the
    /// next attempt.
    pub fn apply_and_advance(&self, status: &RetryStatus) -> Option<RetryStatus> {
        self.apply(status).map(|delay| status.apply_delay(delay))
    }

    /// Never retry.
    pub fn stop() -> Self {
        RetryPolicy::from_fn(|_| None)
    }

    /// Retry immediately, at most `max_retries` times.
    ///
    /// ```
    /// use undertow::retry::{RetryPolicy, RetryStatus};
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::limit_retries(1);
    /// let first = RetryStatus::new();
    /// assert_eq!(policy.apply(&first), Some(Duration::ZERO));
    /// assert_eq!(policy.apply(&first.apply_delay(Duration::ZERO)), None);
    /// ```
    pub fn limit_retries(max_retries: u32) -> Self {
        RetryPolicy::from_fn(move |status| {
            if status.iteration < max_retries {
                Some(Duration::ZERO)
            } else {
                None
            }
        })
    }

    /// Always retry after `delay`.
    pub fn constant_delay(delay: Duration) -> Self {
        RetryPolicy::from_fn(move |_| Some(delay))
    }

    /// Always retry, waiting `base * 2^iteration`.
    pub fn exponential_backoff(base: Duration) -> Self {
        RetryPolicy::from_fn(move |status| {
            Some(base.saturating_mul(2u32.saturating_pow(status.iteration)))
        })
    }

    /// Clamp every delay to at most `max`.
    pub fn cap_delay(self, max: Duration) -> Self {
        RetryPolicy::from_fn(move |status| self.apply(status).map(|d| d.min(max)))
    }

    /// Stop once the next delay would reach `max`.
    pub fn limit_retries_by_delay(self, max: Duration) -> Self {
        RetryPolicy::from_fn(move |status| self.apply(status).filter(|d| *d < max))
    }

    /// Stop once the total time spent waiting would exceed `max`.
    pub fn limit_retries_by_cumulative_delay(self, max: Duration) -> Self {
        RetryPolicy::from_fn(move |status| {
            self.apply(status)
                .filter(|d| status.cumulative_delay.saturating_add(*d) <= max)
        })
    }

    /// Continue only while both policies continue, waiting the longer delay.
    pub fn join(self, other: RetryPolicy) -> Self {
        RetryPolicy::from_fn(move |status| match (self.apply(status), other.apply(status)) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        })
    }
}

impl Semigroup for RetryPolicy {
    fn combine(self, other: Self) -> Self {
        self.join(other)
    }
}

impl Monoid for RetryPolicy {
    fn empty() -> Self {
        RetryPolicy::constant_delay(Duration::ZERO)
    }
}
