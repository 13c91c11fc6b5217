//! Per-loop retry bookkeeping.

use std::time::Duration;

/// Where a retry loop stands.
///
/// A fresh status has iteration 0 and no delays. The retry loop derives the
/// next status with [`apply_delay`](RetryStatus::apply_delay) after every
/// rejected attempt; each loop owns its own status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryStatus {
    /// Zero-based attempt counter.
    pub iteration: u32,
    /// Sum of every delay waited so far.
    pub cumulative_delay: Duration,
    /// The delay waited before the current attempt, if any.
    pub previous_delay: Option<Duration>,
}

impl RetryStatus {
    /// Status before the first attempt.
    pub fn new() -> Self {
        Self::default()
    }

    /// The status for the next attempt after waiting `delay`.
    ///
    /// ```
    /// use std::time::Duration;
    /// use undertow::retry::RetryStatus;
    ///
    /// let status = RetryStatus::new()
    ///     .apply_delay(Duration::from_millis(100))
    ///     .apply_delay(Duration::from_millis(200));
    ///
    /// assert_eq!(status.iteration, 2);
    /// assert_eq!(status.cumulative_delay, Duration::from_millis(300));
    /// assert_eq!(status.previous_delay, Some(Duration::from_millis(200)));
    /// ```
    pub fn apply_delay(self, delay: Duration) -> Self {
        RetryStatus {
            iteration: self.iteration.saturating_add(1),
            cumulative_delay: self.cumulative_delay.saturating_add(delay),
            previous_delay: Some(delay),
        }
    }
}
