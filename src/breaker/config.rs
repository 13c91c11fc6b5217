//! Breaker configuration data.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// How the closed state decides to trip.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use undertow::breaker::ClosedStrategy;
///
/// // Trip after 3 failures in a row
/// let consecutive = ClosedStrategy::consecutive(3);
///
/// // Trip after 5 failures within any 10 second window
/// let windowed = ClosedStrategy::sliding_window(5, Duration::from_secs(10));
/// assert_ne!(consecutive, windowed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ClosedStrategy {
    /// Trip once `max_failures` counted failures accumulate without an
    /// intervening success.
    Count {
        /// Failures needed to trip.
        max_failures: u32,
    },
    /// Trip once `max_failures` counted failures fall within `window`.
    SlidingWindow {
        /// Failures needed to trip.
        max_failures: u32,
        /// How far back failures are remembered.
        window: Duration,
    },
}

impl ClosedStrategy {
    /// Shorthand for [`ClosedStrategy::Count`].
    pub fn consecutive(max_failures: u32) -> Self {
        ClosedStrategy::Count { max_failures }
    }

    /// Shorthand for [`ClosedStrategy::SlidingWindow`].
    pub fn sliding_window(max_failures: u32, window: Duration) -> Self {
        ClosedStrategy::SlidingWindow {
            max_failures,
            window,
        }
    }

    /// Failures needed to trip.
    pub fn max_failures(&self) -> u32 {
        match self {
            ClosedStrategy::Count { max_failures }
            | ClosedStrategy::SlidingWindow { max_failures, .. } => *max_failures,
        }
    }

    /// Record a failure at `now`. Returns true when the breaker should trip.
    pub(crate) fn record_failure(&self, failures: &mut VecDeque<Instant>, now: Instant) -> bool {
        if let ClosedStrategy::SlidingWindow { window, .. } = self {
            while failures
                .front()
                .is_some_and(|t| now.saturating_duration_since(*t) >= *window)
            {
                failures.pop_front();
            }
        }
        failures.push_back(now);
        failures.len() >= self.max_failures() as usize
    }
}

impl Default for ClosedStrategy {
    fn default() -> Self {
        ClosedStrategy::Count { max_failures: 5 }
    }
}

/// Whether a cancellation seen by the protected effect counts as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CancellationPolicy {
    /// Cancellations neither count nor reset.
    #[default]
    Ignore,
    /// Cancellations count like any other failure.
    Count,
}
