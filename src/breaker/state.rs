//! Breaker state and the cell that owns it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::retry::RetryStatus;

/// Where a breaker stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through; counted failures are remembered.
    Closed {
        /// When each remembered failure happened, oldest first.
        failures: VecDeque<Instant>,
    },
    /// Calls are rejected until `since + cooldown`.
    Open {
        /// When the breaker (re)opened.
        since: Instant,
        /// How long to reject before admitting a canary.
        cooldown: Duration,
        /// Escalation state fed to the retry policy on the next canary
        /// failure.
        retry: RetryStatus,
        /// The delay the retry policy chose for this open period.
        delay: Duration,
    },
    /// One canary call is in flight; everyone else is rejected.
    HalfOpen {
        /// Escalation state carried over from `Open`.
        retry: RetryStatus,
        /// The delay of the open period that just ended.
        delay: Duration,
    },
}

/// The tag of a [`BreakerState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum BreakerStateKind {
    /// See [`BreakerState::Closed`].
    Closed,
    /// See [`BreakerState::Open`].
    Open,
    /// See [`BreakerState::HalfOpen`].
    HalfOpen,
}

impl fmt::Display for BreakerStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BreakerStateKind::Closed => "closed",
            BreakerStateKind::Open => "open",
            BreakerStateKind::HalfOpen => "half_open",
        })
    }
}

impl BreakerState {
    pub(crate) fn closed() -> Self {
        BreakerState::Closed {
            failures: VecDeque::new(),
        }
    }

    /// The state's tag.
    pub fn kind(&self) -> BreakerStateKind {
        match self {
            BreakerState::Closed { .. } => BreakerStateKind::Closed,
            BreakerState::Open { .. } => BreakerStateKind::Open,
            BreakerState::HalfOpen { .. } => BreakerStateKind::HalfOpen,
        }
    }

    /// Convenience for `kind() == Closed`.
    pub fn is_closed(&self) -> bool {
        self.kind() == BreakerStateKind::Closed
    }

    /// Convenience for `kind() == Open`.
    pub fn is_open(&self) -> bool {
        self.kind() == BreakerStateKind::Open
    }

    /// Remembered failures while closed, zero otherwise.
    pub fn failure_count(&self) -> usize {
        match self {
            BreakerState::Closed { failures } => failures.len(),
            _ => 0,
        }
    }

    /// Escalation iteration while open or half-open.
    pub fn iteration(&self) -> Option<u32> {
        match self {
            BreakerState::Closed { .. } => None,
            BreakerState::Open { retry, .. } | BreakerState::HalfOpen { retry, .. } => {
                Some(retry.iteration)
            }
        }
    }

    /// When an open breaker admits its next canary.
    ///
    /// `None` when not open, or when the cooldown overflows `Instant`.
    pub fn reopen_at(&self) -> Option<Instant> {
        match self {
            BreakerState::Open {
                since, cooldown, ..
            } => since.checked_add(*cooldown),
            _ => None,
        }
    }
}

/// Shared, mutable home of one [`BreakerState`].
///
/// Every decision and the transition it commits happen under one lock
/// acquisition. The lock is never held across an await point.
#[derive(Clone)]
pub struct BreakerCell {
    state: Arc<Mutex<BreakerState>>,
}

impl BreakerCell {
    /// A cell starting closed with no failures.
    pub fn new() -> Self {
        BreakerCell {
            state: Arc::new(Mutex::new(BreakerState::closed())),
        }
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> BreakerState {
        self.update(|state| state.clone())
    }

    /// Read-modify-write under the lock.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut BreakerState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl Default for BreakerCell {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BreakerCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BreakerCell").field(&self.snapshot()).finish()
    }
}
