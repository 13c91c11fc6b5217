//! Observation hooks for breaker activity.

use std::fmt;
use std::time::Duration;

use crate::breaker::BreakerStateKind;
use crate::Error;

/// Receives breaker events.
///
/// Called outside the state lock, after the transition is committed. Every
/// method defaults to doing nothing.
pub trait BreakerMetrics: Send + Sync + fmt::Debug {
    /// The breaker moved from `from` to `to`.
    fn on_state_change(&self, from: BreakerStateKind, to: BreakerStateKind) {
        let _ = (from, to);
    }

    /// A call was rejected without running.
    fn on_rejected(&self, retry_in: Duration) {
        let _ = retry_in;
    }

    /// A protected call succeeded.
    fn on_success(&self) {}

    /// A protected call failed with an error that counts. `error` is the
    /// filtered error, which may differ from what the caller saw.
    fn on_failure(&self, error: &Error) {
        let _ = error;
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl BreakerMetrics for NoopMetrics {}
