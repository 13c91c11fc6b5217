//! Testing utilities for code built on undertow.
//!
//! # Examples
//!
//! ## Recording breaker events
//!
//! ```rust
//! use undertow::breaker::{BreakerStateKind, CircuitBreaker, ClosedStrategy};
//! use undertow::testing::RecordingMetrics;
//! use undertow::{assert_circuit_open, Effect, Error};
//!
//! # tokio_test::block_on(async {
//! let metrics = RecordingMetrics::new();
//! let breaker = CircuitBreaker::builder()
//!     .closed_strategy(ClosedStrategy::consecutive(1))
//!     .metrics(metrics.clone())
//!     .build_singleton();
//!
//! let effect = breaker.protect(Effect::<()>::fail(Error::msg("down")));
//! let _ = effect.run_standalone().await;
//! assert_circuit_open!(effect.run_standalone().await);
//!
//! assert_eq!(
//!     metrics.transitions(),
//!     vec![(BreakerStateKind::Closed, BreakerStateKind::Open)]
//! );
//! assert_eq!(metrics.rejected_count(), 1);
//! # });
//! ```
//!
//! ## Counting runs
//!
//! ```rust
//! use undertow::testing::CallCounter;
//! use undertow::Effect;
//!
//! # tokio_test::block_on(async {
//! let counter = CallCounter::new();
//! let effect = counter.wrap(Effect::of(1));
//! effect.run_standalone().await.unwrap();
//! effect.run_standalone().await.unwrap();
//! assert_eq!(counter.count(), 2);
//! # });
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::breaker::{BreakerMetrics, BreakerStateKind};
use crate::{Effect, Error};

/// One event seen by [`RecordingMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricEvent {
    /// A state transition.
    StateChange {
        /// State before.
        from: BreakerStateKind,
        /// State after.
        to: BreakerStateKind,
    },
    /// A rejected call.
    Rejected(Duration),
    /// A successful protected call.
    Success,
    /// A counted failure, rendered with `Display`.
    Failure(String),
}

/// A [`BreakerMetrics`] sink that keeps every event in memory.
///
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingMetrics {
    events: Arc<Mutex<Vec<MetricEvent>>>,
}

impl RecordingMetrics {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event so far, in order.
    pub fn events(&self) -> Vec<MetricEvent> {
        self.lock().clone()
    }

    /// Just the state transitions.
    pub fn transitions(&self) -> Vec<(BreakerStateKind, BreakerStateKind)> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                MetricEvent::StateChange { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    /// Number of rejected calls.
    pub fn rejected_count(&self) -> usize {
        self.count(|e| matches!(e, MetricEvent::Rejected(_)))
    }

    /// Number of successful calls.
    pub fn success_count(&self) -> usize {
        self.count(|e| matches!(e, MetricEvent::Success))
    }

    /// Number of counted failures.
    pub fn failure_count(&self) -> usize {
        self.count(|e| matches!(e, MetricEvent::Failure(_)))
    }

    fn count(&self, pred: impl Fn(&MetricEvent) -> bool) -> usize {
        self.lock().iter().filter(|e| pred(e)).count()
    }

    fn push(&self, event: MetricEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MetricEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BreakerMetrics for RecordingMetrics {
    fn on_state_change(&self, from: BreakerStateKind, to: BreakerStateKind) {
        self.push(MetricEvent::StateChange { from, to });
    }

    fn on_rejected(&self, retry_in: Duration) {
        self.push(MetricEvent::Rejected(retry_in));
    }

    fn on_success(&self) {
        self.push(MetricEvent::Success);
    }

    fn on_failure(&self, error: &Error) {
        self.push(MetricEvent::Failure(error.to_string()));
    }
}

/// Counts how many times wrapped effects actually run.
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    calls: Arc<AtomicU32>,
}

impl CallCounter {
    /// A counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// An effect that bumps the counter, then runs `effect`.
    pub fn wrap<T: Send + 'static>(&self, effect: Effect<T>) -> Effect<T> {
        let calls = Arc::clone(&self.calls);
        Effect::defer(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            effect.clone()
        })
    }

    /// Runs so far.
    pub fn count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Back to zero.
    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }
}

/// Assert that a result is a cancellation error.
///
/// An optional second argument is a pattern the [`CancelCause`](crate::CancelCause)
/// must match.
///
/// # Example
///
/// ```rust
/// use undertow::{assert_canceled, CancelCause, Context, Effect};
///
/// # tokio_test::block_on(async {
/// let ctx = Context::background();
/// ctx.cancel();
/// let result = Effect::of(1).run(&ctx).await;
/// assert_canceled!(result, CancelCause::Requested);
/// # });
/// ```
#[macro_export]
macro_rules! assert_canceled {
    ($result:expr) => {
        match $result {
            Err($crate::Error::Canceled(_)) => {}
            other => panic!("Expected cancellation, got {:?}", other),
        }
    };
    ($result:expr, $cause:pat) => {
        match $result {
            Err($crate::Error::Canceled($cause)) => {}
            other => panic!(
                "Expected cancellation matching {}, got {:?}",
                stringify!($cause),
                other
            ),
        }
    };
}

/// Assert that a result is a circuit breaker rejection.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use undertow::{assert_circuit_open, CircuitBreakerError, Effect, Error};
///
/// # tokio_test::block_on(async {
/// let rejected = Effect::<()>::fail(CircuitBreakerError::new(Duration::from_secs(1)).into());
/// assert_circuit_open!(rejected.run_standalone().await);
/// # });
/// ```
#[macro_export]
macro_rules! assert_circuit_open {
    ($result:expr) => {
        match $result {
            Err($crate::Error::CircuitOpen(_)) => {}
            other => panic!("Expected circuit open rejection, got {:?}", other),
        }
    };
}
