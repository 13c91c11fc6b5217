//! Circuit breaking for effects.
//!
//! A breaker watches the outcomes of a protected effect and stops calling it
//! once it keeps failing, giving the dependency behind it room to recover.
//!
//! # States
//!
//! ```text
//! Closed ──[closed strategy trips]──────────────> Open
//!   ▲                                              │
//!   │                                              │ [cooldown elapsed,
//!   │                                              │  next caller]
//!   │                                              ▼
//!   └──────[canary succeeds]─────────────────── HalfOpen
//!                 [canary fails] ──> Open (next iteration, longer cooldown)
//! ```
//!
//! The Open to HalfOpen step has no timer: the first call after the
//! cooldown makes it, and becomes the one canary. Cooldowns come from a
//! [`RetryPolicy`](crate::retry::RetryPolicy), so repeated canary failures
//! back off the same way retries do.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use undertow::breaker::{make_singleton_breaker, BreakerStateKind, ClosedStrategy, ManualClock, NoopMetrics};
//! use undertow::retry::RetryPolicy;
//! use undertow::{Effect, Error};
//!
//! # tokio_test::block_on(async {
//! let clock = ManualClock::new();
//! let breaker = make_singleton_breaker(
//!     clock.clone(),
//!     ClosedStrategy::consecutive(2),
//!     |err: &Error| Some(err.clone()),
//!     RetryPolicy::exponential_backoff(Duration::from_millis(100)),
//!     NoopMetrics,
//! );
//!
//! let failing = breaker.protect(Effect::<()>::fail(Error::msg("down")));
//! let _ = failing.run_standalone().await;
//! let _ = failing.run_standalone().await;
//! assert_eq!(breaker.state().kind(), BreakerStateKind::Open);
//!
//! let err = failing.run_standalone().await.unwrap_err();
//! assert!(err.is_circuit_open());
//!
//! clock.advance(Duration::from_millis(100));
//! let healthy = breaker.protect(Effect::of(1));
//! assert_eq!(healthy.run_standalone().await.unwrap(), 1);
//! assert!(breaker.state().is_closed());
//! # });
//! ```

mod circuit;
mod clock;
mod config;
mod metrics;
mod state;

pub use circuit::{CircuitBreaker, CircuitBreakerBuilder, ErrorFilter, SingletonBreaker};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CancellationPolicy, ClosedStrategy};
pub use metrics::{BreakerMetrics, NoopMetrics};
pub use state::{BreakerCell, BreakerState, BreakerStateKind};

use crate::retry::RetryPolicy;
use crate::Error;

/// Build a breaker from its parts.
///
/// Protect effects with [`CircuitBreaker::protect`], passing the
/// [`BreakerCell`] that should hold their shared state.
pub fn make_circuit_breaker<C, F, M>(
    clock: C,
    closed: ClosedStrategy,
    check_error: F,
    retry_policy: impl Into<RetryPolicy>,
    metrics: M,
) -> CircuitBreaker
where
    C: Clock + 'static,
    F: Fn(&Error) -> Option<Error> + Send + Sync + 'static,
    M: BreakerMetrics + 'static,
{
    CircuitBreaker::builder()
        .clock(clock)
        .closed_strategy(closed)
        .check_error(check_error)
        .retry_policy(retry_policy)
        .metrics(metrics)
        .build()
}

/// Like [`make_circuit_breaker`], bound to one shared cell.
pub fn make_singleton_breaker<C, F, M>(
    clock: C,
    closed: ClosedStrategy,
    check_error: F,
    retry_policy: impl Into<RetryPolicy>,
    metrics: M,
) -> SingletonBreaker
where
    C: Clock + 'static,
    F: Fn(&Error) -> Option<Error> + Send + Sync + 'static,
    M: BreakerMetrics + 'static,
{
    CircuitBreaker::builder()
        .clock(clock)
        .closed_strategy(closed)
        .check_error(check_error)
        .retry_policy(retry_policy)
        .metrics(metrics)
        .build_singleton()
}

#[cfg(test)]
mod tests;
