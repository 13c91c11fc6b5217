//! The breaker state machine.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::breaker::{
    BreakerCell, BreakerMetrics, BreakerState, BreakerStateKind, CancellationPolicy,
    ClosedStrategy, Clock, NoopMetrics, SystemClock,
};
use crate::context::Context;
use crate::error::{CircuitBreakerError, Error, Result};
use crate::retry::{RetryPolicy, RetryStatus};
use crate::Effect;

/// Decides whether an error counts toward tripping the breaker.
///
/// `Some(e)` counts the failure and reports `e` to metrics; `None` lets it
/// pass without counting. The caller always sees the original error.
pub type ErrorFilter = Arc<dyn Fn(&Error) -> Option<Error> + Send + Sync>;

struct Inner {
    name: Option<String>,
    clock: Arc<dyn Clock>,
    closed: ClosedStrategy,
    check_error: ErrorFilter,
    policy: RetryPolicy,
    metrics: Arc<dyn BreakerMetrics>,
    cancellation: CancellationPolicy,
}

/// Wraps effects so that a failing dependency is short-circuited.
///
/// The breaker itself holds only configuration. State lives in a
/// [`BreakerCell`], so one breaker can guard many independent cells (one per
/// downstream host, say). See [`SingletonBreaker`] for the common one-cell
/// case.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.inner.name)
            .field("closed", &self.inner.closed)
            .field("cancellation", &self.inner.cancellation)
            .field("clock", &self.inner.clock)
            .field("metrics", &self.inner.metrics)
            .finish_non_exhaustive()
    }
}

enum Admission {
    Pass,
    Canary,
    Rejected(Duration),
}

enum Outcome {
    Success,
    Counted(Error),
    Uncounted,
    Neutral,
}

impl CircuitBreaker {
    /// Start configuring a breaker.
    pub fn builder() -> CircuitBreakerBuilder {
        CircuitBreakerBuilder::default()
    }

    /// Guard `effect` with the state in `cell`.
    ///
    /// Each run of the returned effect consults the cell:
    ///
    /// - closed: runs `effect` and records the outcome
    /// - open and still cooling down: fails with
    ///   [`Error::CircuitOpen`] without running `effect`
    /// - open and cooled down: this run becomes the canary
    /// - half-open: fails with [`Error::CircuitOpen`], suggesting the delay
    ///   of the open period that just ended
    pub fn protect<T: Send + 'static>(&self, cell: &BreakerCell, effect: Effect<T>) -> Effect<T> {
        let breaker = self.clone();
        let cell = cell.clone();
        Effect::from_run(move |ctx| {
            let breaker = breaker.clone();
            let cell = cell.clone();
            let effect = effect.clone();
            async move { breaker.call(&cell, &effect, &ctx).await }
        })
    }

    async fn call<T: Send + 'static>(
        &self,
        cell: &BreakerCell,
        effect: &Effect<T>,
        ctx: &Context,
    ) -> Result<T> {
        match self.admit(cell) {
            Admission::Rejected(retry_in) => {
                self.inner.metrics.on_rejected(retry_in);
                debug!(
                    breaker = self.name(),
                    retry_in_ms = retry_in.as_millis() as u64,
                    "call rejected by open circuit"
                );
                Err(CircuitBreakerError::new(retry_in).into())
            }
            Admission::Pass => {
                let result = effect.run(ctx).await;
                self.settle_closed(cell, self.classify(&result));
                result
            }
            Admission::Canary => {
                let guard = CanaryGuard {
                    breaker: self.clone(),
                    cell: cell.clone(),
                    armed: true,
                };
                let result = effect.run(ctx).await;
                guard.disarm();
                self.settle_canary(cell, self.classify(&result));
                result
            }
        }
    }

    fn admit(&self, cell: &BreakerCell) -> Admission {
        let now = self.inner.clock.now();
        let admission = cell.update(|state| match *state {
            BreakerState::Closed { .. } => Admission::Pass,
            BreakerState::HalfOpen { delay, .. } => Admission::Rejected(delay),
            BreakerState::Open {
                since,
                cooldown,
                retry,
                delay,
            } => {
                let elapsed = now.saturating_duration_since(since);
                if elapsed < cooldown {
                    Admission::Rejected(cooldown - elapsed)
                } else {
                    *state = BreakerState::HalfOpen { retry, delay };
                    Admission::Canary
                }
            }
        });

        if let Admission::Canary = admission {
            self.inner
                .metrics
                .on_state_change(BreakerStateKind::Open, BreakerStateKind::HalfOpen);
            info!(
                breaker = self.name(),
                from = %BreakerStateKind::Open,
                to = %BreakerStateKind::HalfOpen,
                "circuit half-open, admitting canary"
            );
        }
        admission
    }

    fn classify<T>(&self, result: &Result<T>) -> Outcome {
        match result {
            Ok(_) => Outcome::Success,
            Err(Error::Canceled(_)) if self.inner.cancellation == CancellationPolicy::Ignore => {
                Outcome::Neutral
            }
            Err(error) => match (self.inner.check_error)(error) {
                Some(counted) => Outcome::Counted(counted),
                None => Outcome::Uncounted,
            },
        }
    }

    fn settle_closed(&self, cell: &BreakerCell, outcome: Outcome) {
        match outcome {
            Outcome::Success => {
                cell.update(|state| {
                    if let BreakerState::Closed { failures } = state {
                        failures.clear();
                    }
                });
                self.inner.metrics.on_success();
            }
            Outcome::Counted(error) => {
                self.inner.metrics.on_failure(&error);
                let now = self.inner.clock.now();
                let opened = cell.update(|state| {
                    // Another caller may have tripped it already
                    let BreakerState::Closed { failures } = state else {
                        return None;
                    };
                    if !self.inner.closed.record_failure(failures, now) {
                        return None;
                    }
                    let retry = RetryStatus::new();
                    let delay = self.inner.policy.apply(&retry).unwrap_or(Duration::ZERO);
                    *state = BreakerState::Open {
                        since: now,
                        cooldown: delay,
                        retry,
                        delay,
                    };
                    Some(delay)
                });
                if let Some(delay) = opened {
                    self.opened(BreakerStateKind::Closed, 0, delay, &error);
                }
            }
            Outcome::Uncounted | Outcome::Neutral => {}
        }
    }

    fn settle_canary(&self, cell: &BreakerCell, outcome: Outcome) {
        match outcome {
            Outcome::Success => {
                self.inner.metrics.on_success();
                self.close(cell);
            }
            Outcome::Uncounted => self.close(cell),
            Outcome::Counted(error) => {
                self.inner.metrics.on_failure(&error);
                let now = self.inner.clock.now();
                let reopened = cell.update(|state| {
                    let BreakerState::HalfOpen { retry, delay } = *state else {
                        return None;
                    };
                    let next = retry.apply_delay(delay);
                    let next_delay = self.inner.policy.apply(&next).unwrap_or(delay);
                    *state = BreakerState::Open {
                        since: now,
                        cooldown: next_delay,
                        retry: next,
                        delay: next_delay,
                    };
                    Some((next.iteration, next_delay))
                });
                if let Some((iteration, delay)) = reopened {
                    self.opened(BreakerStateKind::HalfOpen, iteration, delay, &error);
                }
            }
            Outcome::Neutral => self.rearm(cell),
        }
    }

    fn close(&self, cell: &BreakerCell) {
        let closed = cell.update(|state| {
            if let BreakerState::HalfOpen { .. } = state {
                *state = BreakerState::closed();
                true
            } else {
                false
            }
        });
        if closed {
            self.inner
                .metrics
                .on_state_change(BreakerStateKind::HalfOpen, BreakerStateKind::Closed);
            info!(
                breaker = self.name(),
                from = %BreakerStateKind::HalfOpen,
                to = %BreakerStateKind::Closed,
                "circuit closed"
            );
        }
    }

    /// Put a half-open cell back to open with no cooldown, keeping the
    /// escalation iteration. The next caller becomes the canary.
    fn rearm(&self, cell: &BreakerCell) {
        let now = self.inner.clock.now();
        let rearmed = cell.update(|state| {
            let BreakerState::HalfOpen { retry, delay } = *state else {
                return false;
            };
            *state = BreakerState::Open {
                since: now,
                cooldown: Duration::ZERO,
                retry,
                delay,
            };
            true
        });
        if rearmed {
            self.inner
                .metrics
                .on_state_change(BreakerStateKind::HalfOpen, BreakerStateKind::Open);
            debug!(breaker = self.name(), "canary abandoned, circuit re-armed");
        }
    }

    fn opened(&self, from: BreakerStateKind, iteration: u32, delay: Duration, error: &Error) {
        self.inner
            .metrics
            .on_state_change(from, BreakerStateKind::Open);
        warn!(
            breaker = self.name(),
            from = %from,
            to = %BreakerStateKind::Open,
            iteration,
            reopen_in_ms = delay.as_millis() as u64,
            %error,
            "circuit opened"
        );
    }

    fn name(&self) -> &str {
        self.inner.name.as_deref().unwrap_or("unnamed")
    }
}

/// Re-arms the breaker if a canary run is dropped before it settles.
struct CanaryGuard {
    breaker: CircuitBreaker,
    cell: BreakerCell,
    armed: bool,
}

impl CanaryGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CanaryGuard {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.rearm(&self.cell);
        }
    }
}

/// Builder for [`CircuitBreaker`].
///
/// Defaults: [`SystemClock`], trip after 5 consecutive failures, every error
/// counts, exponential backoff from 1s capped at 60s, [`NoopMetrics`],
/// cancellations ignored.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use undertow::breaker::{CircuitBreaker, ClosedStrategy};
/// use undertow::retry::RetryPolicy;
/// use undertow::Effect;
///
/// # tokio_test::block_on(async {
/// let breaker = CircuitBreaker::builder()
///     .name("inventory")
///     .closed_strategy(ClosedStrategy::consecutive(3))
///     .retry_policy(RetryPolicy::exponential_backoff(Duration::from_millis(100)))
///     .build_singleton();
///
/// let guarded = breaker.protect(Effect::of("in stock"));
/// assert_eq!(guarded.run_standalone().await.unwrap(), "in stock");
/// assert!(breaker.state().is_closed());
/// # });
/// ```
pub struct CircuitBreakerBuilder {
    name: Option<String>,
    clock: Arc<dyn Clock>,
    closed: ClosedStrategy,
    check_error: ErrorFilter,
    policy: RetryPolicy,
    metrics: Arc<dyn BreakerMetrics>,
    cancellation: CancellationPolicy,
}

impl Default for CircuitBreakerBuilder {
    fn default() -> Self {
        CircuitBreakerBuilder {
            name: None,
            clock: Arc::new(SystemClock),
            closed: ClosedStrategy::default(),
            check_error: Arc::new(|error: &Error| Some(error.clone())),
            policy: RetryPolicy::exponential_backoff(Duration::from_secs(1))
                .cap_delay(Duration::from_secs(60)),
            metrics: Arc::new(NoopMetrics),
            cancellation: CancellationPolicy::default(),
        }
    }
}

impl fmt::Debug for CircuitBreakerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerBuilder")
            .field("name", &self.name)
            .field("closed", &self.closed)
            .field("cancellation", &self.cancellation)
            .finish_non_exhaustive()
    }
}

impl CircuitBreakerBuilder {
    /// Name used in log events.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Time source.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// When the closed state trips.
    pub fn closed_strategy(mut self, closed: ClosedStrategy) -> Self {
        self.closed = closed;
        self
    }

    /// Which errors count toward tripping.
    pub fn check_error<F>(mut self, check_error: F) -> Self
    where
        F: Fn(&Error) -> Option<Error> + Send + Sync + 'static,
    {
        self.check_error = Arc::new(check_error);
        self
    }

    /// Policy computing each open period. Iteration 0 is the first trip;
    /// every canary failure advances the iteration.
    pub fn retry_policy(mut self, policy: impl Into<RetryPolicy>) -> Self {
        self.policy = policy.into();
        self
    }

    /// Event sink.
    pub fn metrics(mut self, metrics: impl BreakerMetrics + 'static) -> Self {
        self.metrics = Arc::new(metrics);
        self
    }

    /// Whether cancellations count as failures.
    pub fn cancellation_policy(mut self, cancellation: CancellationPolicy) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Finish the breaker.
    pub fn build(self) -> CircuitBreaker {
        CircuitBreaker {
            inner: Arc::new(Inner {
                name: self.name,
                clock: self.clock,
                closed: self.closed,
                check_error: self.check_error,
                policy: self.policy,
                metrics: self.metrics,
                cancellation: self.cancellation,
            }),
        }
    }

    /// Finish the breaker bound to a fresh cell.
    pub fn build_singleton(self) -> SingletonBreaker {
        SingletonBreaker {
            breaker: self.build(),
            cell: BreakerCell::new(),
        }
    }
}

/// A breaker bound to one shared cell.
///
/// Every effect protected through the same `SingletonBreaker` (or its
/// clones) shares one state.
#[derive(Debug, Clone)]
pub struct SingletonBreaker {
    breaker: CircuitBreaker,
    cell: BreakerCell,
}

impl SingletonBreaker {
    /// Guard `effect` with the shared state.
    pub fn protect<T: Send + 'static>(&self, effect: Effect<T>) -> Effect<T> {
        self.breaker.protect(&self.cell, effect)
    }

    /// A copy of the current state.
    pub fn state(&self) -> BreakerState {
        self.cell.snapshot()
    }

    /// The shared cell.
    pub fn cell(&self) -> &BreakerCell {
        &self.cell
    }

    /// The underlying breaker.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}
