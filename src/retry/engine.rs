//! The retry loop.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::retry::{RetryPolicy, RetryStatus};
use crate::trampoline::{self, Trampoline};
use crate::Effect;

/// Repeat `action` under `policy` while `should_retry` approves the result.
///
/// Each attempt calls `action` with the current [`RetryStatus`] and runs the
/// produced effect. Then, in order:
///
/// 1. If the context was canceled, the loop ends with that cancellation,
///    whatever the attempt returned.
/// 2. A [`Error::Canceled`] result is returned as is; cancellation is never
///    retried.
/// 3. If `should_retry` rejects the result, it is returned.
/// 4. If the policy stops, the last result is returned.
/// 5. Otherwise the loop waits the policy's delay and tries again. A
///    cancellation during the wait ends the loop with the cancellation.
///
/// The loop runs on [`trampoline::run_async`], so the number of attempts is
/// bounded only by the policy.
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
/// use undertow::retry::{retrying, RetryPolicy};
/// use undertow::{Effect, Error};
///
/// # tokio_test::block_on(async {
/// let calls = Arc::new(AtomicU32::new(0));
/// let counter = calls.clone();
/// let effect = retrying(
///     RetryPolicy::limit_retries(3),
///     move |_status| {
///         counter.fetch_add(1, Ordering::SeqCst);
///         Effect::<()>::fail(Error::msg("unavailable"))
///     },
///     |result| result.is_err(),
/// );
///
/// assert!(effect.run_standalone().await.is_err());
/// assert_eq!(calls.load(Ordering::SeqCst), 4);
/// # });
/// ```
pub fn retrying<T, A, P>(policy: RetryPolicy, action: A, should_retry: P) -> Effect<T>
where
    T: Send + 'static,
    A: Fn(&RetryStatus) -> Effect<T> + Send + Sync + 'static,
    P: Fn(&Result<T>) -> bool + Send + Sync + 'static,
{
    let action = Arc::new(action);
    let should_retry = Arc::new(should_retry);

    Effect::from_run(move |ctx| {
        let policy = policy.clone();
        let action = Arc::clone(&action);
        let should_retry = Arc::clone(&should_retry);

        trampoline::run_async(RetryStatus::new(), move |status| {
            attempt(
                ctx.clone(),
                policy.clone(),
                Arc::clone(&action),
                Arc::clone(&should_retry),
                status,
            )
        })
    })
}

async fn attempt<T, A, P>(
    ctx: Context,
    policy: RetryPolicy,
    action: Arc<A>,
    should_retry: Arc<P>,
    status: RetryStatus,
) -> Trampoline<RetryStatus, Result<T>>
where
    T: Send + 'static,
    A: Fn(&RetryStatus) -> Effect<T>,
    P: Fn(&Result<T>) -> bool,
{
    let result = action(&status).run(&ctx).await;

    if let Some(cause) = ctx.cause() {
        return Trampoline::Land(Err(Error::Canceled(cause)));
    }
    if matches!(result, Err(Error::Canceled(_))) || !should_retry(&result) {
        return Trampoline::Land(result);
    }

    let Some(delay) = policy.apply(&status) else {
        warn!(
            attempts = status.iteration + 1,
            cumulative_delay_ms = status.cumulative_delay.as_millis() as u64,
            "retry policy exhausted"
        );
        return Trampoline::Land(result);
    };

    debug!(
        iteration = status.iteration,
        delay_ms = delay.as_millis() as u64,
        "retrying after delay"
    );

    tokio::select! {
        biased;
        cause = ctx.cancelled() => Trampoline::Land(Err(Error::Canceled(cause))),
        _ = tokio::time::sleep(delay) => Trampoline::Bounce(status.apply_delay(delay)),
    }
}

/// Retry `effect` on any non-cancellation failure.
pub fn retry<T: Send + 'static>(policy: RetryPolicy, effect: Effect<T>) -> Effect<T> {
    retry_if(policy, effect, |_| true)
}

/// Retry `effect` on failures accepted by `predicate`.
///
/// Successes are never retried. [`Error::Canceled`] never reaches the
/// predicate.
pub fn retry_if<T, P>(policy: RetryPolicy, effect: Effect<T>, predicate: P) -> Effect<T>
where
    T: Send + 'static,
    P: Fn(&Error) -> bool + Send + Sync + 'static,
{
    retrying(
        policy,
        move |_| effect.clone(),
        move |result| match result {
            Ok(_) => false,
            Err(error) => predicate(error),
        },
    )
}

impl<T: Send + 'static> Effect<T> {
    /// Method form of [`retry`].
    pub fn retry(self, policy: impl Into<RetryPolicy>) -> Effect<T> {
        retry(policy.into(), self)
    }

    /// Method form of [`retry_if`].
    pub fn retry_if<P>(self, policy: impl Into<RetryPolicy>, predicate: P) -> Effect<T>
    where
        P: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        retry_if(policy.into(), self, predicate)
    }
}
