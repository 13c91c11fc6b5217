//! Applicative composition: sequential and parallel.
//!
//! [`ap_par`] forks both sides onto the runtime and joins them. The two
//! branches share a context derived from the caller's; a branch that fails
//! cancels that shared context with its failure as the cause, which wakes
//! any cancellation point the sibling is parked on. Cancellation stays
//! cooperative: a sibling that never checks its context runs to completion.
//!
//! # Which failure wins
//!
//! When both branches fail, the *value* branch's failure is reported
//! (`fa` in `ap_par(fab, fa)`, the right-hand side of `zip_par`). The one
//! exception: if the value branch merely observed the cancellation its
//! sibling triggered, the sibling's original failure is reported instead,
//! since that is the failure that actually happened.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio_util::task::AbortOnDropHandle;

use crate::context::Context;
use crate::effect::Effect;
use crate::error::{CancelCause, Error, Result};

/// Outcome of one forked branch.
struct Branch<T> {
    result: Result<T>,
    /// True when this branch's failure was the one that canceled the
    /// shared context.
    canceled_sibling: bool,
}

async fn fork<T: Send + 'static>(effect: &Effect<T>, shared: &Context) -> Branch<T> {
    let branch_ctx = shared.child();
    let shared = shared.clone();
    let run = effect.run(&branch_ctx);

    let handle = AbortOnDropHandle::new(tokio::spawn(async move {
        let result = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(Error::from_panic(payload)),
        };
        let canceled_sibling = match &result {
            Err(error) => shared.cancel_with(CancelCause::failure(error.clone())),
            Ok(_) => false,
        };
        Branch {
            result,
            canceled_sibling,
        }
    }));

    match handle.await {
        Ok(branch) => branch,
        Err(join_error) => Branch {
            result: Err(Error::Panicked(join_error.to_string())),
            canceled_sibling: false,
        },
    }
}

/// Run two effects concurrently under a shared derived context.
async fn par_join<A, B>(left: &Effect<A>, right: &Effect<B>, ctx: &Context) -> Result<(A, B)>
where
    A: Send + 'static,
    B: Send + 'static,
{
    ctx.check()?;
    let shared = ctx.child();

    let (left, right) = futures::future::join(fork(left, &shared), fork(right, &shared)).await;

    match (left.result, right.result) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        (Err(error), Ok(_)) | (Ok(_), Err(error)) => Err(error),
        (Err(left_error), Err(right_error)) => {
            if right_error.is_canceled() && left.canceled_sibling {
                Err(left_error)
            } else {
                Err(right_error)
            }
        }
    }
}

/// Apply a wrapped function to a wrapped value, sequentially.
///
/// `fab` runs to completion first, then `fa`. The first failure
/// short-circuits: `fa` never runs if `fab` fails.
///
/// # Example
///
/// ```
/// use undertow::effect::{ap_seq, of};
///
/// # tokio_test::block_on(async {
/// let add_one = of(|x: i32| x + 1);
/// assert_eq!(ap_seq(add_one, of(41)).run_standalone().await.unwrap(), 42);
/// # });
/// ```
pub fn ap_seq<T, U, F>(fab: Effect<F>, fa: Effect<T>) -> Effect<U>
where
    F: FnOnce(T) -> U + Send + 'static,
    T: Send + 'static,
    U: Send + 'static,
{
    Effect::from_run(move |ctx| {
        let fab = fab.run(&ctx);
        let fa = fa.clone();
        async move {
            let f = fab.await?;
            let value = fa.run(&ctx).await?;
            Ok(f(value))
        }
    })
}

/// Apply a wrapped function to a wrapped value, running both concurrently.
///
/// See the [module documentation](self) for cancellation and failure
/// precedence.
///
/// # Example
///
/// ```
/// use undertow::effect::{ap_par, of};
///
/// # tokio_test::block_on(async {
/// let double = of(|x: i32| x * 2);
/// assert_eq!(ap_par(double, of(21)).run_standalone().await.unwrap(), 42);
/// # });
/// ```
pub fn ap_par<T, U, F>(fab: Effect<F>, fa: Effect<T>) -> Effect<U>
where
    F: FnOnce(T) -> U + Send + 'static,
    T: Send + 'static,
    U: Send + 'static,
{
    Effect::from_run(move |ctx| {
        let fab = fab.clone();
        let fa = fa.clone();
        async move {
            let (f, value) = par_join(&fab, &fa, &ctx).await?;
            Ok(f(value))
        }
    })
}

/// The default apply: parallel. Use [`ap_seq`] to opt into sequencing.
pub fn ap<T, U, F>(fab: Effect<F>, fa: Effect<T>) -> Effect<U>
where
    F: FnOnce(T) -> U + Send + 'static,
    T: Send + 'static,
    U: Send + 'static,
{
    ap_par(fab, fa)
}

impl<T: Send + 'static> Effect<T> {
    /// Pair with another effect, running both concurrently.
    ///
    /// Failure precedence follows [`ap_par`] with `other` as the value
    /// branch.
    pub fn zip_par<U: Send + 'static>(self, other: Effect<U>) -> Effect<(T, U)> {
        Effect::from_run(move |ctx| {
            let this = self.clone();
            let other = other.clone();
            async move { par_join(&this, &other, &ctx).await }
        })
    }

    /// Pair with another effect, running `self` first.
    pub fn zip_seq<U: Send + 'static>(self, other: Effect<U>) -> Effect<(T, U)> {
        Effect::from_run(move |ctx| {
            let first = self.run(&ctx);
            let other = other.clone();
            async move {
                let a = first.await?;
                let b = other.run(&ctx).await?;
                Ok((a, b))
            }
        })
    }
}
