//! Resource-scoped composition.
//!
//! [`with_resource`] acquires a resource, hands it to a body, and releases it
//! exactly once on every exit path of the body:
//!
//! | acquire | body    | release | result                       |
//! |---------|---------|---------|------------------------------|
//! | fails   | -       | skipped | acquire error                |
//! | ok      | ok      | ok      | body value                   |
//! | ok      | ok      | fails   | release error                |
//! | ok      | fails   | ok      | body error                   |
//! | ok      | fails   | fails   | body error (release logged)  |
//!
//! A panicking body counts as a failing body. Release runs under a context
//! detached from the caller's cancellation so cleanup still happens after a
//! cancel. If the run future is dropped while the body is in flight,
//! release is spawned onto the current runtime.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::context::Context;
use crate::effect::Effect;
use crate::error::{Error, Result};

type ReleaseFn<R> = Arc<dyn Fn(R) -> Effect<()> + Send + Sync>;

/// Releases the resource when dropped without an explicit release.
struct ReleaseGuard<R: Send + 'static> {
    pending: Option<(ReleaseFn<R>, R, Context)>,
}

impl<R: Send + 'static> ReleaseGuard<R> {
    async fn release(mut self) -> Result<()> {
        let Some((release, resource, ctx)) = self.pending.take() else {
            return Ok(());
        };
        run_release(release, resource, ctx).await
    }
}

impl<R: Send + 'static> Drop for ReleaseGuard<R> {
    fn drop(&mut self) {
        let Some((release, resource, ctx)) = self.pending.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = run_release(release, resource, ctx).await {
                        tracing::warn!(%error, "resource release failed after abandoned run");
                    }
                });
            }
            Err(_) => {
                tracing::warn!("run abandoned outside a runtime; resource release skipped");
            }
        }
    }
}

async fn run_release<R>(release: ReleaseFn<R>, resource: R, ctx: Context) -> Result<()> {
    let run = async move { release(resource).run(&ctx).await };
    match AssertUnwindSafe(run).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(Error::from_panic(payload)),
    }
}

/// Acquire a resource, use it, and guarantee its release.
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use undertow::effect::with_resource;
/// use undertow::{Effect, Error};
///
/// # tokio_test::block_on(async {
/// let released = Arc::new(AtomicBool::new(false));
/// let flag = released.clone();
///
/// let effect = with_resource(
///     Effect::of("connection"),
///     move |_conn| {
///         flag.store(true, Ordering::SeqCst);
///         Effect::of(())
///     },
///     |_conn| Effect::<i32>::fail(Error::msg("query failed")),
/// );
///
/// let err = effect.run_standalone().await.unwrap_err();
/// assert_eq!(err.to_string(), "query failed");
/// assert!(released.load(Ordering::SeqCst));
/// # });
/// ```
pub fn with_resource<R, T, Rel, Use>(acquire: Effect<R>, release: Rel, use_fn: Use) -> Effect<T>
where
    R: Clone + Send + Sync + 'static,
    T: Send + 'static,
    Rel: Fn(R) -> Effect<()> + Send + Sync + 'static,
    Use: Fn(R) -> Effect<T> + Send + Sync + 'static,
{
    let release: ReleaseFn<R> = Arc::new(release);
    let use_fn = Arc::new(use_fn);

    Effect::from_run(move |ctx| {
        let acquire = acquire.run(&ctx);
        let release = Arc::clone(&release);
        let use_fn = Arc::clone(&use_fn);
        async move {
            let resource = acquire.await?;
            let guard = ReleaseGuard {
                pending: Some((release, resource.clone(), ctx.detached())),
            };

            let body = async { use_fn(resource).run(&ctx).await };
            let body = match AssertUnwindSafe(body).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(Error::from_panic(payload)),
            };

            match (body, guard.release().await) {
                (Ok(value), Ok(())) => Ok(value),
                (Ok(_), Err(release_error)) => Err(release_error),
                (Err(error), Ok(())) => Err(error),
                (Err(error), Err(release_error)) => {
                    tracing::warn!(
                        %error,
                        %release_error,
                        "resource release failed after body failure"
                    );
                    Err(error)
                }
            }
        }
    })
}
