//! Constructor functions for creating effects.
//!
//! These provide the ways into [`Effect`]: lifting plain values and errors,
//! wrapping synchronous and async functions, adapting callback-style APIs,
//! and the cancellation-aware primitives (`sleep`, `until_canceled`,
//! `checkpoint`).

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::context::Context;
use crate::effect::Effect;
use crate::error::{Error, Result};

impl<T: Send + 'static> Effect<T> {
    /// Create an effect that always succeeds with `value`.
    ///
    /// The context is ignored beyond the entry cancellation check.
    ///
    /// # Example
    ///
    /// ```
    /// use undertow::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// assert_eq!(Effect::of(42).run_standalone().await.unwrap(), 42);
    /// # });
    /// ```
    pub fn of(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Effect::from_run(move |_| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    /// Create an effect that always fails with `error`.
    ///
    /// # Example
    ///
    /// ```
    /// use undertow::{Effect, Error};
    ///
    /// # tokio_test::block_on(async {
    /// let result = Effect::<i32>::fail(Error::msg("nope")).run_standalone().await;
    /// assert_eq!(result.unwrap_err().to_string(), "nope");
    /// # });
    /// ```
    pub fn fail(error: Error) -> Self {
        Effect::from_run(move |_| {
            let error = error.clone();
            async move { Err(error) }
        })
    }

    /// Lift a `Result` into an effect.
    pub fn from_result(result: Result<T>) -> Self
    where
        T: Clone + Sync,
    {
        match result {
            Ok(value) => Effect::of(value),
            Err(error) => Effect::fail(error),
        }
    }

    /// Create from a synchronous function of the context.
    ///
    /// # Example
    ///
    /// ```
    /// use undertow::{Context, Effect};
    ///
    /// # tokio_test::block_on(async {
    /// #[derive(Debug)]
    /// struct Limit(u32);
    ///
    /// let effect = Effect::from_fn(|ctx: &Context| Ok(ctx.get::<Limit>().map_or(10, |l| l.0)));
    /// let ctx = Context::background().with_value(Limit(3));
    /// assert_eq!(effect.run(&ctx).await.unwrap(), 3);
    /// # });
    /// ```
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Context) -> Result<T> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Effect::from_run(move |ctx| {
            let f = Arc::clone(&f);
            async move { f(&ctx) }
        })
    }

    /// Create from an async function of the context.
    ///
    /// The function is called once per run, inside the run future.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Effect::from_run(f)
    }

    /// Wrap a conventional fallible function.
    ///
    /// Errors are captured as domain failures and panics as
    /// [`Error::Panicked`]; neither escapes the effect.
    ///
    /// # Example
    ///
    /// ```
    /// use undertow::{Effect, Error};
    ///
    /// # tokio_test::block_on(async {
    /// let parsed = Effect::try_catch(|| "42".parse::<i32>());
    /// assert_eq!(parsed.run_standalone().await.unwrap(), 42);
    ///
    /// let bad = Effect::try_catch(|| "forty-two".parse::<i32>());
    /// assert!(bad.run_standalone().await.unwrap_err().is_failed());
    /// # });
    /// ```
    pub fn try_catch<F, E>(f: F) -> Self
    where
        F: Fn() -> std::result::Result<T, E> + Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        Effect::from_fn(move |_| match catch_unwind(AssertUnwindSafe(&f)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(Error::domain(error)),
            Err(payload) => Err(Error::from_panic(payload)),
        })
    }

    /// Adapt an API that reports completion through a callback.
    ///
    /// `register` is handed a one-shot [`Callback`] on every run. The effect
    /// completes when the callback is invoked, fails if the callback is
    /// dropped unused, and fails with the cancellation cause if the context
    /// is canceled first.
    ///
    /// # Example
    ///
    /// ```
    /// use undertow::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::from_callback(|cb| {
    ///     std::thread::spawn(move || cb.succeed(7));
    /// });
    /// assert_eq!(effect.run_standalone().await.unwrap(), 7);
    /// # });
    /// ```
    pub fn from_callback<F>(register: F) -> Self
    where
        F: Fn(Callback<T>) + Send + Sync + 'static,
    {
        let register = Arc::new(register);
        Effect::from_run(move |ctx| {
            let register = Arc::clone(&register);
            async move {
                let (tx, rx) = oneshot::channel();
                let callback = Callback { tx };
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| register(callback))) {
                    return Err(Error::from_panic(payload));
                }

                tokio::select! {
                    biased;
                    cause = ctx.cancelled() => Err(Error::Canceled(cause)),
                    outcome = rx => outcome.unwrap_or_else(|_| {
                        Err(Error::msg("callback dropped without completing"))
                    }),
                }
            }
        })
    }

    /// Build the effect lazily, once per run.
    pub fn defer<F>(make: F) -> Self
    where
        F: Fn() -> Effect<T> + Send + Sync + 'static,
    {
        let make = Arc::new(make);
        Effect::from_run(move |ctx| {
            let make = Arc::clone(&make);
            async move { make().run(&ctx).await }
        })
    }

    /// An effect that never succeeds: it waits until the context is
    /// canceled and fails with the cause.
    ///
    /// Useful for bridging external cancellation into effect composition.
    pub fn until_canceled() -> Self {
        Effect::from_run(|ctx| async move { Err(Error::Canceled(ctx.cancelled().await)) })
    }
}

/// One-shot completion handle passed to [`Effect::from_callback`].
#[derive(Debug)]
pub struct Callback<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> Callback<T> {
    /// Complete with a result.
    pub fn complete(self, result: Result<T>) {
        // The receiver is gone when the run was abandoned or canceled.
        let _ = self.tx.send(result);
    }

    /// Complete successfully.
    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    /// Complete with a failure.
    pub fn fail(self, error: Error) {
        self.complete(Err(error));
    }
}

/// Shorthand for [`Effect::of`].
pub fn of<T>(value: T) -> Effect<T>
where
    T: Clone + Send + Sync + 'static,
{
    Effect::of(value)
}

/// Shorthand for [`Effect::fail`].
pub fn fail<T: Send + 'static>(error: Error) -> Effect<T> {
    Effect::fail(error)
}

/// Wait for `duration`, failing early if the context is canceled.
///
/// Cancellation wins ties: if the context is already canceled the sleep
/// fails immediately.
///
/// # Example
///
/// ```
/// use undertow::{effect, Context};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let ctx = Context::background();
/// ctx.cancel();
/// let result = effect::sleep(Duration::from_secs(3600)).run(&ctx).await;
/// assert!(result.unwrap_err().is_canceled());
/// # });
/// ```
pub fn sleep(duration: Duration) -> Effect<()> {
    Effect::from_run(move |ctx| async move {
        tokio::select! {
            biased;
            cause = ctx.cancelled() => Err(Error::Canceled(cause)),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    })
}

/// Cooperative cancellation point.
///
/// Succeeds with `()` while the context is live.
pub fn checkpoint() -> Effect<()> {
    Effect::from_fn(|ctx| ctx.check())
}
