//! Sequential combinators.
//!
//! All of these preserve left-to-right ordering of side effects: the inner
//! effect finishes before anything downstream starts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::effect::Effect;
use crate::error::{Error, Result};

impl<T: Send + 'static> Effect<T> {
    /// Transform the success value. Failures pass through untouched.
    ///
    /// # Example
    ///
    /// ```
    /// use undertow::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::of(21).map(|x| x * 2);
    /// assert_eq!(effect.run_standalone().await.unwrap(), 42);
    /// # });
    /// ```
    pub fn map<U, F>(self, f: F) -> Effect<U>
    where
        F: Fn(T) -> U + Send + Sync + 'static,
        U: Send + 'static,
    {
        let f = Arc::new(f);
        Effect::from_run(move |ctx| {
            let inner = self.run(&ctx);
            let f = Arc::clone(&f);
            async move { inner.await.map(|value| f(value)) }
        })
    }

    /// Transform the error value.
    pub fn map_err<F>(self, f: F) -> Effect<T>
    where
        F: Fn(Error) -> Error + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Effect::from_run(move |ctx| {
            let inner = self.run(&ctx);
            let f = Arc::clone(&f);
            async move { inner.await.map_err(|error| f(error)) }
        })
    }

    /// Chain a dependent effect (monadic bind).
    ///
    /// If this effect succeeds, `f` builds the next effect from the value and
    /// it runs under the same context. If this effect fails, `f` is never
    /// called.
    ///
    /// # Example
    ///
    /// ```
    /// use undertow::{Effect, Error};
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::of(5).and_then(|x| Effect::of(x * 2));
    /// assert_eq!(effect.run_standalone().await.unwrap(), 10);
    ///
    /// let effect = Effect::<i32>::fail(Error::msg("error")).and_then(|x| Effect::of(x * 2));
    /// assert!(effect.run_standalone().await.is_err());
    /// # });
    /// ```
    pub fn and_then<U, F>(self, f: F) -> Effect<U>
    where
        F: Fn(T) -> Effect<U> + Send + Sync + 'static,
        U: Send + 'static,
    {
        let f = Arc::new(f);
        Effect::from_run(move |ctx| {
            let inner = self.run(&ctx);
            let f = Arc::clone(&f);
            async move {
                let value = inner.await?;
                f(value).run(&ctx).await
            }
        })
    }

    /// Run a dependent effect for its side effects and keep the original
    /// value. A failure of the dependent effect fails the whole chain.
    ///
    /// # Example
    ///
    /// ```
    /// use undertow::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::of(42).chain_first(|x| Effect::of(format!("saw {x}")));
    /// assert_eq!(effect.run_standalone().await.unwrap(), 42);
    /// # });
    /// ```
    pub fn chain_first<U, F>(self, f: F) -> Effect<T>
    where
        F: Fn(&T) -> Effect<U> + Send + Sync + 'static,
        U: Send + 'static,
    {
        let f = Arc::new(f);
        Effect::from_run(move |ctx| {
            let inner = self.run(&ctx);
            let f = Arc::clone(&f);
            async move {
                let value = inner.await?;
                f(&value).run(&ctx).await?;
                Ok(value)
            }
        })
    }

    /// Recover from a failure by building a replacement effect.
    ///
    /// Cancellation errors are recoverable like any other; callers that must
    /// not swallow them should check [`Error::is_canceled`].
    pub fn or_else<F>(self, f: F) -> Effect<T>
    where
        F: Fn(Error) -> Effect<T> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Effect::from_run(move |ctx| {
            let inner = self.run(&ctx);
            let f = Arc::clone(&f);
            async move {
                match inner.await {
                    Ok(value) => Ok(value),
                    Err(error) => f(error).run(&ctx).await,
                }
            }
        })
    }

    /// Observe the success value with a synchronous callback.
    pub fn tap<F>(self, f: F) -> Effect<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Effect::from_run(move |ctx| {
            let inner = self.run(&ctx);
            let f = Arc::clone(&f);
            async move {
                let value = inner.await?;
                f(&value);
                Ok(value)
            }
        })
    }

    /// Share a single execution between every run of the returned effect.
    ///
    /// The first run executes the underlying effect; concurrent and later
    /// runs wait for and clone its result. The shared execution runs under a
    /// context detached from any one caller's cancellation and deadline. A
    /// canceled caller stops waiting and fails with its own cause, leaving
    /// the cache untouched; if it was driving the execution, the next run
    /// takes over.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::atomic::{AtomicU32, Ordering};
    /// use std::sync::Arc;
    /// use undertow::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let calls = Arc::new(AtomicU32::new(0));
    /// let counted = calls.clone();
    /// let effect = Effect::from_fn(move |_| Ok(counted.fetch_add(1, Ordering::SeqCst)))
    ///     .memoize();
    ///
    /// assert_eq!(effect.run_standalone().await.unwrap(), 0);
    /// assert_eq!(effect.run_standalone().await.unwrap(), 0);
    /// assert_eq!(calls.load(Ordering::SeqCst), 1);
    /// # });
    /// ```
    pub fn memoize(self) -> Effect<T>
    where
        T: Clone + Sync,
    {
        let cell: Arc<OnceCell<Result<T>>> = Arc::new(OnceCell::new());
        Effect::from_run(move |ctx| {
            let cell = Arc::clone(&cell);
            let inner = self.clone();
            async move {
                // The shared run never sees one caller's cancellation
                let shared = ctx.detached();
                tokio::select! {
                    biased;
                    cause = ctx.cancelled() => Err(Error::Canceled(cause)),
                    result = cell.get_or_init(|| inner.run(&shared)) => result.clone(),
                }
            }
        })
    }

    /// Run under a derived context that expires after `timeout`.
    ///
    /// Cancellation stays cooperative: the effect notices the deadline at
    /// its next cancellation point and fails with
    /// [`CancelCause::DeadlineExceeded`](crate::CancelCause::DeadlineExceeded).
    ///
    /// # Example
    ///
    /// ```
    /// use undertow::{effect, CancelCause};
    /// use std::time::Duration;
    ///
    /// # tokio_test::block_on(async {
    /// let slow = effect::sleep(Duration::from_secs(10)).with_timeout(Duration::from_millis(10));
    /// let err = slow.run_standalone().await.unwrap_err();
    /// assert!(matches!(err.cancel_cause(), Some(CancelCause::DeadlineExceeded)));
    /// # });
    /// ```
    pub fn with_timeout(self, timeout: Duration) -> Effect<T> {
        Effect::from_run(move |ctx| self.run(&ctx.with_timeout(timeout)))
    }
}
