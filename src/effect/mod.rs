//! Deferred, cancelable computations.
//!
//! An [`Effect<T>`] describes a computation that, given a [`Context`],
//! produces `Result<T>`. Running it happens in two stages:
//!
//! 1. [`Effect::run`] takes the context and returns a future. Building that
//!    future performs no work.
//! 2. Awaiting the future executes the computation.
//!
//! Effects are values: they can be cloned, stored, and run any number of
//! times, each run being a fresh, independent execution (see
//! [`Effect::memoize`] for the shared, cached alternative).
//!
//! # Examples
//!
//! ## Basic usage
//!
//! ```
//! use undertow::{Context, Effect, Error};
//!
//! # tokio_test::block_on(async {
//! let effect = Effect::of(5)
//!     .map(|x| x * 2)
//!     .and_then(|x| Effect::of(x + 10));
//!
//! assert_eq!(effect.run(&Context::background()).await.unwrap(), 20);
//!
//! let failing = Effect::<i32>::fail(Error::msg("boom")).map(|x| x + 1);
//! assert!(failing.run_standalone().await.is_err());
//! # });
//! ```
//!
//! ## Parallel composition
//!
//! ```
//! use undertow::Effect;
//!
//! # #[tokio::main(flavor = "multi_thread")]
//! # async fn main() {
//! let sum = Effect::of(20).zip_par(Effect::of(22)).map(|(a, b)| a + b);
//! assert_eq!(sum.run_standalone().await.unwrap(), 42);
//! # }
//! ```
//!
//! Every run checks the context on entry, so running an effect against a
//! canceled context fails with [`Error::Canceled`](crate::Error::Canceled)
//! without doing any work.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;

mod apply;
pub mod bracket;
mod combinators;
mod constructors;
mod instrument;

pub use apply::{ap, ap_par, ap_seq};
pub use bracket::with_resource;
pub use constructors::{checkpoint, fail, of, sleep, Callback};

/// A boxed future that is Send
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type RunFn<T> = Arc<dyn Fn(&Context) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// A deferred, context-dependent, possibly failing computation.
///
/// `Effect<T>` is cheap to clone: clones share the same description and
/// each run is independent.
pub struct Effect<T> {
    run_fn: RunFn<T>,
}

impl<T> Clone for Effect<T> {
    fn clone(&self) -> Self {
        Effect {
            run_fn: Arc::clone(&self.run_fn),
        }
    }
}

impl<T> fmt::Debug for Effect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("run_fn", &"<function>")
            .finish()
    }
}

impl<T: Send + 'static> Effect<T> {
    /// Build an effect from a function producing the run future.
    ///
    /// The function is only called inside the returned future, so building
    /// the future stays free of side effects.
    pub(crate) fn from_run<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let f = Arc::new(f);
        Effect {
            run_fn: Arc::new(move |ctx: &Context| {
                let f = Arc::clone(&f);
                let ctx = ctx.clone();
                Box::pin(async move { f(ctx).await })
            }),
        }
    }

    /// Prepare a run of this effect against `ctx`.
    ///
    /// The returned future is inert until polled. When polled it first
    /// checks `ctx` for cancellation, then executes the computation.
    pub fn run(&self, ctx: &Context) -> BoxFuture<'static, Result<T>> {
        let run_fn = Arc::clone(&self.run_fn);
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.check()?;
            run_fn(&ctx).await
        })
    }

    /// Run against a fresh background context.
    pub async fn run_standalone(&self) -> Result<T> {
        self.run(&Context::background()).await
    }
}
