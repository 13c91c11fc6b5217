//! # Undertow
//!
//! Cancelable effects, stack-safe retries and circuit breakers.
//!
//! An [`Effect<T>`] is a description of work: give it a [`Context`] and it
//! hands back a future producing [`Result<T>`]. Effects are values, so they
//! can be combined, retried, raced against deadlines and guarded by
//! breakers before anything runs.
//!
//! - [`effect`]: constructors, sequencing, parallel apply with sibling
//!   cancellation, resource scoping.
//! - [`context`]: the cancellation tree, deadlines and typed values.
//! - [`retry`]: composable retry policies and the retry loop.
//! - [`breaker`]: a circuit breaker whose cooldowns come from a retry policy.
//!
//! ## Quick Example
//!
//! ```rust
//! use std::time::Duration;
//! use undertow::breaker::{CircuitBreaker, ClosedStrategy};
//! use undertow::retry::RetryPolicy;
//! use undertow::{Context, Effect, Error};
//!
//! # tokio_test::block_on(async {
//! let breaker = CircuitBreaker::builder()
//!     .closed_strategy(ClosedStrategy::consecutive(3))
//!     .build_singleton();
//!
//! let lookup = Effect::from_fn(|_ctx| Ok::<_, Error>("row"));
//! let resilient = breaker
//!     .protect(lookup)
//!     .retry(RetryPolicy::limit_retries(2))
//!     .with_timeout(Duration::from_secs(1));
//!
//! let ctx = Context::background();
//! assert_eq!(resilient.run(&ctx).await.unwrap(), "row");
//! # });
//! ```
//!
//! ## Errors
//!
//! Every effect fails with [`Error`], which keeps domain failures,
//! cancellation and breaker rejections apart so callers can tell "the
//! operation failed" from "we gave up" from "we never tried".

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod breaker;
pub mod context;
pub mod correlation;
pub mod effect;
pub mod error;
pub mod monoid;
pub mod retry;
pub mod semigroup;
pub mod testing;
pub mod trampoline;

// Re-exports
pub use context::Context;
pub use correlation::{CorrelationId, CorrelationIds};
pub use effect::{ap, ap_par, ap_seq, with_resource, Effect};
pub use error::{CancelCause, CircuitBreakerError, DomainError, Error, Result};
pub use monoid::Monoid;
pub use semigroup::Semigroup;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::breaker::{CircuitBreaker, ClosedStrategy, SingletonBreaker};
    pub use crate::context::Context;
    pub use crate::effect::{ap_par, ap_seq, with_resource, Effect};
    pub use crate::error::{CancelCause, CircuitBreakerError, Error, Result};
    pub use crate::monoid::Monoid;
    pub use crate::retry::{retrying, Backoff, RetryPolicy, RetryStatus};
    pub use crate::semigroup::Semigroup;
}
