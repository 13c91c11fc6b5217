//! Policy-driven retries.
//!
//! - [`RetryStatus`] tracks where one retry loop stands.
//! - [`RetryPolicy`] decides, from a status, whether to try again and how
//!   long to wait first. Policies compose through [`Semigroup`](crate::Semigroup)
//!   and [`Monoid`](crate::Monoid).
//! - [`Backoff`] is the same decision expressed as configuration data.
//! - [`retrying`], [`retry`] and [`retry_if`] run the loop.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use undertow::retry::{Backoff, RetryPolicy};
//! use undertow::Effect;
//!
//! # tokio_test::block_on(async {
//! let policy: RetryPolicy = Backoff::exponential(Duration::from_millis(100))
//!     .with_max_retries(3)
//!     .into();
//!
//! let effect = Effect::of(42).retry(policy);
//! assert_eq!(effect.run_standalone().await.unwrap(), 42);
//! # });
//! ```
//!
//! # Jitter
//!
//! With the `jitter` feature, [`Backoff`] can randomize its delays:
//!
//! ```toml
//! undertow = { version = "...", features = ["jitter"] }
//! ```

mod backoff;
mod engine;
mod policy;
mod status;

pub use backoff::{Backoff, BackoffStrategy, Jitter};
pub use engine::{retry, retry_if, retrying};
pub use policy::RetryPolicy;
pub use status::RetryStatus;

#[cfg(test)]
mod tests;
