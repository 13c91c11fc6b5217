//! Monoid trait for types with identity elements
//!
//! A `Monoid` extends [`Semigroup`] with an identity element, which makes it
//! possible to fold any number of values, including none.
//!
//! # Laws
//!
//! ```text
//! a.combine(M::empty()) == a           (right identity)
//! M::empty().combine(a) == a           (left identity)
//! ```
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use undertow::monoid::fold_all;
//! use undertow::retry::{RetryPolicy, RetryStatus};
//!
//! let policy: RetryPolicy = fold_all(vec![
//!     RetryPolicy::exponential_backoff(Duration::from_millis(10)),
//!     RetryPolicy::limit_retries(5),
//!     RetryPolicy::constant_delay(Duration::from_millis(25)),
//! ]);
//!
//! // max(10ms, 0ms, 25ms)
//! assert_eq!(policy.apply(&RetryStatus::new()), Some(Duration::from_millis(25)));
//! ```

use crate::Semigroup;

/// A `Monoid` is a `Semigroup` with an identity element.
pub trait Monoid: Semigroup {
    /// The identity element for this monoid.
    ///
    /// Satisfies: `a.combine(Self::empty()) == a` and `Self::empty().combine(a) == a`
    fn empty() -> Self;
}

/// Fold an iterator into one value, starting from the identity.
pub fn fold_all<M, I>(iter: I) -> M
where
    M: Monoid,
    I: IntoIterator<Item = M>,
{
    iter.into_iter().fold(M::empty(), |acc, x| acc.combine(x))
}
