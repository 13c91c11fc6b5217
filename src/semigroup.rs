//! Semigroup trait for associative combination.
//!
//! Retry policies combine through this trait: `a.combine(b)` keeps retrying
//! only while both `a` and `b` would, waiting the longer of their delays.
//!
//! # Laws
//!
//! `combine` must be associative:
//! ```text
//! a.combine(b).combine(c) == a.combine(b.combine(c))
//! ```

/// A type that supports an associative binary operation
///
/// The `combine` method takes `self` by value. Clone first if you need to
/// keep the originals around.
pub trait Semigroup: Sized {
    /// Combine this value with another value associatively
    fn combine(self, other: Self) -> Self;
}
