//! Stack-safe iteration with explicit bounce/land control values.
//!
//! A step function returns either [`Trampoline::Bounce`] with the next
//! state or [`Trampoline::Land`] with the final answer. The driver loops,
//! so arbitrarily long chains of steps use constant stack.
//!
//! ```
//! use undertow::trampoline::{self, Trampoline};
//!
//! // Sum 1..=n one step at a time.
//! let total = trampoline::run((1_000_000u64, 0u64), |(n, acc)| {
//!     if n == 0 {
//!         Trampoline::Land(acc)
//!     } else {
//!         Trampoline::Bounce((n - 1, acc + n))
//!     }
//! });
//! assert_eq!(total, 500_000_500_000);
//! ```

use std::future::Future;

/// Control value returned by a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trampoline<B, L> {
    /// Keep going with the next state.
    Bounce(B),
    /// Stop with the final value.
    Land(L),
}

/// Drive a synchronous step function until it lands.
pub fn run<S, L, F>(initial: S, mut step: F) -> L
where
    F: FnMut(S) -> Trampoline<S, L>,
{
    let mut state = initial;
    loop {
        match step(state) {
            Trampoline::Bounce(next) => state = next,
            Trampoline::Land(value) => return value,
        }
    }
}

/// Drive an async step function until it lands.
///
/// Each step's future is awaited to completion before the next step is
/// built, so neither the call stack nor the future nesting grows.
pub async fn run_async<S, L, F, Fut>(initial: S, mut step: F) -> L
where
    F: FnMut(S) -> Fut,
    Fut: Future<Output = Trampoline<S, L>>,
{
    let mut state = initial;
    loop {
        match step(state).await {
            Trampoline::Bounce(next) => state = next,
            Trampoline::Land(value) => return value,
        }
    }
}
