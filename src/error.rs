//! Error values produced by effects.
//!
//! Every effect resolves to a [`Result`], never a panic across the crate
//! boundary. Failures come in three flavours that callers routinely need to
//! tell apart:
//!
//! - **Domain failures** ([`Error::Failed`]) - produced by the computation
//!   itself. These are what retry predicates and circuit breaker filters
//!   inspect.
//! - **Cancellation** ([`Error::Canceled`]) - the execution context was
//!   canceled. Carries the [`CancelCause`] verbatim and is never retried.
//! - **Circuit open** ([`Error::CircuitOpen`]) - synthetic rejection from a
//!   circuit breaker that did not invoke the protected effect.
//!
//! # Example
//!
//! ```
//! use undertow::{CancelCause, Error};
//!
//! let err = Error::msg("connection refused");
//! assert!(err.is_failed());
//!
//! let canceled = Error::Canceled(CancelCause::DeadlineExceeded);
//! assert!(canceled.is_canceled());
//! assert_eq!(canceled.to_string(), "canceled: deadline exceeded");
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Type-erased domain error.
///
/// Stored behind an `Arc` so that errors stay cheaply `Clone`: a memoized
/// effect hands the same failure to every waiter, and a failing parallel
/// branch records its error as the cancellation cause of its sibling.
#[derive(Clone)]
pub struct DomainError(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl DomainError {
    /// Wrap any error value.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DomainError(Arc::new(error))
    }

    /// Borrow the wrapped error.
    pub fn get_ref(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.0
    }

    /// Attempt to view the wrapped error as a concrete type.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Debug for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

/// Plain message error used by [`Error::msg`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Message(pub String);

/// Why a context was canceled.
///
/// Once a context records a cause it never changes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CancelCause {
    /// Someone called `cancel()` on the context or one of its ancestors.
    #[error("context canceled")]
    Requested,
    /// The context deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// A sibling computation failed and canceled the shared context.
    #[error("sibling failed: {0}")]
    Failure(Arc<Error>),
}

impl CancelCause {
    /// Cause recording that a sibling failed with `error`.
    pub fn failure(error: Error) -> Self {
        CancelCause::Failure(Arc::new(error))
    }

    /// The failure that triggered cancellation, if any.
    pub fn failure_ref(&self) -> Option<&Error> {
        match self {
            CancelCause::Failure(error) => Some(error),
            _ => None,
        }
    }
}

/// Rejection produced by an open circuit breaker.
///
/// The protected effect was never invoked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit open: retry in {retry_in:?}")]
pub struct CircuitBreakerError {
    /// Time remaining until the breaker admits a canary call.
    pub retry_in: Duration,
}

impl CircuitBreakerError {
    /// Create a rejection that reopens after `retry_in`.
    pub fn new(retry_in: Duration) -> Self {
        CircuitBreakerError { retry_in }
    }
}

/// The failure type of every effect.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The computation itself failed.
    #[error("{0}")]
    Failed(DomainError),
    /// The execution context was canceled.
    #[error("canceled: {0}")]
    Canceled(CancelCause),
    /// A circuit breaker short-circuited the call.
    #[error(transparent)]
    CircuitOpen(CircuitBreakerError),
    /// A wrapped callback or forked branch panicked.
    #[error("panicked: {0}")]
    Panicked(String),
}

impl Error {
    /// Wrap a domain error.
    pub fn domain<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Failed(DomainError::new(error))
    }

    /// Domain error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Error::domain(Message(message.into()))
    }

    /// Returns true for domain failures.
    pub fn is_failed(&self) -> bool {
        matches!(self, Error::Failed(_))
    }

    /// Returns true if this error reports cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled(_))
    }

    /// Returns true if a circuit breaker rejected the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::CircuitOpen(_))
    }

    /// The cancellation cause, if this is a cancellation error.
    pub fn cancel_cause(&self) -> Option<&CancelCause> {
        match self {
            Error::Canceled(cause) => Some(cause),
            _ => None,
        }
    }

    /// View a domain failure as a concrete error type.
    ///
    /// ```
    /// use undertow::Error;
    /// use std::io;
    ///
    /// let err = Error::domain(io::Error::new(io::ErrorKind::TimedOut, "slow"));
    /// let io_err = err.downcast_ref::<io::Error>().unwrap();
    /// assert_eq!(io_err.kind(), io::ErrorKind::TimedOut);
    /// ```
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Error::Failed(domain) => domain.downcast_ref::<E>(),
            _ => None,
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "<non-string panic payload>".to_string()
        };
        Error::Panicked(message)
    }
}

impl From<CircuitBreakerError> for Error {
    fn from(err: CircuitBreakerError) -> Self {
        Error::CircuitOpen(err)
    }
}

impl From<CancelCause> for Error {
    fn from(cause: CancelCause) -> Self {
        Error::Canceled(cause)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::domain(err)
    }
}
