//! Execution context threaded through every effect run.
//!
//! A [`Context`] carries three things:
//!
//! - a cancellation signal with a fixed [`CancelCause`],
//! - an optional deadline,
//! - typed values (keyed by their Rust type) for out-of-band data such as
//!   correlation ids.
//!
//! Contexts form a tree. Deriving a context with [`Context::child`] (or any
//! of the `with_*` methods) creates a descendant: canceling a parent cancels
//! every descendant, canceling a child never affects its parent.
//!
//! # Examples
//!
//! ```
//! use undertow::{CancelCause, Context};
//!
//! let root = Context::background();
//! let child = root.child();
//!
//! child.cancel();
//! assert!(child.is_canceled());
//! assert!(!root.is_canceled());
//!
//! root.cancel_with(CancelCause::DeadlineExceeded);
//! let other = root.child();
//! assert!(matches!(other.cause(), Some(CancelCause::DeadlineExceeded)));
//! ```
//!
//! Cancellation is cooperative: an effect observes it by calling
//! [`Context::check`] or awaiting [`Context::cancelled`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CancelCause, Error, Result};

type Values = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// Cancellation, deadline and typed values for one branch of execution.
///
/// Cloning is cheap and yields a handle to the *same* context; use
/// [`child`](Context::child) to derive a new node in the tree.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    token: CancellationToken,
    cause: OnceLock<CancelCause>,
    parent: Option<Context>,
    deadline: Option<Instant>,
    values: Arc<Values>,
}

impl Context {
    /// A root context that is never canceled unless asked to be.
    pub fn background() -> Self {
        Context {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                cause: OnceLock::new(),
                parent: None,
                deadline: None,
                values: Arc::new(HashMap::new()),
            }),
        }
    }

    fn derive(&self, deadline: Option<Instant>, values: Arc<Values>) -> Self {
        let deadline = match (self.inner.deadline, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Context {
            inner: Arc::new(Inner {
                token: self.inner.token.child_token(),
                cause: OnceLock::new(),
                parent: Some(self.clone()),
                deadline,
                values,
            }),
        }
    }

    /// A new root that keeps this context's values but none of its
    /// cancellation or deadline. Used for cleanup that must run even after
    /// the surrounding work was canceled.
    pub fn detached(&self) -> Self {
        Context {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                cause: OnceLock::new(),
                parent: None,
                deadline: None,
                values: self.inner.values.clone(),
            }),
        }
    }

    /// Derive a child that inherits cancellation, deadline and values.
    pub fn child(&self) -> Self {
        self.derive(None, self.inner.values.clone())
    }

    /// Derive a child whose deadline is the earlier of `deadline` and the
    /// inherited one.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        self.derive(Some(deadline), self.inner.values.clone())
    }

    /// Derive a child that expires `timeout` from now.
    ///
    /// A timeout too large to represent as an instant adds no deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.child(),
        }
    }

    /// Derive a child carrying `value`, replacing any inherited value of the
    /// same type.
    ///
    /// ```
    /// use undertow::Context;
    ///
    /// #[derive(Debug, PartialEq)]
    /// struct Tenant(&'static str);
    ///
    /// let ctx = Context::background().with_value(Tenant("acme"));
    /// assert_eq!(ctx.child().get::<Tenant>(), Some(&Tenant("acme")));
    /// assert!(Context::background().get::<Tenant>().is_none());
    /// ```
    pub fn with_value<V>(&self, value: V) -> Self
    where
        V: Any + Send + Sync,
    {
        let mut values: Values = (*self.inner.values).clone();
        values.insert(TypeId::of::<V>(), Arc::new(value));
        self.derive(None, Arc::new(values))
    }

    /// Look up a value by type.
    pub fn get<V>(&self) -> Option<&V>
    where
        V: Any + Send + Sync,
    {
        self.inner
            .values
            .get(&TypeId::of::<V>())
            .and_then(|v| v.downcast_ref::<V>())
    }

    /// The effective deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline. `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Cancel this context and its descendants with [`CancelCause::Requested`].
    pub fn cancel(&self) -> bool {
        self.cancel_with(CancelCause::Requested)
    }

    /// Cancel this context and its descendants with the given cause.
    ///
    /// Returns `false` when the context was already canceled, in which case
    /// the original cause is kept.
    pub fn cancel_with(&self, cause: CancelCause) -> bool {
        if self.cause().is_some() {
            return false;
        }
        let won = self.inner.cause.set(cause).is_ok();
        self.inner.token.cancel();
        won
    }

    /// The cancellation cause, or `None` while the context is live.
    pub fn cause(&self) -> Option<CancelCause> {
        if let Some(cause) = self.inner.cause.get() {
            return Some(cause.clone());
        }

        if self.inner.token.is_cancelled() {
            let inherited = self
                .inner
                .parent
                .as_ref()
                .and_then(Context::cause)
                .unwrap_or(CancelCause::Requested);
            return Some(self.inner.cause.get_or_init(|| inherited).clone());
        }

        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                let cause = self
                    .inner
                    .cause
                    .get_or_init(|| CancelCause::DeadlineExceeded)
                    .clone();
                self.inner.token.cancel();
                Some(cause)
            }
            _ => None,
        }
    }

    /// Returns true once the context is canceled or past its deadline.
    pub fn is_canceled(&self) -> bool {
        self.cause().is_some()
    }

    /// Cooperative cancellation check.
    ///
    /// ```
    /// use undertow::Context;
    ///
    /// let ctx = Context::background();
    /// assert!(ctx.check().is_ok());
    /// ctx.cancel();
    /// assert!(ctx.check().unwrap_err().is_canceled());
    /// ```
    pub fn check(&self) -> Result<()> {
        match self.cause() {
            Some(cause) => Err(Error::Canceled(cause)),
            None => Ok(()),
        }
    }

    /// Wait until the context is canceled and return the cause.
    pub async fn cancelled(&self) -> CancelCause {
        if let Some(cause) = self.cause() {
            return cause;
        }
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.inner.token.cancelled().await,
        }
        self.cause().unwrap_or(CancelCause::DeadlineExceeded)
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("canceled", &self.inner.token.is_cancelled())
            .field("cause", &self.inner.cause.get())
            .field("deadline", &self.inner.deadline)
            .field("values", &self.inner.values.len())
            .finish()
    }
}
