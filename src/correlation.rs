//! Correlation ids for tying log lines from one run together.
//!
//! Ids come from a [`CorrelationIds`] generator that the caller owns and
//! passes in. Two generators never share a sequence, so tests can make
//! exact assertions about the ids they observe.
//!
//! ```
//! use undertow::correlation::{CorrelationId, CorrelationIds};
//!
//! let ids = CorrelationIds::new();
//! assert_eq!(ids.next_id(), CorrelationId(1));
//! assert_eq!(ids.next_id(), CorrelationId(2));
//!
//! // Clones draw from the same sequence
//! let shared = ids.clone();
//! assert_eq!(shared.next_id(), CorrelationId(3));
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier attached to a run through its [`Context`](crate::Context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Monotonic correlation id generator.
#[derive(Debug, Clone)]
pub struct CorrelationIds {
    next: Arc<AtomicU64>,
}

impl CorrelationIds {
    /// Generator starting at 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Generator whose first id is `first`.
    pub fn starting_at(first: u64) -> Self {
        CorrelationIds {
            next: Arc::new(AtomicU64::new(first)),
        }
    }

    /// Draw the next id.
    pub fn next_id(&self) -> CorrelationId {
        CorrelationId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::new()
    }
}
