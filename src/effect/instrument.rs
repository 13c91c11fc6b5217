//! Tracing support for effects.

use tracing::Instrument as _;

use crate::correlation::{CorrelationId, CorrelationIds};
use crate::effect::Effect;

impl<T: Send + 'static> Effect<T> {
    /// Wrap every run of this effect in a tracing span.
    ///
    /// The span is entered each time the run future is polled, following the
    /// standard `tracing::Instrument` pattern for async code.
    ///
    /// # Example
    ///
    /// ```
    /// use undertow::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::of(42).instrument(tracing::info_span!("fetch_answer"));
    /// assert_eq!(effect.run_standalone().await.unwrap(), 42);
    /// # });
    /// ```
    pub fn instrument(self, span: tracing::Span) -> Effect<T> {
        Effect::from_run(move |ctx| self.run(&ctx).instrument(span.clone()))
    }

    /// Tag each run with a fresh [`CorrelationId`].
    ///
    /// The id is drawn from `ids` when the run starts, stored in the derived
    /// context (readable with `ctx.get::<CorrelationId>()`), and recorded on a
    /// `correlation` span around the run.
    pub fn with_correlation(self, ids: &CorrelationIds) -> Effect<T> {
        let ids = ids.clone();
        Effect::from_run(move |ctx| {
            let id = ids.next_id();
            let span = tracing::debug_span!("correlation", correlation_id = %id);
            self.run(&ctx.with_value(id)).instrument(span)
        })
    }
}
