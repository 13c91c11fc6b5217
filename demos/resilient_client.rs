//! A flaky upstream behind a breaker, a retry policy and a deadline.
//!
//! Run with: cargo run --example resilient_client --features jitter

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use undertow::breaker::{BreakerState, CircuitBreaker, ClosedStrategy};
use undertow::correlation::CorrelationIds;
use undertow::retry::{Backoff, RetryPolicy};
use undertow::{Effect, Error};

#[derive(Debug, thiserror::Error)]
#[error("upstream returned {0}")]
struct Upstream(u16);

/// Fails the first `outage` requests with a 503.
fn upstream(outage: u32) -> Effect<String> {
    let requests = Arc::new(AtomicU32::new(0));
    Effect::from_async(move |_| {
        let requests = requests.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let n = requests.fetch_add(1, Ordering::SeqCst);
            if n < outage {
                Err(Error::domain(Upstream(503)))
            } else {
                Ok(format!("response #{n}"))
            }
        }
    })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let breaker = CircuitBreaker::builder()
        .name("inventory")
        .closed_strategy(ClosedStrategy::consecutive(3))
        .retry_policy(RetryPolicy::exponential_backoff(Duration::from_millis(50)))
        .build_singleton();

    let backoff = Backoff::exponential(Duration::from_millis(20))
        .with_max_delay(Duration::from_millis(200))
        .with_jitter(0.2)
        .with_max_retries(10);

    let ids = CorrelationIds::new();
    let request = breaker
        .protect(upstream(5))
        .retry(backoff)
        .with_timeout(Duration::from_secs(2))
        .with_correlation(&ids)
        .instrument(tracing::info_span!("fetch_inventory"));

    match request.run_standalone().await {
        Ok(body) => tracing::info!(%body, "request succeeded"),
        Err(error) => tracing::error!(%error, "request failed"),
    }

    match breaker.state() {
        BreakerState::Closed { .. } => tracing::info!("breaker healthy"),
        other => tracing::warn!(state = %other.kind(), "breaker still tripped"),
    }
}
