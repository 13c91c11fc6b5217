//! Circuit breaker scenarios across virtual and tokio-paused time.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use undertow::breaker::{
    make_circuit_breaker, make_singleton_breaker, BreakerCell, BreakerStateKind, CircuitBreaker,
    ClosedStrategy, ManualClock, SystemClock,
};
use undertow::retry::RetryPolicy;
use undertow::testing::{CallCounter, RecordingMetrics};
use undertow::{assert_circuit_open, Effect, Error};

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

#[tokio::test]
async fn three_failures_open_then_success_after_200ms_closes() {
    let clock = ManualClock::new();
    let metrics = RecordingMetrics::new();
    let breaker = make_singleton_breaker(
        clock.clone(),
        ClosedStrategy::consecutive(3),
        |err: &Error| Some(err.clone()),
        RetryPolicy::exponential_backoff(ms(100)),
        metrics.clone(),
    );

    let failing = breaker.protect(Effect::<u32>::fail(Error::msg("service down")));
    for _ in 0..3 {
        assert!(failing.run_standalone().await.unwrap_err().is_failed());
    }
    assert_eq!(breaker.state().kind(), BreakerStateKind::Open);

    clock.advance(ms(200));
    let counter = CallCounter::new();
    let healthy = breaker.protect(counter.wrap(Effect::of(7u32)));
    assert_eq!(healthy.run_standalone().await.unwrap(), 7);
    assert_eq!(breaker.state().kind(), BreakerStateKind::Closed);

    for _ in 0..3 {
        assert_eq!(healthy.run_standalone().await.unwrap(), 7);
    }
    assert_eq!(counter.count(), 4);
    assert_eq!(metrics.rejected_count(), 0);
}

#[tokio::test]
async fn fourth_call_rejected_without_invoking() {
    let clock = ManualClock::new();
    let breaker = make_singleton_breaker(
        clock,
        ClosedStrategy::consecutive(3),
        |err: &Error| Some(err.clone()),
        RetryPolicy::exponential_backoff(ms(100)),
        RecordingMetrics::new(),
    );

    let counter = CallCounter::new();
    let failing = breaker.protect(counter.wrap(Effect::<()>::fail(Error::msg("boom"))));
    for _ in 0..3 {
        let _ = failing.run_standalone().await;
    }

    let rejection = failing.run_standalone().await;
    assert_circuit_open!(rejection);
    assert_eq!(counter.count(), 3);
    assert!(failing
        .run_standalone()
        .await
        .unwrap_err()
        .to_string()
        .contains("circuit open"));
}

#[tokio::test(start_paused = true)]
async fn system_clock_follows_paused_tokio_time() {
    let breaker = CircuitBreaker::builder()
        .clock(SystemClock)
        .closed_strategy(ClosedStrategy::consecutive(1))
        .retry_policy(RetryPolicy::exponential_backoff(ms(100)))
        .build_singleton();

    let _ = breaker
        .protect(Effect::<()>::fail(Error::msg("down")))
        .run_standalone()
        .await;
    let probe = breaker.protect(Effect::of(()));
    assert_circuit_open!(probe.run_standalone().await);

    tokio::time::advance(ms(100)).await;
    probe.run_standalone().await.unwrap();
    assert!(breaker.state().is_closed());
}

#[tokio::test(start_paused = true)]
async fn retry_waits_out_the_breaker() {
    let attempts = Arc::new(AtomicU32::new(0));
    let seen = attempts.clone();
    let flaky = Effect::from_fn(move |_| {
        if seen.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(Error::msg("warming up"))
        } else {
            Ok("served")
        }
    });
    let metrics = RecordingMetrics::new();
    let guarded = CircuitBreaker::builder()
        .clock(SystemClock)
        .closed_strategy(ClosedStrategy::consecutive(2))
        .retry_policy(RetryPolicy::constant_delay(ms(500)))
        .metrics(metrics.clone())
        .build_singleton();
    let effect = guarded.protect(flaky);

    let start = Instant::now();
    let result = effect
        .retry(RetryPolicy::constant_delay(ms(200)).join(RetryPolicy::limit_retries(5)))
        .run_standalone()
        .await;

    assert_eq!(result.unwrap(), "served");
    // Tripped at 200ms; attempts at 400ms and 600ms are rejected and the
    // one at 800ms is the canary.
    assert_eq!(start.elapsed(), ms(800));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(metrics.rejected_count(), 2);
    assert!(guarded.state().is_closed());
}

#[tokio::test]
async fn one_breaker_many_cells() {
    let breaker = make_circuit_breaker(
        ManualClock::new(),
        ClosedStrategy::consecutive(1),
        |err: &Error| Some(err.clone()),
        RetryPolicy::constant_delay(ms(50)),
        RecordingMetrics::new(),
    );
    let hosts: Vec<BreakerCell> = (0..3).map(|_| BreakerCell::new()).collect();

    let _ = breaker
        .protect(&hosts[1], Effect::<()>::fail(Error::msg("host 1 down")))
        .run_standalone()
        .await;

    let kinds: Vec<_> = hosts.iter().map(|cell| cell.snapshot().kind()).collect();
    assert_eq!(
        kinds,
        vec![
            BreakerStateKind::Closed,
            BreakerStateKind::Open,
            BreakerStateKind::Closed
        ]
    );
}
