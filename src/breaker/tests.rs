//! State machine tests driven by a manual clock.

use super::*;
use crate::testing::{CallCounter, MetricEvent, RecordingMetrics};
use crate::{assert_canceled, assert_circuit_open, CancelCause, Context, Effect, Error};
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn setup(threshold: u32) -> (ManualClock, RecordingMetrics, SingletonBreaker) {
    let clock = ManualClock::new();
    let metrics = RecordingMetrics::new();
    let breaker = make_singleton_breaker(
        clock.clone(),
        ClosedStrategy::consecutive(threshold),
        |err: &Error| Some(err.clone()),
        RetryPolicy::exponential_backoff(ms(100)),
        metrics.clone(),
    );
    (clock, metrics, breaker)
}

fn failing() -> Effect<()> {
    Effect::fail(Error::msg("down"))
}

async fn trip(breaker: &SingletonBreaker, times: u32) {
    let effect = breaker.protect(failing());
    for _ in 0..times {
        let _ = effect.run_standalone().await;
    }
}

fn retry_in(result: crate::Result<()>) -> Duration {
    match result {
        Err(Error::CircuitOpen(rejection)) => rejection.retry_in,
        other => panic!("Expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_threshold_opens_and_rejects_without_running() {
    let (_clock, _metrics, breaker) = setup(3);
    let counter = CallCounter::new();
    let protected = breaker.protect(counter.wrap(failing()));

    for _ in 0..3 {
        let err = protected.run_standalone().await.unwrap_err();
        assert!(err.is_failed());
    }
    assert_eq!(breaker.state().kind(), BreakerStateKind::Open);
    assert_eq!(counter.count(), 3);

    assert_eq!(retry_in(protected.run_standalone().await), ms(100));
    assert_eq!(counter.count(), 3);
}

#[tokio::test]
async fn test_below_threshold_stays_closed() {
    let (_clock, _metrics, breaker) = setup(3);
    trip(&breaker, 2).await;

    let state = breaker.state();
    assert!(state.is_closed());
    assert_eq!(state.failure_count(), 2);
}

#[tokio::test]
async fn test_success_resets_failure_count() {
    let (_clock, _metrics, breaker) = setup(3);
    trip(&breaker, 2).await;
    breaker.protect(Effect::of(())).run_standalone().await.unwrap();
    trip(&breaker, 2).await;

    assert!(breaker.state().is_closed());
    assert_eq!(breaker.state().failure_count(), 2);
}

#[tokio::test]
async fn test_rejection_reports_remaining_cooldown() {
    let (clock, _metrics, breaker) = setup(1);
    trip(&breaker, 1).await;

    clock.advance(ms(30));
    let effect = breaker.protect(Effect::of(()));
    assert_eq!(retry_in(effect.run_standalone().await), ms(70));
}

#[tokio::test]
async fn test_canary_success_closes_and_can_reopen() {
    let (clock, metrics, breaker) = setup(3);
    trip(&breaker, 3).await;
    assert!(breaker.state().is_open());

    clock.advance(ms(200));
    let ok = breaker.protect(Effect::of(5));
    assert_eq!(ok.run_standalone().await.unwrap(), 5);
    assert!(breaker.state().is_closed());
    assert_eq!(ok.run_standalone().await.unwrap(), 5);

    trip(&breaker, 3).await;
    let state = breaker.state();
    assert!(state.is_open());
    assert_eq!(state.iteration(), Some(0));

    assert_eq!(
        metrics.transitions(),
        vec![
            (BreakerStateKind::Closed, BreakerStateKind::Open),
            (BreakerStateKind::Open, BreakerStateKind::HalfOpen),
            (BreakerStateKind::HalfOpen, BreakerStateKind::Closed),
            (BreakerStateKind::Closed, BreakerStateKind::Open),
        ]
    );
}

#[tokio::test]
async fn test_canary_failure_escalates_cooldown() {
    let (clock, _metrics, breaker) = setup(1);
    trip(&breaker, 1).await;

    clock.advance(ms(100));
    trip(&breaker, 1).await;
    let state = breaker.state();
    assert!(state.is_open());
    assert_eq!(state.iteration(), Some(1));
    assert_eq!(state.reopen_at(), Some(clock.now() + ms(200)));

    let probe = breaker.protect(Effect::of(()));
    clock.advance(ms(100));
    assert_eq!(retry_in(probe.run_standalone().await), ms(100));

    clock.advance(ms(100));
    trip(&breaker, 1).await;
    assert_eq!(breaker.state().iteration(), Some(2));
    assert_eq!(breaker.state().reopen_at(), Some(clock.now() + ms(400)));
}

#[tokio::test]
async fn test_stopped_policy_keeps_last_cooldown() {
    let clock = ManualClock::new();
    let breaker = CircuitBreaker::builder()
        .clock(clock.clone())
        .closed_strategy(ClosedStrategy::consecutive(1))
        .retry_policy(RetryPolicy::constant_delay(ms(50)).join(RetryPolicy::limit_retries(1)))
        .build_singleton();

    trip(&breaker, 1).await;
    clock.advance(ms(50));
    trip(&breaker, 1).await;
    clock.advance(ms(50));
    trip(&breaker, 1).await;

    let state = breaker.state();
    assert_eq!(state.iteration(), Some(2));
    assert_eq!(state.reopen_at(), Some(clock.now() + ms(50)));
}

#[tokio::test]
async fn test_uncounted_errors_pass_through() {
    #[derive(Debug, thiserror::Error)]
    #[error("not found")]
    struct NotFound;

    let metrics = RecordingMetrics::new();
    let breaker = make_singleton_breaker(
        ManualClock::new(),
        ClosedStrategy::consecutive(1),
        |err: &Error| err.downcast_ref::<NotFound>().is_none().then(|| err.clone()),
        RetryPolicy::constant_delay(ms(10)),
        metrics.clone(),
    );

    let effect = breaker.protect(Effect::<()>::fail(Error::domain(NotFound)));
    for _ in 0..5 {
        let err = effect.run_standalone().await.unwrap_err();
        assert!(err.downcast_ref::<NotFound>().is_some());
    }
    assert!(breaker.state().is_closed());
    assert_eq!(metrics.failure_count(), 0);
}

#[tokio::test]
async fn test_filter_rewrites_error_for_metrics_only() {
    let metrics = RecordingMetrics::new();
    let breaker = CircuitBreaker::builder()
        .clock(ManualClock::new())
        .check_error(|_| Some(Error::msg("upstream unavailable")))
        .metrics(metrics.clone())
        .build_singleton();

    let err = breaker.protect(failing()).run_standalone().await.unwrap_err();
    assert_eq!(err.to_string(), "down");
    assert_eq!(
        metrics.events(),
        vec![MetricEvent::Failure("upstream unavailable".to_string())]
    );
}

#[tokio::test]
async fn test_half_open_rejects_while_canary_in_flight() {
    let (clock, _metrics, breaker) = setup(1);
    trip(&breaker, 1).await;
    clock.advance(ms(100));

    let slow = breaker.protect(Effect::<()>::from_async(|_| std::future::pending()));
    let mut canary = slow.run(&Context::background());
    assert!(futures::poll!(&mut canary).is_pending());
    assert_eq!(breaker.state().kind(), BreakerStateKind::HalfOpen);

    let other = breaker.protect(Effect::of(()));
    assert_eq!(retry_in(other.run_standalone().await), ms(100));
}

#[tokio::test]
async fn test_dropped_canary_rearms() {
    let (clock, metrics, breaker) = setup(1);
    trip(&breaker, 1).await;
    clock.advance(ms(100));

    let slow = breaker.protect(Effect::<()>::from_async(|_| std::future::pending()));
    let mut canary = slow.run(&Context::background());
    assert!(futures::poll!(&mut canary).is_pending());
    drop(canary);

    let state = breaker.state();
    assert!(state.is_open());
    assert_eq!(state.iteration(), Some(0));
    assert_eq!(state.reopen_at(), Some(clock.now()));
    assert_eq!(
        metrics.transitions().last(),
        Some(&(BreakerStateKind::HalfOpen, BreakerStateKind::Open))
    );

    breaker.protect(Effect::of(())).run_standalone().await.unwrap();
    assert!(breaker.state().is_closed());
}

#[tokio::test]
async fn test_canceled_canary_rearms_under_ignore() {
    let (clock, _metrics, breaker) = setup(1);
    trip(&breaker, 1).await;
    clock.advance(ms(100));

    let ctx = Context::background();
    let mut canary = breaker.protect(Effect::<()>::until_canceled()).run(&ctx);
    assert!(futures::poll!(&mut canary).is_pending());
    ctx.cancel();
    assert_canceled!(canary.await, CancelCause::Requested);

    let state = breaker.state();
    assert!(state.is_open());
    assert_eq!(state.iteration(), Some(0));
}

#[tokio::test]
async fn test_cancellation_neutral_while_closed() {
    let (_clock, _metrics, breaker) = setup(1);
    let effect = breaker.protect(Effect::<()>::fail(Error::Canceled(CancelCause::Requested)));
    for _ in 0..3 {
        assert_canceled!(effect.run_standalone().await);
    }
    assert!(breaker.state().is_closed());
    assert_eq!(breaker.state().failure_count(), 0);
}

#[tokio::test]
async fn test_cancellation_counts_when_configured() {
    let breaker = CircuitBreaker::builder()
        .clock(ManualClock::new())
        .closed_strategy(ClosedStrategy::consecutive(2))
        .cancellation_policy(CancellationPolicy::Count)
        .build_singleton();

    let effect = breaker.protect(Effect::<()>::fail(Error::Canceled(CancelCause::Requested)));
    let _ = effect.run_standalone().await;
    let _ = effect.run_standalone().await;
    assert!(breaker.state().is_open());
}

#[tokio::test]
async fn test_canceled_caller_is_not_admitted() {
    let (clock, _metrics, breaker) = setup(1);
    trip(&breaker, 1).await;
    clock.advance(ms(100));

    let ctx = Context::background();
    ctx.cancel();
    assert_canceled!(breaker.protect(Effect::of(())).run(&ctx).await);
    assert!(breaker.state().is_open());
}

#[tokio::test]
async fn test_sliding_window_forgets_old_failures() {
    let clock = ManualClock::new();
    let breaker = CircuitBreaker::builder()
        .clock(clock.clone())
        .closed_strategy(ClosedStrategy::sliding_window(2, ms(1_000)))
        .build_singleton();

    trip(&breaker, 1).await;
    clock.advance(ms(1_500));
    trip(&breaker, 1).await;
    assert!(breaker.state().is_closed());

    clock.advance(ms(100));
    trip(&breaker, 1).await;
    assert!(breaker.state().is_open());
}

#[tokio::test]
async fn test_cells_are_independent() {
    let breaker = CircuitBreaker::builder()
        .clock(ManualClock::new())
        .closed_strategy(ClosedStrategy::consecutive(1))
        .build();
    let (east, west) = (BreakerCell::new(), BreakerCell::new());

    let _ = breaker.protect(&east, failing()).run_standalone().await;
    assert!(east.snapshot().is_open());
    assert!(west.snapshot().is_closed());
    breaker.protect(&west, Effect::of(())).run_standalone().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_canary_under_contention() {
    let (clock, metrics, breaker) = setup(1);
    trip(&breaker, 1).await;
    clock.advance(ms(100));

    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let counter = CallCounter::new();
    let slow = breaker.protect(counter.wrap(Effect::from_async({
        let gate = gate.clone();
        move |_| {
            let gate = gate.clone();
            async move {
                let _permit = gate.acquire().await.map_err(Error::domain)?;
                Ok::<(), Error>(())
            }
        }
    })));

    let handles: Vec<_> = (0..8)
        .map(|_| tokio::spawn(slow.run(&Context::background())))
        .collect();

    tokio::time::timeout(Duration::from_secs(5), async {
        while metrics.rejected_count() < 7 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("seven callers rejected");
    gate.add_permits(1);

    let mut admitted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => admitted += 1,
            rejected => assert_circuit_open!(rejected),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(counter.count(), 1);
    assert!(breaker.state().is_closed());
}

#[tokio::test]
#[traced_test]
async fn test_transitions_are_logged() {
    let clock = ManualClock::new();
    let breaker = CircuitBreaker::builder()
        .name("payments")
        .clock(clock.clone())
        .closed_strategy(ClosedStrategy::consecutive(1))
        .retry_policy(RetryPolicy::constant_delay(ms(10)))
        .build_singleton();

    trip(&breaker, 1).await;
    clock.advance(ms(10));
    breaker.protect(Effect::of(())).run_standalone().await.unwrap();

    assert!(logs_contain("circuit opened"));
    assert!(logs_contain("payments"));
    assert!(logs_contain("circuit closed"));
}
