//! Tests for the retry loop.

use super::*;
use crate::error::CancelCause;
use crate::{Context, Effect, Error};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_test::traced_test;

fn flaky(calls: Arc<AtomicU32>, failures: u32) -> Effect<&'static str> {
    Effect::from_fn(move |_| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < failures {
            Err(Error::msg("transient failure"))
        } else {
            Ok("success")
        }
    })
}

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_on_third_attempt() {
    let calls = Arc::new(AtomicU32::new(0));
    let effect = retry(
        RetryPolicy::constant_delay(Duration::from_millis(10)).join(RetryPolicy::limit_retries(5)),
        flaky(calls.clone(), 2),
    );

    assert_eq!(effect.run_standalone().await.unwrap(), "success");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_returns_last_failure() {
    let calls = Arc::new(AtomicU32::new(0));
    let effect = retrying(
        RetryPolicy::limit_retries(3),
        {
            let calls = calls.clone();
            move |status: &RetryStatus| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                assert_eq!(status.iteration, n);
                Effect::<()>::fail(Error::msg(format!("failure {n}")))
            }
        },
        |result| result.is_err(),
    );

    let err = effect.run_standalone().await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(err.to_string(), "failure 3");
}

#[tokio::test(start_paused = true)]
async fn test_status_threads_delays() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let effect = retrying(
        RetryPolicy::exponential_backoff(Duration::from_millis(100))
            .join(RetryPolicy::limit_retries(3)),
        {
            let seen = seen.clone();
            move |status: &RetryStatus| {
                seen.lock().unwrap().push(*status);
                Effect::<()>::fail(Error::msg("nope"))
            }
        },
        |_| true,
    );

    let start = tokio::time::Instant::now();
    let _ = effect.run_standalone().await;
    assert_eq!(start.elapsed(), Duration::from_millis(700));

    let seen = seen.lock().unwrap();
    let cumulative: Vec<_> = seen.iter().map(|s| s.cumulative_delay.as_millis()).collect();
    assert_eq!(cumulative, vec![0, 100, 300, 700]);
    assert_eq!(seen[3].previous_delay, Some(Duration::from_millis(400)));
}

#[tokio::test]
async fn test_should_retry_false_stops_immediately() {
    let calls = Arc::new(AtomicU32::new(0));
    let effect = retrying(
        RetryPolicy::limit_retries(10),
        {
            let calls = calls.clone();
            move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Effect::of(7)
            }
        },
        |result| matches!(result, Ok(v) if *v < 5),
    );

    assert_eq!(effect.run_standalone().await.unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_if_skips_non_retryable_errors() {
    #[derive(Debug, thiserror::Error)]
    #[error("permanent")]
    struct Permanent;

    let calls = Arc::new(AtomicU32::new(0));
    let effect = retry_if(
        RetryPolicy::limit_retries(5),
        {
            let calls = calls.clone();
            Effect::from_fn(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::domain(Permanent))
            })
        },
        |err| err.downcast_ref::<Permanent>().is_none(),
    );

    let err = effect.run_standalone().await.unwrap_err();
    assert!(err.downcast_ref::<Permanent>().is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_delay_wins() {
    let ctx = Context::background();
    let calls = Arc::new(AtomicU32::new(0));
    let effect = retrying(
        RetryPolicy::constant_delay(Duration::from_secs(3600)),
        {
            let calls = calls.clone();
            move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Effect::<()>::fail(Error::msg("down"))
            }
        },
        |_| true,
    );

    let canceler = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceler.cancel();
    });

    let start = tokio::time::Instant::now();
    let err = effect.run(&ctx).await.unwrap_err();
    assert!(matches!(err, Error::Canceled(CancelCause::Requested)));
    assert_eq!(start.elapsed(), Duration::from_millis(50));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_overrides_successful_attempt() {
    let ctx = Context::background();
    let effect = retrying(
        RetryPolicy::limit_retries(3),
        {
            let ctx = ctx.clone();
            move |_| {
                ctx.cancel();
                Effect::of(1)
            }
        },
        |_| false,
    );

    let err = effect.run(&ctx).await.unwrap_err();
    assert!(err.is_canceled());
}

#[tokio::test]
async fn test_cancellation_results_are_never_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let effect = retrying(
        RetryPolicy::limit_retries(5),
        {
            let calls = calls.clone();
            move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                // Canceled by a context of its own, not the caller's
                Effect::<()>::fail(Error::Canceled(CancelCause::Requested))
            }
        },
        |_| true,
    );

    assert!(effect.run_standalone().await.unwrap_err().is_canceled());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_many_iterations_do_not_grow_the_stack() {
    let calls = Arc::new(AtomicU32::new(0));
    let effect = retry(RetryPolicy::limit_retries(10_000), flaky(calls.clone(), 10_000));

    assert_eq!(effect.run_standalone().await.unwrap(), "success");
    assert_eq!(calls.load(Ordering::SeqCst), 10_001);
}

#[tokio::test(start_paused = true)]
async fn test_effect_retry_accepts_backoff() {
    let calls = Arc::new(AtomicU32::new(0));
    let effect = flaky(calls.clone(), 1).retry(Backoff::constant(Duration::from_millis(5)).with_max_retries(2));

    assert_eq!(effect.run_standalone().await.unwrap(), "success");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
#[traced_test]
async fn test_exhaustion_is_logged() {
    let effect = retry(RetryPolicy::limit_retries(1), Effect::<()>::fail(Error::msg("down")));
    let _ = effect.run_standalone().await;

    assert!(logs_contain("retrying after delay"));
    assert!(logs_contain("retry policy exhausted"));
}
