//! Unit tests for the wait-for-condition primitive
//!
//! All tests run on a paused tokio clock, so multi-second budgets finish
//! instantly while still exercising the real sleep/deadline arithmetic.

use std::cell::Cell;
use std::time::Duration;

use operator_deployer::wait::{WaitCondition, wait_for};
use operator_deployer::Error;
use tokio::time::Instant;

const POLL: Duration = Duration::from_secs(1);
const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test(start_paused = true)]
async fn test_always_true_returns_full_budget() {
    let remaining = wait_for("always ready", POLL, TIMEOUT, || async { Ok::<_, Error>(true) }, || {})
        .await
        .unwrap();
    assert_eq!(remaining, TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn test_always_false_times_out_within_one_poll() {
    let start = Instant::now();
    let err = wait_for("never ready", POLL, TIMEOUT, || async { Ok::<_, Error>(false) }, || {})
        .await
        .unwrap_err();

    let elapsed = start.elapsed();
    assert!(elapsed >= TIMEOUT, "gave up early after {elapsed:?}");
    assert!(elapsed <= TIMEOUT + POLL, "overshot deadline: {elapsed:?}");
    match err {
        Error::Timeout {
            description,
            timeout,
            last_error,
        } => {
            assert_eq!(description, "never ready");
            assert_eq!(timeout, TIMEOUT);
            assert!(last_error.is_none());
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_errors_never_short_circuit() {
    let calls = Cell::new(0u32);
    let err = wait_for(
        "flaky api",
        POLL,
        TIMEOUT,
        || {
            calls.set(calls.get() + 1);
            async { Err::<bool, _>("connection refused") }
        },
        || {},
    )
    .await
    .unwrap_err();

    // One evaluation per poll until the deadline, never an early exit
    assert!(calls.get() >= 10, "only {} evaluations", calls.get());
    assert!(matches!(
        err,
        Error::Timeout { last_error: Some(ref e), .. } if e == "connection refused"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_recovers_after_transient_errors() {
    let calls = Cell::new(0u32);
    let remaining = wait_for(
        "eventually ready",
        POLL,
        TIMEOUT,
        || {
            let n = calls.get() + 1;
            calls.set(n);
            async move {
                match n {
                    1 | 2 => Err("503 service unavailable"),
                    3 => Ok(false),
                    _ => Ok(true),
                }
            }
        },
        || {},
    )
    .await
    .unwrap();

    assert_eq!(calls.get(), 4);
    assert_eq!(remaining, TIMEOUT - POLL * 3);
}

#[tokio::test(start_paused = true)]
async fn test_on_timeout_runs_once_and_only_on_timeout() {
    let fired = Cell::new(0u32);
    let _ = wait_for("never", POLL, TIMEOUT, || async { Ok::<_, Error>(false) }, || {
        fired.set(fired.get() + 1)
    })
    .await;
    assert_eq!(fired.get(), 1);

    let fired = Cell::new(0u32);
    wait_for("always", POLL, TIMEOUT, || async { Ok::<_, Error>(true) }, || {
        fired.set(fired.get() + 1)
    })
    .await
    .unwrap();
    assert_eq!(fired.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_last_sleep_is_clamped_to_deadline() {
    let start = Instant::now();
    let _ = wait_for(
        "clamped",
        Duration::from_secs(4),
        Duration::from_secs(10),
        || async { Ok::<_, Error>(false) },
        || {},
    )
    .await;
    // Polls at 0s, 4s, 8s, then sleeps 2s instead of 4s
    assert_eq!(start.elapsed(), Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_wait_condition_builder() {
    let timed_out = std::sync::atomic::AtomicBool::new(false);
    let condition = WaitCondition::new("builder wait")
        .poll_interval(Duration::from_millis(500))
        .timeout(Duration::from_secs(3))
        .on_timeout(|| timed_out.store(true, std::sync::atomic::Ordering::SeqCst));

    let err = condition
        .until(|| async { Ok::<_, Error>(false) })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { timeout, .. } if timeout == Duration::from_secs(3)));
    assert!(timed_out.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_wait_condition_default_on_timeout_is_noop() {
    let remaining = WaitCondition::new("defaults")
        .timeout(Duration::from_secs(5))
        .until(|| async { Ok::<_, Error>(true) })
        .await
        .unwrap();
    assert_eq!(remaining, Duration::from_secs(5));
}
