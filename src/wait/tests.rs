//! Unit tests for polling and readiness waits.

use std::time::{Duration, Instant};

use rstest::rstest;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::provider::ProviderError;
use crate::test_support::{FakeCloud, health};

const INSTANCE: &str = "i-0123456789abcdef0";

fn quick(attempts: u32) -> PollPolicy {
    PollPolicy::fixed_attempts(Duration::from_millis(10), attempts)
}

#[rstest]
#[case(0, 100)]
#[case(1, 200)]
#[case(2, 400)]
#[case(3, 500)]
#[case(40, 500)]
fn exponential_backoff_is_capped(#[case] attempt: u32, #[case] expected_ms: u64) {
    let backoff = Backoff::CappedExponential {
        initial: Duration::from_millis(100),
        max: Duration::from_millis(500),
    };
    assert_eq!(backoff.delay_for(attempt), Duration::from_millis(expected_ms));
}

#[tokio::test]
async fn running_is_reached_after_pending_polls() {
    let cloud = FakeCloud::new().with_health_script(vec![
        health("pending", "not-applicable", "not-applicable"),
        health("pending", "not-applicable", "not-applicable"),
        health("running", "initializing", "initializing"),
    ]);
    let waiter = ReadinessWaiter::new(&cloud, CancellationToken::new());

    let outcome = waiter
        .wait_until(INSTANCE, ReadinessCondition::Running, &quick(10))
        .await
        .unwrap_or_else(|err| panic!("wait failed: {err}"));

    assert_eq!(outcome, WaitOutcome::Ready);
    assert_eq!(cloud.count("describe_health"), 3);
}

#[tokio::test]
async fn status_ok_requires_both_checks() {
    let cloud = FakeCloud::new().with_health_script(vec![
        health("running", "initializing", "ok"),
        health("running", "ok", "initializing"),
        health("running", "ok", "ok"),
    ]);
    let waiter = ReadinessWaiter::new(&cloud, CancellationToken::new());

    let outcome = waiter
        .wait_until(INSTANCE, ReadinessCondition::StatusOk, &quick(10))
        .await
        .unwrap_or_else(|err| panic!("wait failed: {err}"));

    assert_eq!(outcome, WaitOutcome::Ready);
    assert_eq!(cloud.count("describe_health"), 3);
}

#[tokio::test]
async fn never_ready_times_out_within_attempt_budget() {
    let cloud =
        FakeCloud::new().with_health_script(vec![health("pending", "initializing", "initializing")]);
    let waiter = ReadinessWaiter::new(&cloud, CancellationToken::new());
    let interval = Duration::from_millis(20);
    let policy = PollPolicy::fixed_attempts(interval, 4);

    let started = Instant::now();
    let outcome = waiter
        .wait_until(INSTANCE, ReadinessCondition::Running, &policy)
        .await
        .unwrap_or_else(|err| panic!("wait failed: {err}"));
    let elapsed = started.elapsed();

    assert!(matches!(outcome, WaitOutcome::TimedOut { attempts: 4, .. }));
    assert_eq!(cloud.count("describe_health"), 4);
    assert!(
        elapsed <= interval * 4 + Duration::from_millis(250),
        "waited {elapsed:?}"
    );
}

#[tokio::test]
async fn never_ready_times_out_within_wall_clock_budget() {
    let cloud =
        FakeCloud::new().with_health_script(vec![health("pending", "initializing", "initializing")]);
    let waiter = ReadinessWaiter::new(&cloud, CancellationToken::new());
    let budget = Duration::from_millis(60);
    let policy = PollPolicy::fixed_budget(Duration::from_millis(25), budget);

    let started = Instant::now();
    let outcome = waiter
        .wait_until(INSTANCE, ReadinessCondition::StatusOk, &policy)
        .await
        .unwrap_or_else(|err| panic!("wait failed: {err}"));

    assert!(matches!(outcome, WaitOutcome::TimedOut { .. }));
    assert!(started.elapsed() <= budget + Duration::from_millis(250));
}

#[tokio::test]
async fn terminal_state_short_circuits() {
    let cloud =
        FakeCloud::new().with_health_script(vec![health("shutting-down", "ok", "ok")]);
    let waiter = ReadinessWaiter::new(&cloud, CancellationToken::new());

    let err = waiter
        .wait_until(INSTANCE, ReadinessCondition::Running, &quick(50))
        .await
        .expect_err("terminal state should stop the wait");

    assert_eq!(
        err,
        WaitError::Terminal {
            instance_id: INSTANCE.to_owned(),
            state: String::from("shutting-down"),
        }
    );
    assert_eq!(cloud.count("describe_health"), 1);
}

#[tokio::test]
async fn unknown_instance_counts_as_pending() {
    let cloud = FakeCloud::new()
        .with_health_script(vec![health("running", "ok", "ok")])
        .fail_next(
            "describe_health",
            ProviderError::NotFound {
                message: String::from("InvalidInstanceID.NotFound"),
            },
        );
    let waiter = ReadinessWaiter::new(&cloud, CancellationToken::new());

    let outcome = waiter
        .wait_until(INSTANCE, ReadinessCondition::Running, &quick(5))
        .await
        .unwrap_or_else(|err| panic!("wait failed: {err}"));

    assert_eq!(outcome, WaitOutcome::Ready);
    assert_eq!(cloud.count("describe_health"), 2);
}

#[tokio::test]
async fn other_provider_errors_abort_the_wait() {
    let cloud = FakeCloud::new().fail_next(
        "describe_health",
        ProviderError::PermissionDenied {
            message: String::from("UnauthorizedOperation"),
        },
    );
    let waiter = ReadinessWaiter::new(&cloud, CancellationToken::new());

    let err = waiter
        .wait_until(INSTANCE, ReadinessCondition::Running, &quick(5))
        .await
        .expect_err("permission errors are not retried");

    assert!(matches!(err, WaitError::Provider { .. }));
}

#[tokio::test]
async fn cancellation_interrupts_a_long_sleep() {
    let cloud =
        FakeCloud::new().with_health_script(vec![health("pending", "initializing", "initializing")]);
    let token = CancellationToken::new();
    let waiter = ReadinessWaiter::new(&cloud, token.clone());
    let policy = PollPolicy::fixed_attempts(Duration::from_secs(30), 10);

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = waiter
        .wait_until(INSTANCE, ReadinessCondition::Running, &policy)
        .await
        .expect_err("cancelled wait should fail");

    assert!(matches!(err, WaitError::Cancelled { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn poll_until_returns_the_ready_value() {
    let token = CancellationToken::new();
    let mut remaining = 2_u32;
    let value = poll_until(&quick(5), &token, || {
        let current = remaining;
        remaining = remaining.saturating_sub(1);
        async move {
            if current == 0 {
                Ok::<_, ()>(PollStatus::Ready("done"))
            } else {
                Ok(PollStatus::Pending)
            }
        }
    })
    .await
    .unwrap_or_else(|err| panic!("poll failed: {err:?}"));

    assert_eq!(value, "done");
}

#[tokio::test]
async fn check_in_flight_finishes_when_cancelled() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let value = poll_until(&quick(5), &token, || {
        let cancel = trigger.clone();
        async move {
            cancel.cancel();
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, ()>(PollStatus::Ready("session"))
        }
    })
    .await;

    assert_eq!(value, Ok("session"));
}

#[tokio::test]
async fn cancelled_token_stops_before_the_first_check() {
    let token = CancellationToken::new();
    token.cancel();
    let mut checks = 0_u32;
    let outcome = poll_until(&quick(5), &token, || {
        checks = checks.saturating_add(1);
        async { Ok::<_, ()>(PollStatus::Ready(())) }
    })
    .await;

    assert_eq!(outcome, Err(PollError::Cancelled));
    assert_eq!(checks, 0);
}
