//! Bounded, cancellable polling.
//!
//! [`poll_until`] drives any check under a [`PollPolicy`]; the
//! [`ReadinessWaiter`] uses it to gate the flow on instance state, and the
//! session channel, password retrieval, and viewer reuse it for their own
//! retry loops. The cancellation token is checked before every poll and
//! raced against every pause, so an interrupt is observed mid-sleep rather
//! than at the next interval.

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::provider::{ComputeApi, InstanceState, ProviderError, StatusCheck};

/// Delay schedule between polls.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backoff {
    /// Same delay after every poll.
    Fixed(Duration),
    /// Delay doubles after every poll, never exceeding `max`.
    CappedExponential {
        /// Delay after the first poll.
        initial: Duration,
        /// Upper bound for any single delay.
        max: Duration,
    },
}

impl Backoff {
    /// Delay to apply after the poll numbered `attempt` (zero based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::CappedExponential { initial, max } => {
                let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Upper bound for a poll loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollLimit {
    /// Stop after this many polls.
    Attempts(u32),
    /// Stop once this much wall-clock time has elapsed.
    Budget(Duration),
}

/// Backoff plus limit. Every policy is bounded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Delay schedule.
    pub backoff: Backoff,
    /// Bound on attempts or elapsed time.
    pub limit: PollLimit,
}

impl PollPolicy {
    /// Fixed-interval polling bounded by a number of attempts.
    #[must_use]
    pub const fn fixed_attempts(interval: Duration, attempts: u32) -> Self {
        Self {
            backoff: Backoff::Fixed(interval),
            limit: PollLimit::Attempts(attempts),
        }
    }

    /// Fixed-interval polling bounded by elapsed time.
    #[must_use]
    pub const fn fixed_budget(interval: Duration, budget: Duration) -> Self {
        Self {
            backoff: Backoff::Fixed(interval),
            limit: PollLimit::Budget(budget),
        }
    }

    /// Capped exponential polling bounded by elapsed time.
    #[must_use]
    pub const fn exponential_budget(initial: Duration, max: Duration, budget: Duration) -> Self {
        Self {
            backoff: Backoff::CappedExponential { initial, max },
            limit: PollLimit::Budget(budget),
        }
    }
}

/// What a single check observed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PollStatus<T> {
    /// The condition holds; stop with this value.
    Ready(T),
    /// Not yet; poll again after the next delay.
    Pending,
    /// The condition can never hold; stop immediately.
    Terminal(String),
}

/// Why a poll loop ended without a ready value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PollError<E> {
    /// The check itself failed.
    Check(E),
    /// The check observed a terminal state.
    Terminal(String),
    /// The cancellation token fired.
    Cancelled,
    /// The policy's limit was reached.
    Exhausted {
        /// Number of polls performed.
        attempts: u32,
        /// Time spent polling.
        elapsed: Duration,
    },
}

/// Polls `check` until it reports ready, the policy is exhausted, or
/// `cancel` fires.
///
/// Cancellation is observed before each check and during each pause. A check
/// that has started always runs to completion, so a check that creates
/// something (a broker session) never loses its result; a ready value wins
/// over a cancellation that arrived while it was being produced.
///
/// # Errors
///
/// Returns [`PollError`] describing why no ready value was produced.
pub async fn poll_until<T, E, F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>, E>>,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }
        let observed = check().await;
        let delay = policy.backoff.delay_for(attempts);
        attempts = attempts.saturating_add(1);

        match observed.map_err(PollError::Check)? {
            PollStatus::Ready(value) => return Ok(value),
            PollStatus::Terminal(reason) => return Err(PollError::Terminal(reason)),
            PollStatus::Pending => {}
        }

        let next_pause = match policy.limit {
            PollLimit::Attempts(max) if attempts >= max => None,
            PollLimit::Attempts(_) => Some(delay),
            PollLimit::Budget(budget) => budget
                .checked_sub(started.elapsed())
                .filter(|remaining| !remaining.is_zero())
                .map(|remaining| delay.min(remaining)),
        };
        let Some(pause) = next_pause else {
            return Err(PollError::Exhausted {
                attempts,
                elapsed: started.elapsed(),
            });
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(PollError::Cancelled),
            () = sleep(pause) => {}
        }
    }
}

/// Instance conditions the flows gate on, in the order they are reached.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadinessCondition {
    /// The instance reports `running`.
    Running,
    /// The instance is running and both status checks pass.
    StatusOk,
}

impl ReadinessCondition {
    /// Short name used in logs and errors.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::StatusOk => "status-ok",
        }
    }
}

/// Result of waiting on a condition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    /// The condition holds.
    Ready,
    /// The policy ran out before the condition held.
    TimedOut {
        /// Polls performed.
        attempts: u32,
        /// Time spent.
        elapsed: Duration,
    },
}

/// Failures that stop a wait before its budget is spent.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WaitError {
    /// The instance entered a state it cannot leave.
    #[error("instance {instance_id} entered terminal state {state}")]
    Terminal {
        /// Instance being waited on.
        instance_id: String,
        /// State reported by the provider.
        state: String,
    },
    /// The wait was interrupted.
    #[error("wait for instance {instance_id} cancelled")]
    Cancelled {
        /// Instance being waited on.
        instance_id: String,
    },
    /// A describe call failed.
    #[error("failed to query instance {instance_id}: {source}")]
    Provider {
        /// Instance being waited on.
        instance_id: String,
        /// Underlying provider error.
        source: ProviderError,
    },
}

/// Polls instance state until a [`ReadinessCondition`] holds.
pub struct ReadinessWaiter<'a> {
    compute: &'a dyn ComputeApi,
    cancel: CancellationToken,
}

impl<'a> ReadinessWaiter<'a> {
    /// Creates a waiter that stops early when `cancel` fires.
    #[must_use]
    pub fn new(compute: &'a dyn ComputeApi, cancel: CancellationToken) -> Self {
        Self { compute, cancel }
    }

    /// Waits until `condition` holds for `instance_id` or `policy` runs out.
    ///
    /// An instance the provider does not know about yet counts as pending,
    /// since describe calls lag behind the create call.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError`] on terminal states, interrupts, or failing
    /// describe calls.
    pub async fn wait_until(
        &self,
        instance_id: &str,
        condition: ReadinessCondition,
        policy: &PollPolicy,
    ) -> Result<WaitOutcome, WaitError> {
        debug!(instance_id, condition = condition.label(), "waiting for instance");
        let compute = self.compute;
        let result = poll_until(policy, &self.cancel, || async move {
            let observed = match compute.describe_health(instance_id).await {
                Ok(snapshot) => snapshot,
                Err(err) if err.is_not_found() => None,
                Err(err) => return Err(err),
            };
            let Some(health) = observed else {
                return Ok(PollStatus::Pending);
            };
            if health.state.is_terminal() {
                return Ok(PollStatus::Terminal(health.state.to_string()));
            }
            let running = health.state == InstanceState::Running;
            let ready = match condition {
                ReadinessCondition::Running => running,
                ReadinessCondition::StatusOk => {
                    running
                        && health.instance_status == StatusCheck::Ok
                        && health.system_status == StatusCheck::Ok
                }
            };
            Ok(if ready {
                PollStatus::Ready(())
            } else {
                PollStatus::Pending
            })
        })
        .await;

        match result {
            Ok(()) => Ok(WaitOutcome::Ready),
            Err(PollError::Exhausted { attempts, elapsed }) => {
                Ok(WaitOutcome::TimedOut { attempts, elapsed })
            }
            Err(PollError::Terminal(state)) => Err(WaitError::Terminal {
                instance_id: instance_id.to_owned(),
                state,
            }),
            Err(PollError::Cancelled) => Err(WaitError::Cancelled {
                instance_id: instance_id.to_owned(),
            }),
            Err(PollError::Check(source)) => Err(WaitError::Provider {
                instance_id: instance_id.to_owned(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests;
