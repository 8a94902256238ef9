//! Conflict-retrying executor.
//!
//! Policy and mechanism are kept apart: [`classify`] decides whether a
//! provider error is worth another attempt, and [`retry_on_conflict`] drives
//! any fallible async operation under a wall-clock budget with exponential
//! backoff and jitter.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{ProviderError, RetryError};
use crate::types::RetryDecision;

/// The provider answer that means "the node is busy with another lifecycle
/// event, try again shortly".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConflictSignature {
    /// Status code of the conflict answer.
    pub status: u16,
    /// Case-insensitive substring of the provider message.
    pub message: String,
}

impl Default for ConflictSignature {
    fn default() -> Self {
        Self {
            status: 422,
            message: "already has a pending event".to_owned(),
        }
    }
}

impl ConflictSignature {
    /// Whether `err` is the provider's pending-event answer. Errors that never
    /// reached the provider do not match.
    pub fn matches(&self, err: &ProviderError) -> bool {
        match (err.status(), err.message()) {
            (Some(status), Some(message)) => {
                status == self.status
                    && message
                        .to_lowercase()
                        .contains(&self.message.to_lowercase())
            }
            _ => false,
        }
    }
}

/// Classify a provider error: only the pending-event conflict is retryable.
pub fn classify(signature: &ConflictSignature, err: &ProviderError) -> RetryDecision {
    if signature.matches(err) {
        RetryDecision::Retryable
    } else {
        RetryDecision::Fatal
    }
}

impl RetryDecision {
    /// Decision for one attempt's result.
    pub fn of<T, E>(result: &Result<T, E>, classify: impl Fn(&E) -> RetryDecision) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => classify(e),
        }
    }
}

/// Stand-in deadline for budgets too large to add to an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `start + budget`, saturating to a far-future instant on overflow.
pub(crate) fn deadline_after(start: Instant, budget: Duration) -> Instant {
    start
        .checked_add(budget)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// `delay * factor`, saturating to [`Duration::MAX`] when the product
/// overflows or is not finite.
fn scale(delay: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

/// Run `operation` until it succeeds, fails fatally, the budget in `policy`
/// runs out, or `cancel` fires.
///
/// No attempt is started once the deadline has passed, and an attempt still
/// running at the deadline is abandoned. On timeout the last retryable error
/// is handed back in [`RetryError::Timeout`].
pub async fn retry_on_conflict<F, Fut, T, E, C>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation_name: &str,
    classify: C,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryDecision,
    E: Display,
{
    let start = Instant::now();
    let deadline = deadline_after(start, policy.timeout);
    let multiplier = policy.multiplier.max(1.0);
    let mut delay = policy.initial_delay;
    let mut attempts = 0u32;
    let mut last: Option<E> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts });
        }
        attempts += 1;

        let remaining = deadline.saturating_duration_since(Instant::now());
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts }),
            res = tokio::time::timeout(remaining, operation()) => match res {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(operation = %operation_name, attempts, "attempt still running at deadline");
                    return Err(RetryError::Timeout { elapsed: start.elapsed(), attempts, last });
                }
            },
        };

        let decision = RetryDecision::of(&outcome, &classify);
        let err = match (decision, outcome) {
            (_, Ok(value)) => {
                debug!(operation = %operation_name, attempts, "operation succeeded");
                return Ok(value);
            }
            (RetryDecision::Retryable, Err(e)) => e,
            (_, Err(source)) => return Err(RetryError::Fatal { attempts, source }),
        };

        let now = Instant::now();
        if now >= deadline {
            return Err(RetryError::Timeout {
                elapsed: now - start,
                attempts,
                last: Some(err),
            });
        }

        // Jitter 0.5x..1.5x, never below the floor, never past the deadline.
        let jitter = rand::rng().random_range(0.5..1.5);
        let wait = scale(delay, jitter)
            .max(policy.min_delay)
            .min(deadline - now);

        warn!(
            operation = %operation_name,
            attempt = attempts,
            error = %err,
            delay_ms = wait.as_millis() as u64,
            "retryable conflict, retrying"
        );
        last = Some(err);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts }),
            _ = tokio::time::sleep(wait) => {}
        }

        if Instant::now() >= deadline {
            return Err(RetryError::Timeout {
                elapsed: start.elapsed(),
                attempts,
                last,
            });
        }

        delay = scale(delay, multiplier).min(policy.max_delay);
    }
}
