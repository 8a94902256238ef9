//! Action poller.
//!
//! Waits for a submitted provider action to reach a terminal status.  The
//! wait is all-or-nothing: callers see either the completed action or a
//! [`PollError`], never intermediate progress.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::PollPolicy;
use crate::error::PollError;
use crate::provider::VolumeProvider;
use crate::retry::deadline_after;
use crate::types::{ActionStatus, ProviderAction};

/// Polls action status through a [`VolumeProvider`].
pub struct ActionPoller<P: ?Sized> {
    provider: Arc<P>,
    policy: PollPolicy,
}

impl<P> ActionPoller<P>
where
    P: VolumeProvider + ?Sized,
{
    pub fn new(provider: Arc<P>, policy: PollPolicy) -> Self {
        Self { provider, policy }
    }

    /// Block until `action` is `completed` (returning its final state) or
    /// `errored`, the poll timeout elapses, or `cancel` fires.
    ///
    /// An action that is already terminal when handed in is reported without
    /// another status read.  Failed status reads are tolerated up to
    /// [`PollPolicy::max_transport_errors`] in a row.
    #[instrument(skip(self, cancel, action), fields(action_id = %action.id, kind = %action.kind))]
    pub async fn wait_for_completion(
        &self,
        cancel: &CancellationToken,
        action: &ProviderAction,
    ) -> Result<ProviderAction, PollError> {
        let start = Instant::now();
        let deadline = deadline_after(start, self.policy.timeout);
        let max_failures = self.policy.max_transport_errors.max(1);
        let mut current = action.clone();
        let mut failures = 0u32;

        loop {
            match current.status {
                ActionStatus::Completed => {
                    debug!(elapsed_ms = start.elapsed().as_millis() as u64, "action completed");
                    return Ok(current);
                }
                ActionStatus::Errored => {
                    return Err(PollError::Errored {
                        action_id: current.id,
                        reason: current
                            .failure_reason
                            .unwrap_or_else(|| "provider gave no reason".to_owned()),
                    });
                }
                ActionStatus::InProgress => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PollError::Timeout {
                    action_id: action.id,
                    elapsed: now - start,
                    last_status: current.status,
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollError::Cancelled { action_id: action.id }),
                _ = tokio::time::sleep(self.policy.interval.min(deadline - now)) => {}
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollError::Cancelled { action_id: action.id }),
                res = tokio::time::timeout(remaining, self.provider.get_action(action.id)) => res,
            };

            match read {
                Ok(Ok(latest)) => {
                    failures = 0;
                    current = latest;
                }
                Ok(Err(e)) => {
                    failures += 1;
                    if failures >= max_failures {
                        return Err(PollError::Transport {
                            attempts: failures,
                            source: e,
                        });
                    }
                    warn!(error = %e, failures, "failed to read action status, will retry");
                }
                // Status read outlived the deadline; the check at the top of
                // the loop reports the timeout.
                Err(_) => {}
            }
        }
    }
}
