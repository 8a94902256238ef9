//! Attachment error types.
//!
//! Failures are layered the same way the calls are:
//!
//! * [`ProviderError`] — what the remote provider (or the link to it)
//!   reported for a single call.
//! * [`RetryError`] — outcome of the conflict-retrying submit loop.
//! * [`PollError`] — outcome of waiting on a provider action.
//! * [`AttachError`] — what a reconciliation call surfaces to its caller,
//!   always tagged with the intent and the phase that failed.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ActionId, ActionKind, ActionStatus, AttachmentIntent, Phase};

/// HTTP status a provider uses for "no such resource".
pub const STATUS_NOT_FOUND: u16 = 404;

/// Error returned by a single remote provider call.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {message}")]
    Api {
        /// HTTP-equivalent status code.
        status: u16,
        /// Provider-supplied message.
        message: String,
    },

    /// The request never produced a provider answer.
    #[error("transport error: {0}")]
    Transport(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Create a [`ProviderError::Api`] from a status and message.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a [`ProviderError::Transport`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    /// Status code, when the provider answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport(_) | Self::Internal(_) => None,
        }
    }

    /// Provider message, when the provider answered at all.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Api { message, .. } => Some(message),
            Self::Transport(_) | Self::Internal(_) => None,
        }
    }

    /// The provider reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(STATUS_NOT_FOUND)
    }
}

/// Failure of the conflict-retrying submit loop.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The operation failed with an error that is not worth retrying.
    #[error("non-retryable error on attempt {attempts}: {source}")]
    Fatal {
        attempts: u32,
        #[source]
        source: E,
    },

    /// The retry budget ran out while the operation kept conflicting.
    #[error("gave up after {attempts} attempts in {elapsed:?}")]
    Timeout {
        elapsed: Duration,
        attempts: u32,
        /// Last retryable error observed, if any attempt completed.
        last: Option<E>,
    },

    /// The caller cancelled while the loop was waiting.
    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Failure while waiting for a provider action to finish.
#[derive(Debug, Error)]
pub enum PollError {
    /// The provider reports the action itself failed.
    #[error("action {action_id} errored: {reason}")]
    Errored { action_id: ActionId, reason: String },

    /// Status could not be read too many times in a row.
    #[error("action status unavailable after {attempts} consecutive failures: {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    /// The action did not reach a terminal state in time.
    #[error("action {action_id} still {last_status} after {elapsed:?}")]
    Timeout {
        action_id: ActionId,
        elapsed: Duration,
        last_status: ActionStatus,
    },

    /// The caller cancelled while the poller was waiting.
    #[error("wait for action {action_id} cancelled")]
    Cancelled { action_id: ActionId },
}

/// Error surfaced by a reconciliation call.
///
/// Every variant names the intent so callers can log it without another
/// lookup.
#[derive(Debug, Error)]
pub enum AttachError {
    /// Reading the volume failed for a reason other than "not found".
    #[error("error retrieving volume for {intent}: {source}")]
    Inspect {
        intent: AttachmentIntent,
        #[source]
        source: ProviderError,
    },

    /// The volume to attach does not exist.
    #[error("volume {} not found, cannot attach to node {}", .intent.volume_id, .intent.node_id)]
    VolumeNotFound { intent: AttachmentIntent },

    /// A non-retryable provider error during submit or poll.
    #[error("{phase} failed for {intent}: {source}")]
    Fatal {
        intent: AttachmentIntent,
        phase: Phase,
        #[source]
        source: ProviderError,
    },

    /// The provider accepted the action and then reported it errored.
    #[error("{kind} action {action_id} for {intent} errored: {reason}")]
    ActionErrored {
        intent: AttachmentIntent,
        kind: ActionKind,
        action_id: ActionId,
        reason: String,
    },

    /// A retry or poll budget was exhausted.
    #[error("{phase} for {intent} timed out after {elapsed:?}{}", fmt_cause(.cause))]
    Timeout {
        intent: AttachmentIntent,
        phase: Phase,
        elapsed: Duration,
        /// Last underlying cause observed before giving up.
        cause: Option<String>,
    },

    /// The caller cancelled while the call was suspended.
    #[error("{phase} for {intent} cancelled")]
    Cancelled {
        intent: AttachmentIntent,
        phase: Phase,
    },
}

fn fmt_cause(cause: &Option<String>) -> String {
    match cause {
        Some(c) => format!(": {c}"),
        None => String::new(),
    }
}

impl AttachError {
    /// The (volume, node) pair the failed call was about.
    pub fn intent(&self) -> &AttachmentIntent {
        match self {
            Self::Inspect { intent, .. }
            | Self::VolumeNotFound { intent }
            | Self::Fatal { intent, .. }
            | Self::ActionErrored { intent, .. }
            | Self::Timeout { intent, .. }
            | Self::Cancelled { intent, .. } => intent,
        }
    }

    /// Step of the call that failed.
    pub fn phase(&self) -> Phase {
        match self {
            Self::Inspect { .. } | Self::VolumeNotFound { .. } => Phase::Inspect,
            Self::ActionErrored { .. } => Phase::Poll,
            Self::Fatal { phase, .. } | Self::Timeout { phase, .. } | Self::Cancelled { phase, .. } => {
                *phase
            }
        }
    }

    /// A retry or poll budget ran out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The caller's cancellation token fired.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Map a submit-loop failure onto the caller-facing taxonomy.
    pub(crate) fn from_submit(intent: &AttachmentIntent, err: RetryError<ProviderError>) -> Self {
        match err {
            RetryError::Fatal { source, .. } => Self::Fatal {
                intent: intent.clone(),
                phase: Phase::Submit,
                source,
            },
            RetryError::Timeout { elapsed, last, .. } => Self::Timeout {
                intent: intent.clone(),
                phase: Phase::Submit,
                elapsed,
                cause: last.map(|e| e.to_string()),
            },
            RetryError::Cancelled { .. } => Self::Cancelled {
                intent: intent.clone(),
                phase: Phase::Submit,
            },
        }
    }

    /// Map a poll failure onto the caller-facing taxonomy.
    pub(crate) fn from_poll(intent: &AttachmentIntent, kind: ActionKind, err: PollError) -> Self {
        match err {
            PollError::Errored { action_id, reason } => Self::ActionErrored {
                intent: intent.clone(),
                kind,
                action_id,
                reason,
            },
            PollError::Transport { source, .. } => Self::Fatal {
                intent: intent.clone(),
                phase: Phase::Poll,
                source,
            },
            e @ PollError::Timeout { elapsed, .. } => Self::Timeout {
                intent: intent.clone(),
                phase: Phase::Poll,
                elapsed,
                cause: Some(e.to_string()),
            },
            PollError::Cancelled { .. } => Self::Cancelled {
                intent: intent.clone(),
                phase: Phase::Poll,
            },
        }
    }
}
