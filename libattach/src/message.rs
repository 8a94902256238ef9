//! Request and outcome envelope for reconciliation calls.
//!
//! [`ReconcileRequest`] names one operation on one intent; the
//! [`Reconciler`](crate::reconciler::Reconciler) answers with a
//! [`ReconcileOutcome`] that separates success, the drift verdict, and
//! failures (with their phase), so a declarative loop or CLI can record or
//! print the result without matching on [`AttachError`].

use serde::{Deserialize, Serialize};

use crate::error::AttachError;
use crate::reconciler::DriftVerdict;
use crate::types::{AttachmentIntent, Phase};

/// One reconciliation call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum ReconcileRequest {
    EnsureAttached(AttachmentIntent),
    EnsureDetached(AttachmentIntent),
    DetectDrift(AttachmentIntent),
}

impl ReconcileRequest {
    /// The (volume, node) pair the request is about.
    pub fn intent(&self) -> &AttachmentIntent {
        match self {
            Self::EnsureAttached(intent)
            | Self::EnsureDetached(intent)
            | Self::DetectDrift(intent) => intent,
        }
    }
}

impl std::fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EnsureAttached(intent) => write!(f, "EnsureAttached({intent})"),
            Self::EnsureDetached(intent) => write!(f, "EnsureDetached({intent})"),
            Self::DetectDrift(intent) => write!(f, "DetectDrift({intent})"),
        }
    }
}

/// Broad class of a failed call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A provider error that retrying would not fix.
    Fatal,
    /// A retry or poll budget ran out.
    Timeout,
    /// The caller cancelled.
    Cancelled,
}

/// Result of a [`ReconcileRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ReconcileOutcome {
    /// The volume is attached; `already_satisfied` means nothing was submitted.
    Attached { already_satisfied: bool },
    /// The detach completed (or was a provider-side no-op).
    Detached,
    /// Drift check verdict.
    Drift(DriftVerdict),
    /// The call failed.
    Failed {
        phase: Phase,
        kind: FailureKind,
        message: String,
    },
}

impl ReconcileOutcome {
    /// Everything except [`ReconcileOutcome::Failed`].
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

impl From<&AttachError> for ReconcileOutcome {
    fn from(err: &AttachError) -> Self {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else if err.is_cancelled() {
            FailureKind::Cancelled
        } else {
            FailureKind::Fatal
        };
        Self::Failed {
            phase: err.phase(),
            kind,
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Attached { already_satisfied: true } => f.write_str("Attached(already satisfied)"),
            Self::Attached { already_satisfied: false } => f.write_str("Attached"),
            Self::Detached => f.write_str("Detached"),
            Self::Drift(DriftVerdict::InSync) => f.write_str("Drift(in sync)"),
            Self::Drift(DriftVerdict::Gone) => f.write_str("Drift(gone)"),
            Self::Drift(DriftVerdict::MultiAttached { observed }) => {
                write!(f, "Drift(multi-attached, observed={observed:?})")
            }
            Self::Drift(DriftVerdict::Drifted { observed }) => {
                write!(f, "Drift(drifted, observed={observed:?})")
            }
            Self::Failed { phase, kind, message } => {
                write!(f, "Failed({kind:?} in {phase}: {message})")
            }
        }
    }
}
