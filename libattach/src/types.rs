//! Core attachment types: volumes, nodes, intents and provider actions.
//!
//! These types form the data model shared by the provider trait, the
//! reconciler and the in-memory backend.  They are all
//! [`Serialize`]/[`Deserialize`] so outcomes can be handed to callers that
//! persist or display them.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a block-storage volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a compute node (instance) a volume can be attached to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Volume snapshot
// ---------------------------------------------------------------------------

/// Snapshot of a volume as reported by the remote provider.
///
/// Fetched fresh on every call and never cached across calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// Unique volume identifier.
    pub volume_id: VolumeId,
    /// Nodes the volume is currently attached to, in provider order.
    #[serde(default)]
    pub attached_nodes: Vec<NodeId>,
}

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

/// The (volume, node) pair a caller wants attached or detached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AttachmentIntent {
    pub volume_id: VolumeId,
    pub node_id: NodeId,
}

impl AttachmentIntent {
    pub fn new(volume_id: impl Into<VolumeId>, node_id: u64) -> Self {
        Self {
            volume_id: volume_id.into(),
            node_id: NodeId(node_id),
        }
    }
}

impl fmt::Display for AttachmentIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "volume {} on node {}", self.volume_id, self.node_id)
    }
}

// ---------------------------------------------------------------------------
// Provider actions
// ---------------------------------------------------------------------------

/// Identifier of an asynchronous action submitted to the provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ActionId(pub u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a submitted action does.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Attach,
    Detach,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attach => f.write_str("attach"),
            Self::Detach => f.write_str("detach"),
        }
    }
}

/// Lifecycle status of a provider action.
///
/// Transitions are `InProgress -> Completed | Errored`; the terminal states
/// never change again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ActionStatus {
    InProgress,
    Completed,
    Errored,
}

impl ActionStatus {
    /// Parse the status string used by provider APIs.
    ///
    /// Anything that is not `completed` or `errored` is still running.
    pub fn from_provider(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "errored" => Self::Errored,
            _ => Self::InProgress,
        }
    }

    /// `completed` and `errored` never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => f.write_str("in-progress"),
            Self::Completed => f.write_str("completed"),
            Self::Errored => f.write_str("errored"),
        }
    }
}

/// A submitted asynchronous operation, observed through polling only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderAction {
    pub id: ActionId,
    pub kind: ActionKind,
    pub status: ActionStatus,
    /// Provider-reported reason, set when the action errored.
    #[serde(default)]
    pub failure_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Reconciliation bookkeeping
// ---------------------------------------------------------------------------

/// The step of a reconciliation call an error belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Reading current state from the provider.
    Inspect,
    /// Submitting the attach/detach action.
    Submit,
    /// Waiting for the submitted action to finish.
    Poll,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inspect => f.write_str("inspect"),
            Self::Submit => f.write_str("submit"),
            Self::Poll => f.write_str("poll"),
        }
    }
}

/// Per-attempt classification computed by the retry driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Success,
    Retryable,
    Fatal,
}
