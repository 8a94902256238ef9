//! Attachment reconciler.
//!
//! Composes the inspector, the conflict-retrying submit loop and the action
//! poller into the three operations callers use:
//!
//! * [`Reconciler::ensure_attached`] — read, and attach only if needed.
//! * [`Reconciler::detect_drift`] — read-only comparison against the intent.
//! * [`Reconciler::ensure_detached`] — detach unconditionally; the provider
//!   treats a redundant detach as a no-op.
//!
//! Within one call the submit returns an action before polling starts, and
//! polling finishes before the result is reported.  Nothing is shared
//! between calls: each one re-reads the provider.  Concurrent calls for the
//! same volume are not serialized here.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ReconcileConfig;
use crate::error::{AttachError, ProviderError};
use crate::inspector::{AttachmentInspector, AttachmentState};
use crate::message::{ReconcileOutcome, ReconcileRequest};
use crate::poller::ActionPoller;
use crate::provider::VolumeProvider;
use crate::retry::{classify, retry_on_conflict};
use crate::types::{ActionKind, AttachmentIntent, NodeId, ProviderAction};

/// Successful result of [`Reconciler::ensure_attached`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachOutcome {
    /// The volume was already attached to the node; nothing was submitted.
    AlreadySatisfied,
    /// An attach action was submitted and completed.
    Attached,
}

/// Result of [`Reconciler::detect_drift`].
///
/// The verdicts follow the same first-entry rule as
/// [`Reconciler::ensure_attached`], so a caller that forgets the attachment
/// on [`DriftVerdict::Drifted`] and re-creates it will not be told
/// "already satisfied" by the next call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict")]
pub enum DriftVerdict {
    /// The volume is attached to the intended node and nothing else.
    InSync,
    /// The provider lists several nodes and the intended node is the first
    /// of them. Not drift, but an anomaly the caller should look at.
    MultiAttached { observed: Vec<NodeId> },
    /// The volume exists but is detached or its first attachment is another
    /// node; the caller should forget the attachment.
    Drifted { observed: Vec<NodeId> },
    /// The volume no longer exists.
    Gone,
}

impl DriftVerdict {
    /// The attachment no longer matches and should be forgotten.
    pub fn drift_detected(&self) -> bool {
        matches!(self, Self::Drifted { .. })
    }

    /// The volume itself is gone.
    pub fn gone_entirely(&self) -> bool {
        matches!(self, Self::Gone)
    }
}

/// Converges one (volume, node) attachment at a time against a provider.
pub struct Reconciler<P: ?Sized> {
    provider: Arc<P>,
    inspector: AttachmentInspector<P>,
    poller: ActionPoller<P>,
    config: ReconcileConfig,
}

impl<P> Reconciler<P>
where
    P: VolumeProvider + ?Sized,
{
    /// Build a reconciler whose inspector and poller share `provider`.
    pub fn new(provider: Arc<P>, config: ReconcileConfig) -> Self {
        Self {
            inspector: AttachmentInspector::new(Arc::clone(&provider)),
            poller: ActionPoller::new(Arc::clone(&provider), config.poll.clone()),
            provider,
            config,
        }
    }

    /// Settings the reconciler was built with.
    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Make sure the volume is attached to the node.
    ///
    /// Issues no mutating call when the volume's first attachment is already
    /// the target node, so repeating the call after a success is free.
    #[instrument(skip(self, cancel), fields(volume_id = %intent.volume_id, node_id = %intent.node_id))]
    pub async fn ensure_attached(
        &self,
        cancel: &CancellationToken,
        intent: &AttachmentIntent,
    ) -> Result<AttachOutcome, AttachError> {
        let inspection = self
            .inspector
            .inspect(&intent.volume_id)
            .await
            .map_err(|source| AttachError::Inspect {
                intent: intent.clone(),
                source,
            })?;

        match inspection.state() {
            AttachmentState::Missing => {
                return Err(AttachError::VolumeNotFound {
                    intent: intent.clone(),
                });
            }
            AttachmentState::MultiAttached(nodes) => {
                warn!(?nodes, "volume lists several attachments, only the first is considered");
            }
            AttachmentState::Detached | AttachmentState::AttachedTo(_) => {}
        }

        if inspection.is_attached_to(intent.node_id) {
            debug!("volume already attached to node");
            return Ok(AttachOutcome::AlreadySatisfied);
        }

        self.converge(cancel, intent, ActionKind::Attach).await?;
        info!("volume attached");
        Ok(AttachOutcome::Attached)
    }

    /// Compare provider state against the intent without changing anything.
    #[instrument(skip(self), fields(volume_id = %intent.volume_id, node_id = %intent.node_id))]
    pub async fn detect_drift(&self, intent: &AttachmentIntent) -> Result<DriftVerdict, AttachError> {
        let inspection = self
            .inspector
            .inspect(&intent.volume_id)
            .await
            .map_err(|source| AttachError::Inspect {
                intent: intent.clone(),
                source,
            })?;

        let verdict = match inspection.state() {
            AttachmentState::Missing => DriftVerdict::Gone,
            AttachmentState::AttachedTo(node) if node == intent.node_id => DriftVerdict::InSync,
            AttachmentState::MultiAttached(nodes) if inspection.is_attached_to(intent.node_id) => {
                warn!(?nodes, "volume lists several attachments, first one matches");
                DriftVerdict::MultiAttached { observed: nodes }
            }
            AttachmentState::MultiAttached(nodes) => {
                warn!(?nodes, "volume lists several attachments, first one differs");
                DriftVerdict::Drifted { observed: nodes }
            }
            AttachmentState::AttachedTo(_) | AttachmentState::Detached => DriftVerdict::Drifted {
                observed: inspection.attached_nodes,
            },
        };

        match &verdict {
            DriftVerdict::InSync => debug!("attachment in sync"),
            DriftVerdict::MultiAttached { .. } => {}
            DriftVerdict::Gone => info!("volume gone, attachment no longer exists"),
            DriftVerdict::Drifted { observed } => {
                info!(?observed, "attachment drifted, should be forgotten")
            }
        }
        Ok(verdict)
    }

    /// Make sure the volume is not attached to the node.
    ///
    /// There is no pre-check: the provider is the only authority on whether
    /// the pair is really detached, and it acknowledges redundant detaches.
    #[instrument(skip(self, cancel), fields(volume_id = %intent.volume_id, node_id = %intent.node_id))]
    pub async fn ensure_detached(
        &self,
        cancel: &CancellationToken,
        intent: &AttachmentIntent,
    ) -> Result<(), AttachError> {
        self.converge(cancel, intent, ActionKind::Detach).await?;
        info!("volume detached");
        Ok(())
    }

    /// Run a request and fold the result into a [`ReconcileOutcome`].
    #[instrument(skip_all, fields(request = %request, volume_id = %request.intent().volume_id))]
    pub async fn dispatch(
        &self,
        cancel: &CancellationToken,
        request: ReconcileRequest,
    ) -> ReconcileOutcome {
        match request {
            ReconcileRequest::EnsureAttached(intent) => {
                match self.ensure_attached(cancel, &intent).await {
                    Ok(outcome) => ReconcileOutcome::Attached {
                        already_satisfied: outcome == AttachOutcome::AlreadySatisfied,
                    },
                    Err(e) => ReconcileOutcome::from(&e),
                }
            }
            ReconcileRequest::EnsureDetached(intent) => {
                match self.ensure_detached(cancel, &intent).await {
                    Ok(()) => ReconcileOutcome::Detached,
                    Err(e) => ReconcileOutcome::from(&e),
                }
            }
            ReconcileRequest::DetectDrift(intent) => match self.detect_drift(&intent).await {
                Ok(verdict) => ReconcileOutcome::Drift(verdict),
                Err(e) => ReconcileOutcome::from(&e),
            },
        }
    }

    /// Submit through the conflict-retrying loop, then wait for the action.
    async fn converge(
        &self,
        cancel: &CancellationToken,
        intent: &AttachmentIntent,
        kind: ActionKind,
    ) -> Result<ProviderAction, AttachError> {
        let signature = &self.config.conflict;
        let operation_name = format!("{kind} {intent}");

        let action = retry_on_conflict(
            &self.config.retry,
            cancel,
            &operation_name,
            |e| classify(signature, e),
            || self.submit(intent, kind),
        )
        .await
        .map_err(|e| AttachError::from_submit(intent, e))?;

        debug!(action_id = %action.id, %kind, "action submitted");

        self.poller
            .wait_for_completion(cancel, &action)
            .await
            .map_err(|e| AttachError::from_poll(intent, kind, e))
    }

    async fn submit(
        &self,
        intent: &AttachmentIntent,
        kind: ActionKind,
    ) -> Result<ProviderAction, ProviderError> {
        match kind {
            ActionKind::Attach => {
                debug!("attaching volume to node");
                self.provider.attach(&intent.volume_id, intent.node_id).await
            }
            ActionKind::Detach => {
                debug!("detaching volume from node");
                self.provider
                    .detach_by_node(&intent.volume_id, intent.node_id)
                    .await
            }
        }
    }
}
