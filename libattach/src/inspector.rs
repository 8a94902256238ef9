//! Attachment state inspector.
//!
//! A pure query: reads the volume from the provider and reports which nodes
//! it is attached to.  "Not found" is a valid answer, not an error.  Reads
//! are not retried here; callers wrap them in whatever policy they want.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::error::ProviderError;
use crate::provider::VolumeProvider;
use crate::types::{NodeId, VolumeId};

/// Result of reading one volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub volume_id: VolumeId,
    /// `false` when the provider has no such volume.
    pub found: bool,
    /// Attached nodes in provider order; empty when not found.
    pub attached_nodes: Vec<NodeId>,
}

/// Attachment state of a volume, as far as this crate can tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentState {
    /// The volume does not exist.
    Missing,
    /// The volume exists and is attached nowhere.
    Detached,
    /// The volume is attached to exactly one node.
    AttachedTo(NodeId),
    /// The provider lists more than one node; this is an anomaly for a
    /// single-attach volume and is not resolved here.
    MultiAttached(Vec<NodeId>),
}

impl Inspection {
    /// Classify the attachment list.
    pub fn state(&self) -> AttachmentState {
        if !self.found {
            return AttachmentState::Missing;
        }
        match self.attached_nodes.as_slice() {
            [] => AttachmentState::Detached,
            [node] => AttachmentState::AttachedTo(*node),
            nodes => AttachmentState::MultiAttached(nodes.to_vec()),
        }
    }

    /// Whether `node_id` is the first (authoritative) attachment.
    pub fn is_attached_to(&self, node_id: NodeId) -> bool {
        self.found && self.attached_nodes.first() == Some(&node_id)
    }
}

/// Reads volume attachment state through a [`VolumeProvider`].
pub struct AttachmentInspector<P: ?Sized> {
    provider: Arc<P>,
}

impl<P> AttachmentInspector<P>
where
    P: VolumeProvider + ?Sized,
{
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    /// Read the volume. A 404 yields `found = false`; any other error is
    /// returned unchanged.
    #[instrument(skip(self))]
    pub async fn inspect(&self, volume_id: &VolumeId) -> Result<Inspection, ProviderError> {
        match self.provider.get_volume(volume_id).await {
            Ok(volume) => Ok(Inspection {
                volume_id: volume.volume_id,
                found: true,
                attached_nodes: volume.attached_nodes,
            }),
            Err(e) if e.is_not_found() => {
                debug!(%volume_id, "volume not found");
                Ok(Inspection {
                    volume_id: volume_id.clone(),
                    found: false,
                    attached_nodes: Vec::new(),
                })
            }
            Err(e) => Err(e),
        }
    }
}
