//! Remote provider trait.
//!
//! The provider owns volumes and actions; this crate only reads volume
//! snapshots, submits attach/detach actions, and polls their status.
//! Credentials and endpoints live inside the implementation, which is
//! injected into the reconciler at construction.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{ActionId, NodeId, ProviderAction, Volume, VolumeId};

/// Remote block-storage API consumed by the reconciler.
#[async_trait]
pub trait VolumeProvider: Send + Sync {
    /// Fetch the current snapshot of a volume.
    ///
    /// A missing volume must be reported as [`ProviderError::Api`] with
    /// status 404 so it can be told apart from other failures.
    async fn get_volume(&self, volume_id: &VolumeId) -> Result<Volume, ProviderError>;

    /// Submit an action attaching `volume_id` to `node_id`.
    async fn attach(
        &self,
        volume_id: &VolumeId,
        node_id: NodeId,
    ) -> Result<ProviderAction, ProviderError>;

    /// Submit an action detaching `volume_id` from `node_id`.
    async fn detach_by_node(
        &self,
        volume_id: &VolumeId,
        node_id: NodeId,
    ) -> Result<ProviderAction, ProviderError>;

    /// Read the current state of a previously submitted action.
    async fn get_action(&self, action_id: ActionId) -> Result<ProviderAction, ProviderError>;
}
