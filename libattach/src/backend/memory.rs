//! In-memory provider backend.
//!
//! [`InMemoryProvider`] implements [`VolumeProvider`] against process-local
//! maps.  It behaves like a real block-storage API closely enough to drive
//! the reconciler end to end: actions take a configurable number of status
//! reads to finish, attach/detach only change volume state once their action
//! completes, and faults (pending-event conflicts, hard errors, flaky status
//! reads, errored actions) can be injected at runtime.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, instrument};

use crate::error::ProviderError;
use crate::provider::VolumeProvider;
use crate::types::*;

/// Message the provider attaches to a pending-event conflict.
pub const PENDING_EVENT_MESSAGE: &str = "Node already has a pending event.";

/// Status code used for a pending-event conflict.
pub const PENDING_EVENT_STATUS: u16 = 422;

/// Volume state change an action applies when it completes.
#[derive(Debug, Clone)]
enum Effect {
    Attach(VolumeId, NodeId),
    Detach(VolumeId, NodeId),
    None,
}

#[derive(Debug)]
struct ActionRecord {
    action: ProviderAction,
    /// Status reads left before the action finishes.
    remaining_reads: u32,
    effect: Effect,
}

#[derive(Debug, Default)]
struct Faults {
    pending_conflicts: u32,
    mutation_error: Option<ProviderError>,
    read_error: Option<ProviderError>,
    action_read_failures: u32,
    action_read_error: Option<ProviderError>,
    action_failure: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    volume_reads: AtomicU32,
    attach_calls: AtomicU32,
    detach_calls: AtomicU32,
    action_reads: AtomicU32,
}

/// Fake remote provider backed by concurrent maps.
///
/// # Thread safety
///
/// Volume and action state live in [`DashMap`]s; injected faults sit behind a
/// single mutex that is never held across an `.await`.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    volumes: DashMap<VolumeId, Volume>,
    actions: DashMap<ActionId, ActionRecord>,
    next_action: AtomicU64,
    /// Status reads an action needs before it completes; `0` means actions
    /// are returned already completed.
    action_latency: u32,
    faults: Mutex<Faults>,
    counters: Counters,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every new action stay in progress for `reads` status reads.
    pub fn with_action_latency(mut self, reads: u32) -> Self {
        self.action_latency = reads;
        self
    }

    /// Create or replace a volume with the given attachments.
    pub fn insert_volume(&self, volume_id: impl Into<VolumeId>, attached: &[u64]) {
        let volume_id = volume_id.into();
        let volume = Volume {
            volume_id: volume_id.clone(),
            attached_nodes: attached.iter().copied().map(NodeId).collect(),
        };
        self.volumes.insert(volume_id, volume);
    }

    /// Delete a volume, as if it were destroyed out of band.
    pub fn remove_volume(&self, volume_id: &VolumeId) {
        self.volumes.remove(volume_id);
    }

    /// Current attachments, or `None` when the volume does not exist.
    pub fn attached_nodes(&self, volume_id: &VolumeId) -> Option<Vec<NodeId>> {
        self.volumes
            .get(volume_id)
            .map(|v| v.attached_nodes.clone())
    }

    /// Answer the next `n` attach/detach submissions with a pending-event
    /// conflict.
    pub fn set_pending_conflicts(&self, n: u32) {
        self.faults().pending_conflicts = n;
    }

    /// Answer every attach/detach submission with `err`.
    pub fn fail_mutations(&self, err: ProviderError) {
        self.faults().mutation_error = Some(err);
    }

    /// Answer every volume read with `err`.
    pub fn fail_reads(&self, err: ProviderError) {
        self.faults().read_error = Some(err);
    }

    /// Answer the next `n` action status reads with `err`.
    pub fn fail_action_reads(&self, n: u32, err: ProviderError) {
        let mut faults = self.faults();
        faults.action_read_failures = n;
        faults.action_read_error = Some(err);
    }

    /// Make actions finish as `errored` with `reason` instead of completing.
    pub fn fail_actions(&self, reason: impl Into<String>) {
        self.faults().action_failure = Some(reason.into());
    }

    pub fn volume_reads(&self) -> u32 {
        self.counters.volume_reads.load(Ordering::SeqCst)
    }

    pub fn attach_calls(&self) -> u32 {
        self.counters.attach_calls.load(Ordering::SeqCst)
    }

    pub fn detach_calls(&self) -> u32 {
        self.counters.detach_calls.load(Ordering::SeqCst)
    }

    /// Attach plus detach submissions, conflicts included.
    pub fn mutation_calls(&self) -> u32 {
        self.attach_calls() + self.detach_calls()
    }

    pub fn action_reads(&self) -> u32 {
        self.counters.action_reads.load(Ordering::SeqCst)
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared admission path for attach and detach.
    fn admit_mutation(&self, volume_id: &VolumeId) -> Result<(), ProviderError> {
        {
            let mut faults = self.faults();
            if faults.pending_conflicts > 0 {
                faults.pending_conflicts -= 1;
                return Err(ProviderError::api(PENDING_EVENT_STATUS, PENDING_EVENT_MESSAGE));
            }
            if let Some(err) = &faults.mutation_error {
                return Err(err.clone());
            }
        }
        if !self.volumes.contains_key(volume_id) {
            return Err(not_found(volume_id));
        }
        Ok(())
    }

    fn submit(&self, kind: ActionKind, effect: Effect) -> ProviderAction {
        let id = ActionId(self.next_action.fetch_add(1, Ordering::SeqCst) + 1);
        let mut record = ActionRecord {
            action: ProviderAction {
                id,
                kind,
                status: ActionStatus::InProgress,
                failure_reason: None,
            },
            remaining_reads: self.action_latency,
            effect,
        };
        if record.remaining_reads == 0 {
            self.finish(&mut record);
        }
        let action = record.action.clone();
        self.actions.insert(id, record);
        debug!(action_id = %id, %kind, status = %action.status, "action submitted");
        action
    }

    /// Move an action to its terminal state and apply its effect.
    fn finish(&self, record: &mut ActionRecord) {
        if let Some(reason) = self.faults().action_failure.clone() {
            record.action.status = ActionStatus::Errored;
            record.action.failure_reason = Some(reason);
            return;
        }
        record.action.status = ActionStatus::Completed;
        match &record.effect {
            Effect::Attach(volume_id, node_id) => {
                if let Some(mut vol) = self.volumes.get_mut(volume_id) {
                    vol.attached_nodes = vec![*node_id];
                }
            }
            Effect::Detach(volume_id, node_id) => {
                if let Some(mut vol) = self.volumes.get_mut(volume_id) {
                    vol.attached_nodes.retain(|n| n != node_id);
                }
            }
            Effect::None => {}
        }
        info!(action_id = %record.action.id, kind = %record.action.kind, "action completed");
    }
}

fn not_found(volume_id: &VolumeId) -> ProviderError {
    ProviderError::api(
        crate::error::STATUS_NOT_FOUND,
        format!("volume {volume_id} not found"),
    )
}

// ---------------------------------------------------------------------------
// VolumeProvider
// ---------------------------------------------------------------------------

#[async_trait]
impl VolumeProvider for InMemoryProvider {
    async fn get_volume(&self, volume_id: &VolumeId) -> Result<Volume, ProviderError> {
        self.counters.volume_reads.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.faults().read_error {
            return Err(err.clone());
        }
        self.volumes
            .get(volume_id)
            .map(|v| v.clone())
            .ok_or_else(|| not_found(volume_id))
    }

    #[instrument(skip(self))]
    async fn attach(
        &self,
        volume_id: &VolumeId,
        node_id: NodeId,
    ) -> Result<ProviderAction, ProviderError> {
        self.counters.attach_calls.fetch_add(1, Ordering::SeqCst);
        self.admit_mutation(volume_id)?;
        Ok(self.submit(
            ActionKind::Attach,
            Effect::Attach(volume_id.clone(), node_id),
        ))
    }

    #[instrument(skip(self))]
    async fn detach_by_node(
        &self,
        volume_id: &VolumeId,
        node_id: NodeId,
    ) -> Result<ProviderAction, ProviderError> {
        self.counters.detach_calls.fetch_add(1, Ordering::SeqCst);
        self.admit_mutation(volume_id)?;

        // Detaching a pair that is not attached is a no-op that still yields
        // an action, the way real providers acknowledge redundant detaches.
        let attached = self
            .volumes
            .get(volume_id)
            .is_some_and(|v| v.attached_nodes.contains(&node_id));
        let effect = if attached {
            Effect::Detach(volume_id.clone(), node_id)
        } else {
            debug!(%volume_id, %node_id, "volume not attached to node, detach is a no-op");
            Effect::None
        };
        Ok(self.submit(ActionKind::Detach, effect))
    }

    async fn get_action(&self, action_id: ActionId) -> Result<ProviderAction, ProviderError> {
        self.counters.action_reads.fetch_add(1, Ordering::SeqCst);
        {
            let mut faults = self.faults();
            if faults.action_read_failures > 0 {
                faults.action_read_failures -= 1;
                if let Some(err) = &faults.action_read_error {
                    return Err(err.clone());
                }
            }
        }

        let Some(mut record) = self.actions.get_mut(&action_id) else {
            return Err(ProviderError::api(
                crate::error::STATUS_NOT_FOUND,
                format!("action {action_id} not found"),
            ));
        };
        if !record.action.status.is_terminal() {
            record.remaining_reads = record.remaining_reads.saturating_sub(1);
            if record.remaining_reads == 0 {
                self.finish(&mut record);
            }
        }
        Ok(record.action.clone())
    }
}
