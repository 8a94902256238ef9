//! # libattach — volume attachment reconciliation for RK8s
//!
//! `libattach` converges the attachment between one block-storage volume and
//! one compute node to the state a caller asks for.  It tolerates the
//! provider's transient "pending event" conflicts, waits for the provider's
//! asynchronous actions to finish, and detects when the attachment was
//! changed behind its back.  It follows the RK8s conventions (Tokio async
//! runtime, `tracing` for observability, `thiserror` for structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `VolumeId`, `NodeId`, `Volume`, intents and actions. |
//! | [`error`] | [`ProviderError`], [`RetryError`], [`PollError`], [`AttachError`]. |
//! | [`provider`] | [`VolumeProvider`] trait — the remote block-storage API. |
//! | [`inspector`] | Read current attachments; "not found" is a state. |
//! | [`retry`] | Conflict classification and the bounded retry loop. |
//! | [`poller`] | Wait for a provider action to reach a terminal status. |
//! | [`reconciler`] | [`Reconciler`] — ensure attached, detect drift, ensure detached. |
//! | [`message`] | [`ReconcileRequest`] / [`ReconcileOutcome`] envelope. |
//! | [`config`] | [`ReconcileConfig`] with `LIBATTACH_*` environment overrides. |
//! | [`backend`] | Provider implementations (in-memory). |

pub mod backend;
pub mod config;
pub mod error;
pub mod inspector;
pub mod message;
pub mod poller;
pub mod provider;
pub mod reconciler;
pub mod retry;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use config::ReconcileConfig;
pub use error::{AttachError, PollError, ProviderError, RetryError};
pub use message::{ReconcileOutcome, ReconcileRequest};
pub use provider::VolumeProvider;
pub use reconciler::{AttachOutcome, DriftVerdict, Reconciler};
pub use types::*;
