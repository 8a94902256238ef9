//! Reconciler configuration.
//!
//! Defaults match what the provider tolerates in practice: a 5 minute budget
//! for getting a submit past pending-event conflicts, and up to an hour for
//! the submitted action itself to finish.
//!
//! Environment variables (read by [`ReconcileConfig::from_env`]):
//! - `LIBATTACH_RETRY_TIMEOUT_SECS`: total submit retry budget. Defaults to `300`.
//! - `LIBATTACH_POLL_INTERVAL_SECS`: delay between action status reads. Defaults to `3`.
//! - `LIBATTACH_POLL_TIMEOUT_SECS`: ceiling on one action wait. Defaults to `3600`.

use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::retry::ConflictSignature;

/// Backoff and budget for the conflict-retrying submit loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Wall-clock budget measured from the first attempt.
    pub timeout: Duration,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Floor on any single delay, applied after jitter.
    pub min_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5 * 60),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            min_delay: Duration::from_millis(100),
            multiplier: 2.0,
        }
    }
}

/// Cadence and bounds for the action poller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Delay between two status reads.
    pub interval: Duration,
    /// Ceiling on a single wait.
    pub timeout: Duration,
    /// Consecutive failed status reads tolerated before giving up.
    pub max_transport_errors: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(60 * 60),
            max_transport_errors: 10,
        }
    }
}

/// Full configuration of a [`Reconciler`](crate::reconciler::Reconciler).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub retry: RetryPolicy,
    pub poll: PollPolicy,
    pub conflict: ConflictSignature,
}

impl ReconcileConfig {
    /// Defaults, overridden by any `LIBATTACH_*` variables that are set.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    /// Malformed values are logged and leave the default in place.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secs = |name: &str| {
            let raw = lookup(name)?;
            let parsed = parse_secs(&raw);
            if parsed.is_none() {
                warn!(variable = name, value = %raw, "ignoring malformed duration");
            }
            parsed
        };

        let mut config = Self::default();
        if let Some(d) = secs("LIBATTACH_RETRY_TIMEOUT_SECS") {
            config.retry.timeout = d;
        }
        if let Some(d) = secs("LIBATTACH_POLL_INTERVAL_SECS") {
            config.poll.interval = d;
        }
        if let Some(d) = secs("LIBATTACH_POLL_TIMEOUT_SECS") {
            config.poll.timeout = d;
        }
        config
    }
}

fn parse_secs(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}
