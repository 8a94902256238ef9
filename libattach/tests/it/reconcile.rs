//! Reconciler integration tests against the in-memory provider.
//!
//! Time is paused so the 5 minute submit budget and the poll interval run
//! instantly and deterministically.

use std::time::Duration;

use libattach::backend::memory::InMemoryProvider;
use libattach::{
    AttachError, AttachOutcome, AttachmentIntent, DriftVerdict, NodeId, Phase, ProviderError,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::common::Fixture;

#[tokio::test(start_paused = true)]
async fn ensure_attached_is_idempotent() {
    let fx = Fixture::new(InMemoryProvider::new());
    fx.provider.insert_volume("vol-1", &[200]);
    let intent = AttachmentIntent::new("vol-1", 200);
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        let outcome = fx
            .reconciler
            .ensure_attached(&cancel, &intent)
            .await
            .expect("attach");
        assert_eq!(outcome, AttachOutcome::AlreadySatisfied);
    }
    assert_eq!(fx.provider.volume_reads(), 3);
    assert_eq!(fx.provider.mutation_calls(), 0);
    assert_eq!(fx.provider.action_reads(), 0);
}

#[tokio::test(start_paused = true)]
async fn attach_moves_volume_to_target_node() {
    let fx = Fixture::new(InMemoryProvider::new().with_action_latency(2));
    fx.provider.insert_volume("vol-1", &[100]);

    let outcome = fx
        .reconciler
        .ensure_attached(&CancellationToken::new(), &AttachmentIntent::new("vol-1", 200))
        .await
        .expect("attach");

    assert_eq!(outcome, AttachOutcome::Attached);
    assert_eq!(fx.provider.attach_calls(), 1);
    assert_eq!(fx.provider.action_reads(), 2);
    assert_eq!(
        fx.provider.attached_nodes(&"vol-1".into()),
        Some(vec![NodeId(200)])
    );
}

#[tokio::test(start_paused = true)]
async fn attach_absorbs_pending_event_conflicts() {
    let fx = Fixture::new(InMemoryProvider::new());
    fx.provider.insert_volume("vol-1", &[]);
    fx.provider.set_pending_conflicts(3);

    let outcome = fx
        .reconciler
        .ensure_attached(&CancellationToken::new(), &AttachmentIntent::new("vol-1", 7))
        .await
        .expect("attach");

    assert_eq!(outcome, AttachOutcome::Attached);
    assert_eq!(fx.provider.attach_calls(), 4);
    assert_eq!(
        fx.provider.attached_nodes(&"vol-1".into()),
        Some(vec![NodeId(7)])
    );
}

#[tokio::test(start_paused = true)]
async fn attach_fatal_error_makes_one_call() {
    let fx = Fixture::new(InMemoryProvider::new());
    fx.provider.insert_volume("vol-1", &[]);
    fx.provider
        .fail_mutations(ProviderError::api(422, "volume is in a different region"));

    let err = fx
        .reconciler
        .ensure_attached(&CancellationToken::new(), &AttachmentIntent::new("vol-1", 7))
        .await
        .expect_err("fatal");

    assert!(matches!(err, AttachError::Fatal { phase: Phase::Submit, .. }));
    assert_eq!(err.intent(), &AttachmentIntent::new("vol-1", 7));
    assert_eq!(fx.provider.attach_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn attach_read_failure_blocks_mutation() {
    let fx = Fixture::new(InMemoryProvider::new());
    fx.provider.insert_volume("vol-1", &[]);
    fx.provider
        .fail_reads(ProviderError::transport("connection refused"));

    let err = fx
        .reconciler
        .ensure_attached(&CancellationToken::new(), &AttachmentIntent::new("vol-1", 7))
        .await
        .expect_err("read failure");

    assert!(matches!(err, AttachError::Inspect { .. }));
    assert_eq!(fx.provider.mutation_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn submit_gives_up_after_five_minutes() {
    let fx = Fixture::new(InMemoryProvider::new());
    fx.provider.insert_volume("vol-1", &[]);
    fx.provider.set_pending_conflicts(u32::MAX);
    let start = Instant::now();

    let err = fx
        .reconciler
        .ensure_detached(&CancellationToken::new(), &AttachmentIntent::new("vol-1", 7))
        .await
        .expect_err("timeout");

    assert!(err.is_timeout());
    assert_eq!(err.phase(), Phase::Submit);
    assert!(err.to_string().contains("pending event"));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(300));
    assert!(elapsed < Duration::from_secs(301));

    let calls = fx.provider.detach_calls();
    assert!(calls > 1);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(fx.provider.detach_calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_backoff_is_reported_as_cancelled() {
    let fx = Fixture::new(InMemoryProvider::new());
    fx.provider.insert_volume("vol-1", &[]);
    fx.provider.set_pending_conflicts(u32::MAX);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(20)).await;
        trigger.cancel();
    });

    let err = fx
        .reconciler
        .ensure_attached(&cancel, &AttachmentIntent::new("vol-1", 7))
        .await
        .expect_err("cancelled");

    assert!(err.is_cancelled());
    assert!(!err.is_timeout());
    assert_eq!(err.phase(), Phase::Submit);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_poll_is_reported_as_cancelled() {
    let fx = Fixture::new(InMemoryProvider::new().with_action_latency(u32::MAX));
    fx.provider.insert_volume("vol-1", &[]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        trigger.cancel();
    });

    let err = fx
        .reconciler
        .ensure_attached(&cancel, &AttachmentIntent::new("vol-1", 7))
        .await
        .expect_err("cancelled");

    assert!(err.is_cancelled());
    assert_eq!(err.phase(), Phase::Poll);
    assert_eq!(fx.provider.attach_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn poll_transport_failures_are_fatal_once_exhausted() {
    let fx = Fixture::new(InMemoryProvider::new().with_action_latency(5));
    fx.provider.insert_volume("vol-1", &[]);
    fx.provider
        .fail_action_reads(u32::MAX, ProviderError::transport("timed out"));

    let err = fx
        .reconciler
        .ensure_attached(&CancellationToken::new(), &AttachmentIntent::new("vol-1", 7))
        .await
        .expect_err("poll failure");

    assert!(matches!(err, AttachError::Fatal { phase: Phase::Poll, .. }));
    let max = fx.reconciler.config().poll.max_transport_errors;
    assert_eq!(fx.provider.action_reads(), max);
}

#[tokio::test(start_paused = true)]
async fn drift_when_volume_removed() {
    let fx = Fixture::new(InMemoryProvider::new());

    let verdict = fx
        .reconciler
        .detect_drift(&AttachmentIntent::new("vol-1", 200))
        .await
        .expect("verdict");

    assert_eq!(verdict, DriftVerdict::Gone);
    assert!(verdict.gone_entirely());
    assert_eq!(fx.provider.mutation_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn drift_when_reattached_elsewhere() {
    let fx = Fixture::new(InMemoryProvider::new());
    fx.provider.insert_volume("vol-1", &[300]);

    let verdict = fx
        .reconciler
        .detect_drift(&AttachmentIntent::new("vol-1", 200))
        .await
        .expect("verdict");

    assert!(verdict.drift_detected());
    assert!(!verdict.gone_entirely());
    assert_eq!(
        verdict,
        DriftVerdict::Drifted {
            observed: vec![NodeId(300)]
        }
    );
    assert_eq!(fx.provider.mutation_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn no_drift_when_attached_as_intended() {
    let fx = Fixture::new(InMemoryProvider::new());
    fx.provider.insert_volume("vol-1", &[200]);

    let verdict = fx
        .reconciler
        .detect_drift(&AttachmentIntent::new("vol-1", 200))
        .await
        .expect("verdict");

    assert_eq!(verdict, DriftVerdict::InSync);
    assert!(!verdict.drift_detected());
}

#[tokio::test(start_paused = true)]
async fn drift_read_errors_are_surfaced() {
    let fx = Fixture::new(InMemoryProvider::new());
    fx.provider.insert_volume("vol-1", &[200]);
    fx.provider.fail_reads(ProviderError::api(500, "internal"));

    let err = fx
        .reconciler
        .detect_drift(&AttachmentIntent::new("vol-1", 200))
        .await
        .expect_err("read error");

    assert_eq!(err.phase(), Phase::Inspect);
}

#[tokio::test(start_paused = true)]
async fn redundant_detach_succeeds() {
    let fx = Fixture::new(InMemoryProvider::new());
    fx.provider.insert_volume("vol-1", &[]);

    fx.reconciler
        .ensure_detached(&CancellationToken::new(), &AttachmentIntent::new("vol-1", 200))
        .await
        .expect("detach");

    assert_eq!(fx.provider.detach_calls(), 1);
    assert_eq!(fx.provider.action_reads(), 0);
    assert_eq!(fx.provider.attached_nodes(&"vol-1".into()), Some(vec![]));
}

#[tokio::test(start_paused = true)]
async fn attach_then_detach_round_trip() {
    let fx = Fixture::new(InMemoryProvider::new().with_action_latency(1));
    fx.provider.insert_volume("vol-1", &[]);
    let intent = AttachmentIntent::new("vol-1", 42);
    let cancel = CancellationToken::new();

    fx.reconciler
        .ensure_attached(&cancel, &intent)
        .await
        .expect("attach");
    assert_eq!(
        fx.reconciler.detect_drift(&intent).await.expect("verdict"),
        DriftVerdict::InSync
    );

    fx.reconciler
        .ensure_detached(&cancel, &intent)
        .await
        .expect("detach");
    assert_eq!(fx.provider.attached_nodes(&intent.volume_id), Some(vec![]));
    assert!(
        fx.reconciler
            .detect_drift(&intent)
            .await
            .expect("verdict")
            .drift_detected()
    );
}

#[tokio::test(start_paused = true)]
async fn drift_notices_volume_destroyed_between_calls() {
    let fx = Fixture::new(InMemoryProvider::new());
    fx.provider.insert_volume("vol-1", &[200]);
    let intent = AttachmentIntent::new("vol-1", 200);

    assert_eq!(
        fx.reconciler.detect_drift(&intent).await.expect("verdict"),
        DriftVerdict::InSync
    );

    fx.provider.remove_volume(&intent.volume_id);

    let verdict = fx.reconciler.detect_drift(&intent).await.expect("verdict");
    assert!(verdict.gone_entirely());
    assert!(!verdict.drift_detected());
    assert_eq!(fx.provider.volume_reads(), 2);
}
