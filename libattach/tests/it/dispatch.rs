use libattach::backend::memory::InMemoryProvider;
use libattach::message::FailureKind;
use libattach::{
    AttachmentIntent, DriftVerdict, Phase, ProviderError, ReconcileOutcome, ReconcileRequest,
};
use tokio_util::sync::CancellationToken;

use crate::common::Fixture;

#[tokio::test(start_paused = true)]
async fn dispatch_reports_each_operation() {
    let fx = Fixture::new(InMemoryProvider::new());
    fx.provider.insert_volume("vol-1", &[100]);
    let cancel = CancellationToken::new();
    let intent = AttachmentIntent::new("vol-1", 200);

    let drift = fx
        .reconciler
        .dispatch(&cancel, ReconcileRequest::DetectDrift(intent.clone()))
        .await;
    assert!(matches!(drift, ReconcileOutcome::Drift(DriftVerdict::Drifted { .. })));

    let attached = fx
        .reconciler
        .dispatch(&cancel, ReconcileRequest::EnsureAttached(intent.clone()))
        .await;
    assert_eq!(
        attached,
        ReconcileOutcome::Attached {
            already_satisfied: false
        }
    );

    let again = fx
        .reconciler
        .dispatch(&cancel, ReconcileRequest::EnsureAttached(intent.clone()))
        .await;
    assert_eq!(
        again,
        ReconcileOutcome::Attached {
            already_satisfied: true
        }
    );

    let detached = fx
        .reconciler
        .dispatch(&cancel, ReconcileRequest::EnsureDetached(intent))
        .await;
    assert_eq!(detached, ReconcileOutcome::Detached);
    assert_eq!(fx.provider.mutation_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn dispatch_folds_failures() {
    let fx = Fixture::new(InMemoryProvider::new());
    fx.provider.insert_volume("vol-1", &[]);
    fx.provider
        .fail_mutations(ProviderError::api(401, "Unable to authenticate you"));

    let outcome = fx
        .reconciler
        .dispatch(
            &CancellationToken::new(),
            ReconcileRequest::EnsureDetached(AttachmentIntent::new("vol-1", 5)),
        )
        .await;

    assert!(!outcome.is_success());
    match outcome {
        ReconcileOutcome::Failed {
            phase,
            kind,
            message,
        } => {
            assert_eq!(phase, Phase::Submit);
            assert_eq!(kind, FailureKind::Fatal);
            assert!(message.contains("volume vol-1 on node 5"));
            assert!(message.contains("401"));
        }
        other => panic!("expected failure, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn dispatch_outcome_is_json_friendly() {
    let fx = Fixture::new(InMemoryProvider::new());

    let outcome = fx
        .reconciler
        .dispatch(
            &CancellationToken::new(),
            ReconcileRequest::DetectDrift(AttachmentIntent::new("vol-gone", 1)),
        )
        .await;

    let json = serde_json::to_string(&outcome).expect("serialize");
    assert_eq!(json, r#"{"outcome":"drift","verdict":"gone"}"#);
    let de: ReconcileOutcome = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(de, outcome);
}
