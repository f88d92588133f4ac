//! Capture fidelity and replay equality
//!
//! A recorded run is ground truth for later analysis. Replaying an
//! artifact must reproduce the exact step and hash sequence the recorder
//! wrote, previews and parameter changes included; a tampered artifact
//! must park the replay session in the error state instead of crashing
//! or hanging its consumers.

use std::time::Duration;

use capture::{verify_artifact, SIDECAR_FILE};
use contracts::hash_to_hex;
use tokio::time::timeout;

use session::{
    ParameterSet, QualityHint, Session, SessionConfig, SessionEvent, SessionState,
};

use crate::support::{
    paced, record_run, stepper, wait_for_event, wait_for_state, wait_for_step, SOON,
};

#[tokio::test]
async fn replaying_a_captured_run_reproduces_it_exactly() {
    let dir = tempfile::tempdir().unwrap();

    let mut session = Session::new();
    session.start(stepper(), paced(2_000.0)).unwrap();
    let mut events = session.events();

    let capture = session.capture_begin(dir.path()).await.unwrap();
    let dropped_at_begin = session.get_diagnostics().dropped_total;

    // A parameter swap partway through, recorded at its step barrier.
    wait_for_step(&session, 100).await;
    let mut params = ParameterSet::new();
    params.set("rpm", 2_400.0);
    session.update_parameters(params).await.unwrap();
    wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::ParametersApplied { .. })
    })
    .await;

    // A forward drag: previews land between here and t=0.02, then the
    // gesture settles exactly at step 215 and playback resumes.
    wait_for_step(&session, 150).await;
    session.seek(0.02, QualityHint::Coarse).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.seek(0.0215, QualityHint::Refine).await.unwrap();
    let settled =
        wait_for_event(&mut events, |e| matches!(e, SessionEvent::SeekSettled { .. })).await;
    if let SessionEvent::SeekSettled { step_index, .. } = settled {
        assert_eq!(step_index, 215);
    }

    wait_for_step(&session, 500).await;
    session.pause().await.unwrap();
    let dropped_at_end = session.get_diagnostics().dropped_total;

    let artifact = session.capture_end(capture).await.unwrap();
    session.stop().await.unwrap();

    let manifest = artifact.manifest().clone();
    let sidecar = artifact.read_sidecar().unwrap();
    assert_eq!(sidecar.len() as u64, manifest.frame_count);
    assert!(
        manifest.frame_count > 400,
        "a run to step 500 recorded only {} frames",
        manifest.frame_count
    );
    assert_eq!(manifest.parameter_updates, 1);
    assert_eq!(
        manifest.dropped_during_capture,
        dropped_at_end - dropped_at_begin,
        "the manifest drop count disagrees with live diagnostics"
    );
    assert_eq!(manifest.first_step, sidecar.first().map(|r| r.step_index));
    assert_eq!(manifest.final_step, sidecar.last().map(|r| r.step_index));
    assert!(manifest.final_step.unwrap() >= 500);
    assert!(
        sidecar.windows(2).all(|w| w[0].step_index < w[1].step_index),
        "recorded steps must be strictly increasing across a forward-only run"
    );
    assert!(
        sidecar.iter().any(|r| r.preview),
        "the coarse drag leaves preview records in the artifact"
    );

    // Replay and compare record by record.
    let mut replay = Session::new();
    let handle = replay.replay(&artifact, SessionConfig::default()).unwrap();
    let mut frames = Vec::new();
    while let Some(frame) = timeout(SOON, handle.next_frame())
        .await
        .expect("replay stream went quiet without finishing")
    {
        frames.push(frame);
    }

    assert_eq!(
        frames.len() as u64,
        manifest.frame_count,
        "replay must deliver every recorded frame"
    );
    for (frame, record) in frames.iter().zip(&sidecar) {
        assert_eq!(frame.meta.step_index, record.step_index);
        assert_eq!(
            hash_to_hex(&frame.meta.state_hash),
            record.state_hash,
            "state hash diverged at step {}",
            record.step_index
        );
        assert_eq!(frame.is_preview(), record.preview);
    }

    // The exhausted stream parks the session, it does not break it.
    wait_for_state(&replay, SessionState::Paused).await;
    assert!(replay.last_error().is_none());
    let diagnostics = replay.get_diagnostics();
    assert_eq!(diagnostics.dropped_total, 0, "a lossless replay never sheds");
    assert_eq!(diagnostics.produced_total, manifest.frame_count);
    replay.stop().await.unwrap();
}

#[tokio::test]
async fn a_tampered_artifact_parks_the_replay_in_error() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = record_run(dir.path(), 60).await;

    let records = artifact.read_sidecar().unwrap();
    assert!(records.len() >= 10, "short capture: {} records", records.len());
    let target = &records[9];

    // Rewrite the tenth record's hash in the sidecar; the frame bytes stay
    // untouched, so the recomputed hash can no longer match the recorded one.
    let mut tampered = target.state_hash.clone();
    let substitute = if tampered.starts_with('0') { "f" } else { "0" };
    tampered.replace_range(0..1, substitute);

    let sidecar_path = dir.path().join(SIDECAR_FILE);
    let text = std::fs::read_to_string(&sidecar_path).unwrap();
    let rewritten = text.replace(&target.state_hash, &tampered);
    assert_ne!(text, rewritten, "sidecar rewrite found nothing to change");
    std::fs::write(&sidecar_path, rewritten).unwrap();

    // Offline verification pinpoints the record.
    let report = verify_artifact(dir.path()).unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.hash_mismatches, vec![target.step_index]);
    assert!(report.order_violations.is_empty());
    assert!(report.structural_errors.is_empty());

    // A replay session delivers everything before the bad record, then
    // closes the stream and parks in the error state.
    let mut session = Session::new();
    let handle = session.replay(&artifact, SessionConfig::default()).unwrap();
    let mut delivered = 0u64;
    while timeout(SOON, handle.next_frame())
        .await
        .expect("a faulted replay must close its stream")
        .is_some()
    {
        delivered += 1;
    }
    assert_eq!(delivered, 9, "frames ahead of the bad record still deliver");

    wait_for_state(&session, SessionState::Error).await;
    let fault = session.last_error().expect("the fault is recorded");
    assert_eq!(fault.step_index, target.step_index);
    assert!(
        fault.message.contains("hash mismatch"),
        "got: {}",
        fault.message
    );

    // The error state gates playback until the session is torn down.
    let err = session.play().await.unwrap_err();
    assert!(err.to_string().contains("not valid"), "got: {err}");

    session.stop().await.unwrap();
    assert_eq!(session.state(), SessionState::Idle);
}
