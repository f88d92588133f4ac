//! Scrub storms
//!
//! A drag gesture hammers the session with coarse seeks. The promises
//! under fire: preview queues stay at the coarse clamp, stale previews
//! give way to fresh ones, delivery stays interactive, and the final
//! refine lands exactly on the requested step at full fidelity.

use contracts::FrameFlags;
use std::time::Duration;
use tokio::time::timeout;

use session::{DropPolicy, QualityHint, Session, SessionEvent, SessionState, SubscriptionSpec};

use crate::support::{paced, stepper, wait_for_event, wait_for_state, SOON};

#[tokio::test]
async fn a_coarse_seek_storm_stays_shallow_and_settles_exactly() {
    let mut session = Session::new();
    session.start(stepper(), paced(500.0)).unwrap();
    let mut events = session.events();

    let panel = session
        .subscribe_frames(
            SubscriptionSpec::new("scrub_panel")
                .with_queue_depth(3)
                .with_drop_policy(DropPolicy::DropOldest),
        )
        .unwrap();
    session.pause().await.unwrap();

    let consumer = tokio::spawn(async move {
        let mut previews = 0u64;
        let mut max_depth = 0usize;
        let mut settle = None;
        while let Some(frame) = panel.next_frame().await {
            max_depth = max_depth.max(panel.depth());
            if frame.is_preview() {
                previews += 1;
            } else {
                settle = Some((
                    frame.meta.step_index,
                    frame.meta.flags.contains(FrameFlags::IS_KEYFRAME),
                ));
            }
        }
        (previews, max_depth, settle)
    });

    // One hundred coarse retargets, arriving the way a drag gesture does.
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    for _ in 0..100 {
        let target = rng.f64() * 0.04;
        session.seek(target, QualityHint::Coarse).await.unwrap();
        tokio::time::sleep(Duration::from_millis(12)).await;
    }

    // The clamp holds while the storm is still in flight.
    let mid = session.get_diagnostics();
    let entry = mid.subscription("scrub_panel").unwrap();
    assert_eq!(entry.queue_capacity, 3);
    assert!(
        entry.queue_depth <= 3,
        "preview backlog reached {} frames mid-storm",
        entry.queue_depth
    );

    // The gesture ends: one exact settle, back to the pre-seek hold.
    session.seek(0.03, QualityHint::Refine).await.unwrap();
    let settled =
        wait_for_event(&mut events, |e| matches!(e, SessionEvent::SeekSettled { .. })).await;
    match settled {
        SessionEvent::SeekSettled { time_s, step_index } => {
            assert_eq!(step_index, 300, "refine must land on the exact step for t=0.03");
            assert!((time_s - 0.03).abs() < 1e-12);
        }
        other => panic!("expected a settle, got {other:?}"),
    }
    wait_for_state(&session, SessionState::Paused).await;

    let after = session.get_diagnostics();
    let entry = after.subscription("scrub_panel").unwrap();
    assert!(
        entry.latency_p95_ms < 50.0,
        "scrub previews must stay interactive, got p95 {} ms",
        entry.latency_p95_ms
    );

    session.stop().await.unwrap();
    let (previews, max_depth, settle) = timeout(SOON, consumer).await.unwrap().unwrap();
    assert!(
        previews >= 50,
        "a hundred-target storm delivered only {previews} previews"
    );
    assert!(max_depth <= 3, "subscriber queue reached depth {max_depth}");

    let (settle_step, keyframed) = settle.expect("the settle frame reaches the subscriber");
    assert_eq!(settle_step, 300, "subscriber saw a different settle step");
    assert!(keyframed, "a refine settle is checkpointed and keyframed");
}
