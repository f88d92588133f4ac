//! Blueprint-to-frames pipeline
//!
//! A TOML blueprint drives a real session end to end: the solver comes
//! from the blueprint's solver table, subscriptions from its subscription
//! list, and delivery is observed through the public stream handles.

use std::time::Duration;

use tokio::time::timeout;

use config_loader::{ConfigFormat, ConfigLoader};
use session::{Session, SessionState, SubscriptionSpec};
use synthetic_solver::SyntheticStepper;

use crate::support::{next_frame_soon, paced, stepper, SOON};

const BLUEPRINT: &str = r#"
[session]
queue_depth = 8
target_step_rate_hz = 400.0

[solver]
dt = 1e-4
emit_contact = true

[solver.profile]
rpm = 3000.0

[[subscriptions]]
label = "renderer"
fields = ["all"]
include_contact = true
queue_depth = 32

[[subscriptions]]
label = "probe_panel"
include_probes = true
queue_depth = 16
"#;

#[tokio::test]
async fn a_blueprint_drives_a_live_stream() {
    let blueprint =
        ConfigLoader::load_from_str(BLUEPRINT, ConfigFormat::Toml).expect("blueprint parses");
    let solver = SyntheticStepper::new(blueprint.solver.clone()).expect("solver builds");

    let mut session = Session::new();
    session
        .start(Box::new(solver), blueprint.session_config())
        .expect("session starts");

    let mut specs = blueprint
        .subscription_specs()
        .expect("subscription specs build")
        .into_iter();
    let renderer = session.subscribe_frames(specs.next().unwrap()).unwrap();
    let probe_panel = session.subscribe_frames(specs.next().unwrap()).unwrap();
    assert!(specs.next().is_none(), "blueprint declares two subscriptions");
    assert_eq!(renderer.label(), "renderer");
    assert_eq!(probe_panel.label(), "probe_panel");

    // The renderer asked for every nodal field plus contact, but no probes.
    let mut last = None;
    for _ in 0..10 {
        let frame = next_frame_soon(&renderer).await;
        if let Some(prev) = last {
            assert!(
                frame.meta.step_index > prev,
                "renderer saw step {} after {prev}",
                frame.meta.step_index
            );
        }
        last = Some(frame.meta.step_index);
        assert!(frame.nodal.stresses.is_some(), "renderer selected every field");
        assert!(frame.contact.is_some(), "renderer selected contact overlays");
        assert!(frame.probes.is_none(), "renderer never asked for probes");
    }

    // The probe panel gets samples and baseline displacements, nothing else.
    let frame = next_frame_soon(&probe_panel).await;
    assert!(frame.probes.is_some(), "probe panel selected probe samples");
    assert!(frame.nodal.stresses.is_none(), "probe panel left stresses unselected");
    assert!(frame.aggregates.is_none());
    assert!(!frame.nodal.disp_x.is_empty(), "displacements are always delivered");

    session.stop().await.unwrap();
    assert_eq!(session.state(), SessionState::Idle);

    // Stop closes the stream: whatever was queued drains, then end-of-stream.
    let mut drained = 0;
    while timeout(SOON, renderer.next_frame())
        .await
        .expect("a closed stream must not block")
        .is_some()
    {
        drained += 1;
    }
    assert!(drained <= 32, "drained {drained} frames from a depth-32 queue");
}

#[tokio::test]
async fn pause_holds_the_stream_and_play_resumes_it() {
    let mut session = Session::new();
    session.start(stepper(), paced(200.0)).unwrap();
    let viewer = session
        .subscribe_frames(SubscriptionSpec::new("viewer").with_queue_depth(64))
        .unwrap();

    next_frame_soon(&viewer).await;
    session.pause().await.unwrap();
    session.pause().await.unwrap();
    assert_eq!(session.state(), SessionState::Paused, "repeated pause is a no-op");

    // Clear frames that raced the pause, then verify silence.
    while let Ok(Some(_)) = timeout(Duration::from_millis(80), viewer.next_frame()).await {}
    assert!(
        timeout(Duration::from_millis(150), viewer.next_frame()).await.is_err(),
        "frames kept flowing through a paused session"
    );
    let held = session.get_diagnostics().produced_total;

    session.play().await.unwrap();
    session.play().await.unwrap();
    assert_eq!(session.state(), SessionState::Running, "repeated play is a no-op");

    next_frame_soon(&viewer).await;
    let resumed = session.get_diagnostics().produced_total;
    assert!(resumed > held, "play did not restart production");

    session.stop().await.unwrap();
    assert_eq!(session.state(), SessionState::Idle);
}
