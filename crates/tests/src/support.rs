//! Shared helpers for the end-to-end suites.

use std::path::Path;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time::timeout;

use session::{
    CaptureArtifact, Frame, FrameStepper, FrameStreamHandle, Session, SessionConfig, SessionEvent,
    SessionState,
};
use synthetic_solver::SyntheticStepper;

/// Patience for anything that should happen quickly on a healthy build.
pub const SOON: Duration = Duration::from_secs(5);

pub fn stepper() -> Box<dyn FrameStepper> {
    Box::new(SyntheticStepper::with_defaults().expect("default solver config is valid"))
}

/// Production paced at `hz` steps per second.
pub fn paced(hz: f64) -> SessionConfig {
    SessionConfig {
        target_step_rate_hz: Some(hz),
        ..SessionConfig::default()
    }
}

pub async fn next_frame_soon(handle: &FrameStreamHandle) -> Frame {
    timeout(SOON, handle.next_frame())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended early")
}

/// Poll until the session has produced a frame at or past `step`.
pub async fn wait_for_step(session: &Session, step: u64) {
    let deadline = Instant::now() + SOON;
    while session.get_diagnostics().step_index < step {
        assert!(
            Instant::now() < deadline,
            "session never reached step {step}, stuck at {}",
            session.get_diagnostics().step_index
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Poll until the session reports `state`. Driver-side transitions land a
/// moment after the frames that caused them, so observers wait.
pub async fn wait_for_state(session: &Session, state: SessionState) {
    let deadline = Instant::now() + SOON;
    while session.state() != state {
        assert!(
            Instant::now() < deadline,
            "session never reached {state}, stuck in {}",
            session.state()
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

pub async fn wait_for_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    mut accept: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let received = timeout(SOON, events.recv())
            .await
            .expect("timed out waiting for a session event");
        match received {
            Ok(event) if accept(&event) => return event,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
        }
    }
}

/// Record a paced live run of at least `steps` solver steps into `dir`.
///
/// The recorder attaches right after the session starts, so the artifact
/// may begin a handful of steps in; it is still contiguous and monotone.
pub async fn record_run(dir: &Path, steps: u64) -> CaptureArtifact {
    let mut session = Session::new();
    session
        .start(stepper(), paced(2_000.0))
        .expect("session failed to start");

    let capture = session
        .capture_begin(dir)
        .await
        .expect("capture failed to start");
    wait_for_step(&session, steps).await;
    session.pause().await.expect("pause failed");

    let artifact = session
        .capture_end(capture)
        .await
        .expect("capture failed to finalize");
    session.stop().await.expect("stop failed");
    artifact
}
