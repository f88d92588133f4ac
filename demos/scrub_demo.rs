//! Scrub Demo
//!
//! Starts a run held at a paused timeline, sweeps the playhead back and
//! forth with coarse seeks the way a dragged slider would, then settles
//! with a refine seek and reports what the scrub panel saw.
//!
//! Run with: cargo run -p demos --bin scrub_demo [blueprint_path]

use std::path::PathBuf;
use std::time::Duration;

use config_loader::ConfigLoader;
use contracts::{FieldsMask, QualityHint, SessionEvent, SubscriptionSpec};
use session::Session;
use synthetic_solver::SyntheticStepper;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Scrub Demo");

    let config_path = resolve_config_path();
    info!(path = %config_path.display(), "Loading blueprint");
    let blueprint = ConfigLoader::load_from_path(config_path.as_path())?;

    // ==== Stage 1: Start held ====
    let stepper = SyntheticStepper::new(blueprint.solver.clone())?;
    let mut session = Session::new();
    session.start(Box::new(stepper), blueprint.session_config())?;
    session.pause().await?;
    info!(state = %session.state(), "Session held for scrubbing");

    // ==== Stage 2: Attach the scrub panel ====
    let spec = SubscriptionSpec::new("scrub_panel")
        .with_fields(FieldsMask::all())
        .with_queue_depth(4);
    let panel = session.subscribe_frames(spec)?;
    let mut events = session.events();

    let panel_task = tokio::spawn(async move {
        let mut previews = 0u64;
        let mut settles = 0u64;
        while let Some(frame) = panel.next_frame().await {
            if frame.is_preview() {
                previews += 1;
                if previews % 20 == 0 {
                    info!(
                        step = frame.meta.step_index,
                        t = format!("{:.4}", frame.meta.time_s),
                        "Coarse preview"
                    );
                }
            } else {
                settles += 1;
                info!(
                    step = frame.meta.step_index,
                    t = format!("{:.4}", frame.meta.time_s),
                    "Full-fidelity settle frame"
                );
            }
        }
        (previews, settles)
    });

    // ==== Stage 3: Drag the playhead ====
    let cycle_s = 60.0 / blueprint.solver.profile.rpm;
    info!(
        cycle_s = format!("{:.4}", cycle_s),
        "Sweeping coarse seeks across one cam cycle"
    );
    for i in 0..60u32 {
        let phase = f64::from(i) * 0.35;
        let target = cycle_s * (0.5 + 0.45 * phase.sin());
        session.seek(target, QualityHint::Coarse).await?;
        tokio::time::sleep(Duration::from_millis(15)).await;
    }

    // ==== Stage 4: Release the slider ====
    let settle_target = cycle_s * 0.5;
    info!(
        t = format!("{:.4}", settle_target),
        "Refining to the release point"
    );
    session.seek(settle_target, QualityHint::Refine).await?;

    let settled = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::SeekSettled { time_s, step_index }) => {
                    return Some((time_s, step_index))
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .await;

    match settled {
        Ok(Some((time_s, step_index))) => {
            info!(
                step = step_index,
                t = format!("{:.6}", time_s),
                "Seek settled"
            )
        }
        Ok(None) => info!("Event stream closed before the seek settled"),
        Err(_) => info!("Seek did not settle in time"),
    }

    // ==== Stage 5: Report and shut down ====
    let report = session.get_diagnostics();
    info!(
        state = %report.state,
        produced = report.produced_total,
        dropped = report.dropped_total,
        "Production totals"
    );
    for sub in &report.subscriptions {
        info!(
            label = sub.label.as_str(),
            depth = sub.queue_depth,
            capacity = sub.queue_capacity,
            delivered = sub.delivered,
            p50_ms = format!("{:.2}", sub.latency_p50_ms),
            p95_ms = format!("{:.2}", sub.latency_p95_ms),
            "Scrub panel delivery"
        );
    }

    info!("Shutting down...");
    session.stop().await?;

    match tokio::time::timeout(Duration::from_secs(2), panel_task).await {
        Ok(Ok((previews, settles))) => info!(previews, settles, "Scrub Demo finished"),
        Ok(Err(e)) => info!("Panel task error: {e:?}"),
        Err(_) => info!("Panel task timed out"),
    }

    Ok(())
}

fn resolve_config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("demos/run.toml"))
}
