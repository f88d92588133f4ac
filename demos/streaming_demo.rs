//! Streaming Demo
//!
//! Loads a blueprint, binds the synthetic solver, registers the configured
//! subscribers, and streams paced frames while nudging the cam profile
//! mid-run. Prints production and delivery totals on the way out.
//!
//! Run with: cargo run -p demos --bin streaming_demo [blueprint_path]

use std::path::PathBuf;
use std::time::Duration;

use config_loader::ConfigLoader;
use contracts::ParameterSet;
use session::Session;
use synthetic_solver::SyntheticStepper;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Streaming Demo");

    let config_path = resolve_config_path();
    info!(path = %config_path.display(), "Loading blueprint");
    let blueprint = ConfigLoader::load_from_path(config_path.as_path())?;
    info!(
        dt = blueprint.solver.dt,
        rpm = blueprint.solver.profile.rpm,
        subscriber_count = blueprint.subscriptions.len(),
        "Blueprint loaded"
    );

    // ==== Stage 1: Bind the solver ====
    let stepper = SyntheticStepper::new(blueprint.solver.clone())?;
    let mut session = Session::new();
    session.start(Box::new(stepper), blueprint.session_config())?;

    // Log lifecycle events as they land.
    let mut events = session.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(?event, "Session event");
        }
    });

    // ==== Stage 2: Register subscribers from the blueprint ====
    let mut handles = Vec::new();
    for spec in blueprint.subscription_specs()? {
        info!(
            label = spec.label.as_str(),
            depth = spec.queue_depth,
            "Registering subscriber"
        );
        handles.push(session.subscribe_frames(spec)?);
    }

    // ==== Stage 3: Run the flagship consumer to a frame target ====
    let target_frames = 300u64;
    let mut handles = handles.into_iter();
    let flagship = handles
        .next()
        .ok_or("blueprint registered no subscriptions")?;
    let flagship_label = flagship.label().to_string();
    info!(
        label = flagship_label.as_str(),
        target_frames, "Running pipeline"
    );

    let pipeline_handle = tokio::spawn(async move {
        let mut delivered = 0u64;
        while let Some(frame) = flagship.next_frame().await {
            delivered += 1;
            if delivered % 50 == 0 {
                let max_stress = frame
                    .aggregates
                    .as_ref()
                    .map(|agg| {
                        agg.per_part
                            .iter()
                            .map(|part| part.max_stress)
                            .fold(0.0f32, f32::max)
                    })
                    .unwrap_or(0.0);
                info!(
                    step = frame.meta.step_index,
                    t = format!("{:.4}", frame.meta.time_s),
                    max_stress = format!("{:.2}", max_stress),
                    "Frame delivered"
                );
            }
            if delivered >= target_frames {
                break;
            }
        }
        delivered
    });

    // Keep the remaining subscriptions draining so their queues stay live.
    let background: Vec<_> = handles
        .map(|handle| {
            tokio::spawn(async move { while handle.next_frame().await.is_some() {} })
        })
        .collect();

    // ==== Stage 4: Nudge the cam profile mid-run ====
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut params = ParameterSet::new();
    params.set("rpm", 3600.0);
    session.update_parameters(params).await?;
    info!(rpm = 3600.0, "Profile update queued at the step barrier");

    // Wait for the pipeline with timeout
    let result = tokio::time::timeout(Duration::from_secs(30), pipeline_handle).await;

    // ==== Stage 5: Report and shut down ====
    let report = session.get_diagnostics();
    info!(
        state = %report.state,
        step = report.step_index,
        produced = report.produced_total,
        dropped = report.dropped_total,
        "Production totals"
    );
    for sub in &report.subscriptions {
        info!(
            label = sub.label.as_str(),
            delivered = sub.delivered,
            dropped = sub.dropped,
            p50_ms = format!("{:.2}", sub.latency_p50_ms),
            p95_ms = format!("{:.2}", sub.latency_p95_ms),
            "Subscription totals"
        );
    }

    info!("Shutting down...");
    session.stop().await?;
    for task in background {
        let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
    }

    match result {
        Ok(Ok(count)) => info!(
            frames = count,
            label = flagship_label.as_str(),
            "Pipeline completed successfully"
        ),
        Ok(Err(e)) => info!("Pipeline task error: {e:?}"),
        Err(_) => info!("Pipeline timed out"),
    }

    info!("Streaming Demo finished");
    Ok(())
}

fn resolve_config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("demos/run.toml"))
}
