//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::pipeline::{RunnerConfig, StreamRunner};
use config_loader::StreamBlueprint;

/// Execute the `run` command
pub async fn run_stream(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading blueprint");

    // Validate config path
    if !args.config.exists() {
        anyhow::bail!("Blueprint file not found: {}", args.config.display());
    }

    // Load and parse configuration
    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load blueprint from {}", args.config.display()))?;

    // Apply CLI overrides
    if let Some(rate) = args.rate {
        info!(rate_hz = rate, "Overriding target step rate from CLI");
        blueprint.session.target_step_rate_hz = Some(rate);
    }
    if let Some(port) = args.metrics_port {
        blueprint.observability.metrics_port = if port == 0 { None } else { Some(port) };
    }
    if let Some(ref dir) = args.capture {
        info!(path = %dir.display(), "Capture enabled from CLI");
        blueprint.capture.directory = Some(dir.clone());
        blueprint.capture.auto_start = true;
    }

    info!(
        queue_depth = blueprint.session_config().queue_depth,
        rate_hz = ?blueprint.session.target_step_rate_hz,
        rpm = blueprint.solver.profile.rpm,
        subscriptions = blueprint.subscriptions.len(),
        capture = blueprint.capture.auto_start,
        "Blueprint loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - blueprint is valid, exiting");
        print_blueprint_summary(&blueprint);
        return Ok(());
    }

    // Build runner configuration
    let runner_config = RunnerConfig {
        blueprint,
        max_frames: if args.max_frames == 0 {
            None
        } else {
            Some(args.max_frames)
        },
        timeout: if args.timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(args.timeout))
        },
    };

    let runner = StreamRunner::new(runner_config);

    info!("Starting streaming session...");

    // The shutdown future is handed to the runner so capture artifacts
    // finalize and queues drain before the process exits.
    match runner.run(setup_shutdown_signal()).await {
        Ok(stats) => {
            info!(
                frames_produced = stats.frames_produced,
                frames_dropped = stats.frames_dropped,
                duration_secs = stats.duration.as_secs_f64(),
                rate_hz = format!("{:.2}", stats.step_rate_hz()),
                "Session completed"
            );

            // Print detailed statistics
            stats.print_summary();

            if let Some(ref fault) = stats.fault {
                anyhow::bail!("session ended in error state: {}", fault.message);
            }
        }
        Err(e) => {
            return Err(e).context("Streaming session failed");
        }
    }

    info!("fea-stream finished");
    Ok(())
}

/// Setup Ctrl+C and SIGTERM signal handlers
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("Received shutdown signal, stopping session...");
}

/// Print blueprint summary for dry-run mode
fn print_blueprint_summary(blueprint: &StreamBlueprint) {
    let session = blueprint.session_config();

    println!("\n=== Blueprint Summary ===\n");
    println!("Session:");
    println!("  Queue depth: {}", session.queue_depth);
    println!("  Drop policy: {:?}", session.drop_policy);
    println!("  Checkpoint interval: {} steps", session.checkpoint_interval);
    match session.target_step_rate_hz {
        Some(rate) => println!("  Target step rate: {rate} Hz"),
        None => println!("  Target step rate: unpaced"),
    }

    println!("\nSolver:");
    println!("  Timestep: {:.1} us", blueprint.solver.dt * 1e6);
    println!("  Cam speed: {} RPM", blueprint.solver.profile.rpm);
    println!(
        "  Mesh: {} segments x {} parts",
        blueprint.solver.mesh.segments, blueprint.solver.mesh.part_count
    );

    println!("\nSubscriptions ({}):", blueprint.subscriptions.len());
    for sub in &blueprint.subscriptions {
        let mut channels: Vec<&str> = sub.fields.iter().map(String::as_str).collect();
        if sub.include_contact {
            channels.push("contact");
        }
        if sub.include_probes {
            channels.push("probes");
        }
        let channels = if channels.is_empty() {
            "displacements only".to_string()
        } else {
            channels.join(", ")
        };
        println!("  - {} ({})", sub.label, channels);
    }

    if let Some(ref dir) = blueprint.capture.directory {
        println!("\nCapture:");
        println!("  Directory: {}", dir.display());
        println!("  Auto start: {}", blueprint.capture.auto_start);
    }

    println!();
}
