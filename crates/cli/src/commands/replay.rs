//! `replay` command implementation.

use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::ReplayArgs;
use session::{CaptureArtifact, Session, SessionConfig};

/// Replay outcome for JSON output
#[derive(Serialize)]
struct ReplayReport {
    artifact: String,
    session_label: String,
    frames_delivered: u64,
    frames_recorded: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_step: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_step: Option<u64>,
    sim_duration_s: f64,
    wall_duration_s: f64,
    complete: bool,
}

/// Execute the `replay` command
pub async fn run_replay(args: &ReplayArgs) -> Result<()> {
    info!(artifact = %args.artifact.display(), "Opening capture artifact");

    if !args.artifact.exists() {
        anyhow::bail!("Capture artifact not found: {}", args.artifact.display());
    }

    if args.verify {
        let report =
            capture::verify_artifact(&args.artifact).context("Artifact verification failed")?;
        if !report.is_clean() {
            anyhow::bail!(
                "artifact failed verification: {} hash mismatches, {} order violations, {} structural errors",
                report.hash_mismatches.len(),
                report.order_violations.len(),
                report.structural_errors.len()
            );
        }
        info!(frames = report.frames_checked, "Artifact verified");
    }

    let artifact =
        CaptureArtifact::open(&args.artifact).context("Failed to open capture artifact")?;
    let session_label = artifact.manifest().session_label.clone();
    let frames_recorded = artifact.manifest().frame_count;

    info!(
        session = %session_label,
        frames = frames_recorded,
        duration_s = artifact.manifest().duration_s,
        recorded_drops = artifact.manifest().dropped_during_capture,
        "Replaying capture"
    );

    let mut session = Session::new();
    let handle = session
        .replay(&artifact, SessionConfig::default())
        .context("Failed to start replay")?;

    let start = Instant::now();
    let max_frames = args.max_frames;
    let mut delivered = 0u64;
    let mut first_step = None;
    let mut final_step: Option<u64> = None;
    let mut first_time = 0.0f64;
    let mut last_time = 0.0f64;

    while let Some(frame) = handle.next_frame().await {
        if first_step.is_none() {
            first_step = Some(frame.meta.step_index);
            first_time = frame.meta.time_s;
        }
        final_step = Some(frame.meta.step_index);
        last_time = frame.meta.time_s;
        delivered += 1;

        if max_frames != 0 && delivered >= max_frames {
            info!(frames = delivered, "Reached max frames limit");
            break;
        }
    }

    let wall = start.elapsed();

    // The stream closing early means the replay stepper hit a corrupt or
    // reordered record and the session parked itself in the error state.
    let fault = session.last_error();
    session.stop().await.context("Failed to stop replay session")?;
    if let Some(fault) = fault {
        anyhow::bail!("replay faulted at step {}: {}", fault.step_index, fault.message);
    }

    let report = ReplayReport {
        artifact: args.artifact.display().to_string(),
        session_label,
        frames_delivered: delivered,
        frames_recorded,
        first_step,
        final_step,
        sim_duration_s: last_time - first_time,
        wall_duration_s: wall.as_secs_f64(),
        complete: delivered == frames_recorded,
    };

    if args.json {
        let json =
            serde_json::to_string_pretty(&report).context("Failed to serialize replay report")?;
        println!("{}", json);
    } else {
        print_replay_report(&report);
    }

    Ok(())
}

fn print_replay_report(report: &ReplayReport) {
    if report.complete {
        println!(
            "✓ Replayed {} of {} frames from '{}'",
            report.frames_delivered, report.frames_recorded, report.session_label
        );
    } else {
        println!(
            "⚠ Replayed {} of {} frames from '{}' (stopped early)",
            report.frames_delivered, report.frames_recorded, report.session_label
        );
    }

    if let (Some(first), Some(last)) = (report.first_step, report.final_step) {
        println!("\n  Steps: {} .. {}", first, last);
    }
    println!("  Simulated time: {:.4}s", report.sim_duration_s);
    println!(
        "  Wall time: {:.2}s ({:.0} frames/s)",
        report.wall_duration_s,
        if report.wall_duration_s > 0.0 {
            report.frames_delivered as f64 / report.wall_duration_s
        } else {
            0.0
        }
    );
    println!();
}
