//! `info` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use config_loader::{StreamBlueprint, SubscriptionSection};

/// Blueprint info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    session: SessionInfo,
    scrub: ScrubInfo,
    solver: SolverInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    capture: Option<CaptureInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    subscriptions: Vec<SubscriptionInfo>,
}

#[derive(Serialize)]
struct SessionInfo {
    queue_depth: usize,
    drop_policy: String,
    checkpoint_interval: u64,
    latency_window: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_step_rate_hz: Option<f64>,
}

#[derive(Serialize)]
struct ScrubInfo {
    coarse_stride: u32,
    coarse_depth: usize,
}

#[derive(Serialize)]
struct SolverInfo {
    dt_s: f64,
    rpm: f64,
    steps_per_revolution: u64,
    emit_contact: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    diverge_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<ProfileDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mesh: Option<MeshDetail>,
}

#[derive(Serialize)]
struct ProfileDetail {
    base_radius_mm: f64,
    max_lift_mm: f64,
    rise_deg: f64,
    dwell_deg: f64,
    fall_deg: f64,
    active_deg: f64,
}

#[derive(Serialize)]
struct MeshDetail {
    segments: u32,
    part_count: u32,
    length_mm: f32,
    width_mm: f32,
}

#[derive(Serialize)]
struct CaptureInfo {
    directory: String,
    auto_start: bool,
}

#[derive(Serialize)]
struct SubscriptionInfo {
    label: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    channels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue_depth: Option<usize>,
    drop_policy: String,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading blueprint info");

    if !args.config.exists() {
        anyhow::bail!("Blueprint file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load blueprint from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize blueprint info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

/// Steps the solver takes per cam revolution at the configured speed.
fn steps_per_revolution(blueprint: &StreamBlueprint) -> u64 {
    let rpm = blueprint.solver.profile.rpm;
    let dt = blueprint.solver.dt;
    if rpm > 0.0 && dt > 0.0 {
        (60.0 / rpm / dt).round() as u64
    } else {
        0
    }
}

/// Channel names one subscription receives beyond base displacements.
fn describe_channels(section: &SubscriptionSection) -> Vec<String> {
    let mut channels: Vec<String> = section.fields.clone();
    if section.include_contact {
        channels.push("contact".to_string());
    }
    if section.include_probes {
        channels.push("probes".to_string());
    }
    channels
}

fn build_config_info(blueprint: &StreamBlueprint, args: &InfoArgs) -> ConfigInfo {
    let session = blueprint.session_config();

    let solver = SolverInfo {
        dt_s: blueprint.solver.dt,
        rpm: blueprint.solver.profile.rpm,
        steps_per_revolution: steps_per_revolution(blueprint),
        emit_contact: blueprint.solver.emit_contact,
        diverge_at: blueprint.solver.diverge_at,
        profile: if args.solver {
            let profile = &blueprint.solver.profile;
            Some(ProfileDetail {
                base_radius_mm: profile.base_radius,
                max_lift_mm: profile.max_lift,
                rise_deg: profile.rise_deg,
                dwell_deg: profile.dwell_deg,
                fall_deg: profile.fall_deg,
                active_deg: profile.total_deg(),
            })
        } else {
            None
        },
        mesh: if args.solver {
            let mesh = &blueprint.solver.mesh;
            Some(MeshDetail {
                segments: mesh.segments,
                part_count: mesh.part_count,
                length_mm: mesh.length,
                width_mm: mesh.width,
            })
        } else {
            None
        },
    };

    let subscriptions = blueprint
        .subscriptions
        .iter()
        .map(|section| SubscriptionInfo {
            label: section.label.clone(),
            channels: if args.subscriptions {
                describe_channels(section)
            } else {
                Vec::new()
            },
            queue_depth: section.queue_depth,
            drop_policy: format!("{:?}", section.drop_policy),
        })
        .collect();

    ConfigInfo {
        session: SessionInfo {
            queue_depth: session.queue_depth,
            drop_policy: format!("{:?}", session.drop_policy),
            checkpoint_interval: session.checkpoint_interval,
            latency_window: session.latency_window,
            target_step_rate_hz: session.target_step_rate_hz,
        },
        scrub: ScrubInfo {
            coarse_stride: blueprint.scrub.coarse_stride,
            coarse_depth: blueprint.scrub.coarse_depth,
        },
        solver,
        capture: blueprint.capture.directory.as_ref().map(|dir| CaptureInfo {
            directory: dir.display().to_string(),
            auto_start: blueprint.capture.auto_start,
        }),
        subscriptions,
    }
}

fn print_config_info(blueprint: &StreamBlueprint, args: &InfoArgs) {
    let session = blueprint.session_config();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                 fea-stream Configuration                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    // Session settings
    println!("⏱  Session");
    println!("   ├─ Queue depth: {}", session.queue_depth);
    println!("   ├─ Drop policy: {:?}", session.drop_policy);
    println!(
        "   ├─ Checkpoint interval: {} steps",
        session.checkpoint_interval
    );
    println!("   ├─ Latency window: {} samples", session.latency_window);
    match session.target_step_rate_hz {
        Some(rate) => println!("   └─ Target step rate: {rate} Hz"),
        None => println!("   └─ Target step rate: unpaced"),
    }

    // Scrub settings
    println!("\n🔍 Scrub");
    println!("   ├─ Coarse stride: {}", blueprint.scrub.coarse_stride);
    println!("   └─ Coarse depth: {}", blueprint.scrub.coarse_depth);

    // Solver
    let profile = &blueprint.solver.profile;
    println!("\n🧮 Solver");
    println!("   ├─ Timestep: {:.1} us", blueprint.solver.dt * 1e6);
    println!(
        "   ├─ Cam speed: {} RPM ({} steps per revolution)",
        profile.rpm,
        steps_per_revolution(blueprint)
    );
    if args.solver {
        println!(
            "   ├─ Profile: base {} mm, lift {} mm",
            profile.base_radius, profile.max_lift
        );
        println!(
            "   ├─ Events: rise {}°, dwell {}°, fall {}° ({}° active)",
            profile.rise_deg,
            profile.dwell_deg,
            profile.fall_deg,
            profile.total_deg()
        );
        println!(
            "   ├─ Mesh: {} segments x {} parts ({} x {} mm)",
            blueprint.solver.mesh.segments,
            blueprint.solver.mesh.part_count,
            blueprint.solver.mesh.length,
            blueprint.solver.mesh.width
        );
    } else {
        println!(
            "   ├─ Mesh: {} segments x {} parts",
            blueprint.solver.mesh.segments, blueprint.solver.mesh.part_count
        );
    }
    match blueprint.solver.diverge_at {
        Some(step) => {
            println!("   ├─ Contact emission: {}", blueprint.solver.emit_contact);
            println!("   └─ Scripted fault at step {step}");
        }
        None => {
            println!("   └─ Contact emission: {}", blueprint.solver.emit_contact);
        }
    }

    // Subscriptions
    println!("\n📤 Subscriptions ({})", blueprint.subscriptions.len());
    for (i, section) in blueprint.subscriptions.iter().enumerate() {
        let is_last = i == blueprint.subscriptions.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        let depth = match section.queue_depth {
            Some(depth) => depth.to_string(),
            None => "default".to_string(),
        };
        println!(
            "   {} {} (depth {}, {:?})",
            prefix, section.label, depth, section.drop_policy
        );

        if args.subscriptions {
            let channels = describe_channels(section);
            if channels.is_empty() {
                println!("   {}  └─ displacements only", child_prefix);
            } else {
                println!("   {}  └─ channels: {}", child_prefix, channels.join(", "));
            }
        }
    }

    // Capture
    if let Some(ref dir) = blueprint.capture.directory {
        println!("\n💾 Capture");
        println!("   ├─ Directory: {}", dir.display());
        println!("   └─ Auto start: {}", blueprint.capture.auto_start);
    }

    println!();
}
