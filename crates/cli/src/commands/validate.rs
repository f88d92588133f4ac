//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;
use config_loader::StreamBlueprint;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    queue_depth: usize,
    drop_policy: String,
    checkpoint_interval: u64,
    target_step_rate_hz: Option<f64>,
    solver_rpm: f64,
    subscription_count: usize,
    capture_directory: Option<String>,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating blueprint");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Blueprint validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    // Check file exists
    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    // Try to load and validate
    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            let session = blueprint.session_config();

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    queue_depth: session.queue_depth,
                    drop_policy: format!("{:?}", session.drop_policy),
                    checkpoint_interval: session.checkpoint_interval,
                    target_step_rate_hz: session.target_step_rate_hz,
                    solver_rpm: blueprint.solver.profile.rpm,
                    subscription_count: blueprint.subscriptions.len(),
                    capture_directory: blueprint
                        .capture
                        .directory
                        .as_ref()
                        .map(|d| d.display().to_string()),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &StreamBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    // Check for missing subscribers
    if blueprint.subscriptions.is_empty() {
        warnings
            .push("No subscriptions configured - frames fall back to the console sink".to_string());
    }

    // Check pacing
    if blueprint.session.target_step_rate_hz.is_none() {
        warnings.push(
            "No target step rate set - the solver free-runs against queue backpressure".to_string(),
        );
    }

    // Check for a scripted fault
    if let Some(step) = blueprint.solver.diverge_at {
        warnings.push(format!(
            "solver.diverge_at = {step} - the run is scripted to fault at that step"
        ));
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Blueprint is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Queue depth: {}", summary.queue_depth);
            println!("  Drop policy: {}", summary.drop_policy);
            println!("  Checkpoint interval: {} steps", summary.checkpoint_interval);
            match summary.target_step_rate_hz {
                Some(rate) => println!("  Target step rate: {rate} Hz"),
                None => println!("  Target step rate: unpaced"),
            }
            println!("  Solver speed: {} RPM", summary.solver_rpm);
            println!("  Subscriptions: {}", summary.subscription_count);
            if let Some(ref dir) = summary.capture_directory {
                println!("  Capture directory: {dir}");
            }
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Blueprint is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
